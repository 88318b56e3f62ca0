/// Characters a long reply may be split after, most preferred first
pub const BREAKPOINTS: [char; 11] = ['。', '.', '，', ',', '！', '!', '？', '?', ' ', ':', ';'];

/// Split `text` into parts of at most `max_len` characters.
///
/// Each cut goes right after the last occurrence of the highest-priority
/// breakpoint found in the second half of the window, or hard at `max_len`
/// when there is none. Parts are trimmed and empty parts dropped, so the
/// parts joined together carry every non-whitespace character in order.
pub fn split_chunks(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut rest = skip_whitespace(&chars);

    while rest.len() > max_len {
        let split = find_split(&rest[..max_len], max_len);
        push_trimmed(&mut parts, &rest[..split]);
        rest = skip_whitespace(&rest[split..]);
    }
    push_trimmed(&mut parts, rest);

    parts
}

fn find_split(window: &[char], max_len: usize) -> usize {
    let lower = max_len / 2;
    BREAKPOINTS
        .iter()
        .find_map(|bp| {
            window[lower..]
                .iter()
                .rposition(|c| c == bp)
                .map(|pos| lower + pos + 1)
        })
        .unwrap_or(max_len)
}

fn skip_whitespace(chars: &[char]) -> &[char] {
    let start = chars
        .iter()
        .position(|c| !c.is_whitespace())
        .unwrap_or(chars.len());
    &chars[start..]
}

fn push_trimmed(parts: &mut Vec<String>, chars: &[char]) {
    let part: String = chars.iter().collect();
    let part = part.trim();
    if !part.is_empty() {
        parts.push(part.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn non_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_short_text_is_one_part() {
        assert_eq!(split_chunks("  hello  ", 90), vec!["hello"]);
        assert!(split_chunks("   ", 90).is_empty());
    }

    #[test]
    fn test_prefers_sentence_end() {
        let text = "First sentence here. Second one, with a comma and more words";
        let parts = split_chunks(text, 30);
        assert_eq!(parts[0], "First sentence here.");
        assert!(parts.iter().all(|p| p.chars().count() <= 30));
        assert_eq!(non_whitespace(&parts.concat()), non_whitespace(text));
    }

    #[test]
    fn test_breakpoint_priority_beats_position() {
        // The comma is later but the full stop wins on priority
        let text = "aaaaaa.bbb,cc dddddddddd";
        let parts = split_chunks(text, 12);
        assert_eq!(parts[0], "aaaaaa.");
    }

    #[test]
    fn test_breakpoint_in_first_half_is_ignored() {
        let text = "ab.cdefghijklmnop";
        let parts = split_chunks(text, 10);
        assert_eq!(parts, vec!["ab.cdefghi", "jklmnop"]);
    }

    #[test]
    fn test_hard_split_without_breakpoints() {
        let text = "x".repeat(25);
        let parts = split_chunks(&text, 10);
        assert_eq!(parts, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "你好世界你好世界。你好世界你好世界你好世界";
        let parts = split_chunks(text, 12);
        assert_eq!(parts[0], "你好世界你好世界。");
        assert!(parts.iter().all(|p| p.chars().count() <= 12));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_reconstructs_non_whitespace_content() {
        let samples = [
            "Thanks for coming to the stream tonight!  We are going to play a few rounds, \
             then answer questions: bring them on; everything is welcome? yes.",
            "   leading and trailing whitespace around a fairly long line of words   ",
            "no-breaks-at-all-in-this-one-no-breaks-at-all-in-this-one-no-breaks",
        ];
        for sample in samples {
            for max_len in [5, 17, 40, 90] {
                let parts = split_chunks(sample, max_len);
                assert!(parts.iter().all(|p| p.chars().count() <= max_len));
                assert!(parts.iter().all(|p| !p.is_empty()));
                assert_eq!(non_whitespace(&parts.concat()), non_whitespace(sample));
            }
        }
    }
}
