//! Canonical comment messages and the normalizer that builds them from raw
//! stream frames.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Kind of event a comment frame represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    User,
    System,
    Like,
    Gift,
    Follow,
    Join,
    Unknown,
}

impl MessageClass {
    /// Map a wire `content_type` code to a class.
    ///
    /// A missing code is an ordinary user comment.
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            None | Some(1) => Self::User,
            Some(0) | Some(9) => Self::System,
            Some(2) => Self::Like,
            Some(3) => Self::Gift,
            Some(4) => Self::Follow,
            Some(8) => Self::Join,
            Some(_) => Self::Unknown,
        }
    }

    /// Preset key for the classes that can be answered from templates
    pub fn preset_kind(&self) -> Option<&'static str> {
        match self {
            Self::Like => Some("like"),
            Self::Gift => Some("gift"),
            Self::Follow => Some("follow"),
            Self::Join => Some("join"),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::User => "user",
            Self::System => "system",
            Self::Like => "like",
            Self::Gift => "gift",
            Self::Follow => "follow",
            Self::Join => "join",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A single normalized comment event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_name: String,
    /// Stable sender identifier, used for blocking
    pub sender_id: Option<String>,
    pub text: String,
    /// Event time as epoch seconds
    pub timestamp: f64,
    pub class: MessageClass,
    pub is_self: bool,
}

impl Message {
    /// Comments with nothing but whitespace are dropped before queueing
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Sender id if present and non-empty
    pub fn blockable_sender(&self) -> Option<&str> {
        self.sender_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Frame shape as sent by the comment server
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub comment_id: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub vlive_id: Option<String>,
    #[serde(default)]
    pub is_self: Option<bool>,
}

/// Current wall-clock time as epoch seconds
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

static LAST_SYNTHETIC_ID: AtomicU64 = AtomicU64::new(0);

/// Nanosecond-clock id, strictly increasing within the process
fn synthetic_id() -> String {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .map(|ns| ns.max(0) as u64)
        .unwrap_or_default();
    let mut last = LAST_SYNTHETIC_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_SYNTHETIC_ID.compare_exchange_weak(
            last,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next.to_string(),
            Err(actual) => last = actual,
        }
    }
}

/// Parse an ISO-8601 timestamp to epoch seconds.
///
/// Offset-less timestamps are read as local time. Anything unparsable, including an
/// empty string, falls back to the current time.
pub fn parse_timestamp(raw: Option<&str>) -> f64 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return now_secs();
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.timestamp_micros() as f64 / 1_000_000.0;
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| {
            // A local time skipped by a DST change has no mapping; read it as UTC
            let micros = Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.timestamp_micros())
                .unwrap_or_else(|| naive.and_utc().timestamp_micros());
            micros as f64 / 1_000_000.0
        })
        .unwrap_or_else(|_| {
            tracing::debug!("Unparsable timestamp {:?}, using now", raw);
            now_secs()
        })
}

fn comment_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a message from an already decoded frame
pub fn from_raw(frame: RawFrame) -> Message {
    let id = comment_id(frame.comment_id.as_ref()).unwrap_or_else(synthetic_id);
    Message {
        id,
        sender_name: frame
            .nickname
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unknown User".to_string()),
        sender_id: frame.vlive_id,
        text: frame.content,
        timestamp: parse_timestamp(frame.created_at.as_deref()),
        class: MessageClass::from_code(frame.content_type),
        is_self: frame.is_self.unwrap_or(false),
    }
}

/// Decode a text frame into a message
pub fn normalize(frame: &str) -> Result<Message> {
    let raw: RawFrame = serde_json::from_str(frame).map_err(|e| CoreError::FrameParse {
        frame_preview: frame.chars().take(120).collect(),
        cause: e,
    })?;
    Ok(from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_full_frame() {
        let msg = normalize(
            r#"{"content":"hello","content_type":1,"nickname":"Alice",
                "comment_id":"c-1","created_at":"2024-05-01T12:00:00Z",
                "vlive_id":"v123","is_self":false}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            Message {
                id: "c-1".to_string(),
                sender_name: "Alice".to_string(),
                sender_id: Some("v123".to_string()),
                text: "hello".to_string(),
                timestamp: 1714564800.0,
                class: MessageClass::User,
                is_self: false,
            }
        );
    }

    #[test]
    fn test_class_table() {
        assert_eq!(MessageClass::from_code(Some(0)), MessageClass::System);
        assert_eq!(MessageClass::from_code(Some(2)), MessageClass::Like);
        assert_eq!(MessageClass::from_code(Some(3)), MessageClass::Gift);
        assert_eq!(MessageClass::from_code(Some(4)), MessageClass::Follow);
        assert_eq!(MessageClass::from_code(Some(8)), MessageClass::Join);
        assert_eq!(MessageClass::from_code(Some(9)), MessageClass::System);
        assert_eq!(MessageClass::from_code(Some(42)), MessageClass::Unknown);
        assert_eq!(MessageClass::from_code(None), MessageClass::User);
    }

    #[test]
    fn test_numeric_comment_id() {
        let msg = normalize(r#"{"content":"hi","comment_id":98765}"#).unwrap();
        assert_eq!(msg.id, "98765");
        assert_eq!(msg.sender_name, "Unknown User");
    }

    #[test]
    fn test_synthesized_ids_are_unique() {
        let a = normalize(r#"{"content":"a"}"#).unwrap();
        let b = normalize(r#"{"content":"b"}"#).unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.id.parse::<u64>().unwrap() > a.id.parse::<u64>().unwrap());
    }

    #[test]
    fn test_timestamp_fallback() {
        let before = now_secs();
        let ts = parse_timestamp(Some("not a date"));
        assert!(ts >= before);
        assert!(parse_timestamp(Some("")) >= before);
    }

    #[test]
    fn test_offsetless_timestamp_is_local_time() {
        let local = Local
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .earliest()
            .unwrap()
            .timestamp() as f64;
        assert_eq!(parse_timestamp(Some("2024-05-01T12:00:00.500")), local + 0.5);
        assert_eq!(parse_timestamp(Some("2024-05-01 12:00:00")), local);
        // An explicit offset is honoured as given
        assert_eq!(
            parse_timestamp(Some("2024-05-01T12:00:00.500Z")),
            1714564800.5
        );
    }

    #[test]
    fn test_whitespace_message_is_empty() {
        let msg = normalize(r#"{"content":"   \n"}"#).unwrap();
        assert!(msg.is_empty());
    }

    #[test]
    fn test_malformed_frame() {
        let err = normalize("{not json").unwrap_err();
        assert!(matches!(err, CoreError::FrameParse { .. }));
    }
}
