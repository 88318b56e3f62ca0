//! Text generation seam and the OpenAI-compatible HTTP provider.

use std::fmt::Debug;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{BotConfig, ModelConfig};
use crate::context::ContextEntry;
use crate::error::{CoreError, Result};
use crate::message::Message;

/// Persona used when no character file is configured or readable
pub const DEFAULT_PERSONA: &str = "You are a friendly chat bot taking part in a live stream chat.
Keep replies friendly, interesting and brief, preferably under 100 characters.
Avoid complex vocabulary and long sentences.
Do not introduce yourself or explain that you are an AI; reply like a regular viewer.
Do not mention that you can see recent messages, just reply naturally.";

/// Everything a generator gets for one reply
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub message: Message,
    /// Context observed when the message was dispatched
    pub context: Vec<ContextEntry>,
}

/// Produces reply text for a comment
#[async_trait]
pub trait ResponseGenerator: Send + Sync + Debug {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Generate a reply, or fail. Never retried by the caller.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Read a markdown persona file.
///
/// Headings and blank lines are dropped and `- ` list markers removed. A
/// missing, unreadable or empty file yields [`DEFAULT_PERSONA`].
pub async fn load_character(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_PERSONA.to_string();
    };

    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let persona = strip_markdown(&content);
            if persona.is_empty() {
                DEFAULT_PERSONA.to_string()
            } else {
                persona
            }
        }
        Err(e) => {
            tracing::warn!(
                "Could not read character file {}: {}, using default persona",
                path.display(),
                e
            );
            DEFAULT_PERSONA.to_string()
        }
    }
}

fn strip_markdown(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| line.strip_prefix("- ").unwrap_or(line).trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt: persona plus who the bot is and who it answers
pub fn build_system_prompt(persona: &str, bot_nickname: &str, sender: &str) -> String {
    format!(
        "{persona}\nYour username is \"{bot_nickname}\".\n\
         You are replying to the comment from \"{sender}\".\n\
         Keep replies friendly, engaging and concise (under 100 characters when possible)."
    )
}

/// User prompt: recent comments followed by the one to answer
pub fn build_user_prompt(message: &Message, context: &[ContextEntry]) -> String {
    let mut prompt = String::new();
    if !context.is_empty() {
        prompt.push_str("Recent messages:\n");
        for entry in context {
            prompt.push_str(&entry.sender);
            prompt.push_str(": ");
            prompt.push_str(&entry.text);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "Please reply to this comment from {}: \"{}\"",
        message.sender_name, message.text
    ));
    prompt
}

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think block pattern"));

/// Strip reasoning blocks, a leading `<sender>:` and redundant whitespace
pub fn clean_reply(reply: &str, sender: &str) -> String {
    let reply = THINK_BLOCK.replace_all(reply, " ");
    let reply = strip_sender_prefix(&reply, sender);
    reply.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_sender_prefix<'a>(reply: &'a str, sender: &str) -> &'a str {
    if sender.is_empty() {
        return reply;
    }
    reply
        .trim_start()
        .strip_prefix(sender)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')))
        .unwrap_or(reply)
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    bot_nickname: String,
    persona: String,
}

impl OpenAiCompatGenerator {
    pub fn new(model: &ModelConfig, bot: &BotConfig, persona: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: model.api_base.trim_end_matches('/').to_string(),
            api_key: model.api_key.clone(),
            model: model.model.clone(),
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            bot_nickname: bot.nickname.clone(),
            persona,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

#[async_trait]
impl ResponseGenerator for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let sender = &request.message.sender_name;
        let system = build_system_prompt(&self.persona, &self.bot_nickname, sender);
        let user = build_user_prompt(&request.message, &request.context);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::generation_error(self.name(), &self.model, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::generation_msg(
                self.name(),
                &self.model,
                format!("HTTP {}: {}", status, detail.chars().take(200).collect::<String>()),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::generation_error(self.name(), &self.model, e))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let reply = clean_reply(&content, sender);
        if reply.is_empty() {
            return Err(CoreError::generation_msg(
                self.name(),
                &self.model,
                "provider returned an empty reply",
            ));
        }

        tracing::debug!("Generated reply for {}: {}", request.message.id, reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageClass;
    use pretty_assertions::assert_eq;

    fn message(text: &str) -> Message {
        Message {
            id: "1".to_string(),
            sender_name: "Alice".to_string(),
            sender_id: None,
            text: text.to_string(),
            timestamp: 0.0,
            class: MessageClass::User,
            is_self: false,
        }
    }

    #[test]
    fn test_clean_reply() {
        assert_eq!(
            clean_reply("<think>\nhmm, let me see\n</think>\nAlice: hi   there\n", "Alice"),
            "hi there"
        );
        assert_eq!(clean_reply("Alice is here", "Alice"), "Alice is here");
        assert_eq!(clean_reply("  <think>x</think>  ", "Alice"), "");
    }

    #[test]
    fn test_clean_reply_sender_prefix_variants() {
        assert_eq!(clean_reply("小明：你好", "小明"), "你好");
        assert_eq!(clean_reply("a.b(c : ok", "a.b(c"), "ok");
        // Only an exact name is stripped
        assert_eq!(clean_reply("axb(c: ok", "a.b(c"), "axb(c: ok");
        assert_eq!(clean_reply(": hi", ""), ": hi");
    }

    #[test]
    fn test_user_prompt_lists_context() {
        let context = vec![
            ContextEntry {
                sender: "Bob".to_string(),
                text: "first".to_string(),
            },
            ContextEntry {
                sender: "Alice".to_string(),
                text: "hello?".to_string(),
            },
        ];
        let prompt = build_user_prompt(&message("hello?"), &context);
        assert_eq!(
            prompt,
            "Recent messages:\nBob: first\nAlice: hello?\n\n\
             Please reply to this comment from Alice: \"hello?\""
        );
    }

    #[test]
    fn test_user_prompt_without_context() {
        let prompt = build_user_prompt(&message("yo"), &[]);
        assert_eq!(prompt, "Please reply to this comment from Alice: \"yo\"");
    }

    #[test]
    fn test_system_prompt_names_bot_and_sender() {
        let prompt = build_system_prompt("Be nice.", "Helper", "Alice");
        assert!(prompt.starts_with("Be nice.\n"));
        assert!(prompt.contains("\"Helper\""));
        assert!(prompt.contains("\"Alice\""));
    }

    #[tokio::test]
    async fn test_character_file_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("character.md");
        std::fs::write(&path, "# Persona\n\n- Cheerful\n- Short replies\nLikes cats\n").unwrap();

        let persona = load_character(Some(&path)).await;
        assert_eq!(persona, "Cheerful\nShort replies\nLikes cats");
    }

    #[tokio::test]
    async fn test_missing_character_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let persona = load_character(Some(&dir.path().join("missing.md"))).await;
        assert_eq!(persona, DEFAULT_PERSONA);
        assert_eq!(load_character(None).await, DEFAULT_PERSONA);
    }
}
