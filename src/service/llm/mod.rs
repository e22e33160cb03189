pub mod openrouter;

use std::{ops::Deref, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;

use crate::base::types::Res;

// Structs.

/// A single chat-completions call.
///
/// Deliberately not `Debug`: `headers` usually carries credentials.
#[derive(Clone)]
pub struct ChatCall {
    /// Endpoint; empty means the configured default.
    pub api_url: String,
    /// The full JSON request body.
    pub body: Value,
    /// Extra request headers (e.g., `Authorization`).
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// Reply of a chat-completions call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutput {
    /// Assistant text extracted from the envelope.
    pub text: String,
    /// The raw response body.
    pub raw: String,
}

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// Implementations post an OpenAI-compatible request body and hand back both
/// the extracted assistant text and the raw envelope, so callers can persist
/// the exact upstream reply.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Execute one chat call.
    async fn chat(&self, call: &ChatCall) -> Res<ChatOutput>;
}

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}

// Helpers.

/// Pull the assistant text out of an OpenAI-compatible response body.
///
/// Tries `choices[0].message.content` (string or list of text parts), then
/// `choices[0].text`, then a bare JSON string; otherwise returns the body as is.
pub fn extract_text_from_openai_compat(raw: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };

    match value.pointer("/choices/0/message/content") {
        Some(Value::String(s)) => return s.clone(),
        Some(Value::Array(parts)) => {
            let text = parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect::<Vec<_>>().join("");

            if !text.is_empty() {
                return text;
            }
        }
        _ => {}
    }

    if let Some(text) = value.pointer("/choices/0/text").and_then(Value::as_str) {
        return text.to_string();
    }

    match value {
        Value::String(s) => s,
        _ => raw.to_string(),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message_content() {
        let raw = r###"{"choices":[{"message":{"role":"assistant","content":"## Review"}}]}"###;

        assert_eq!(extract_text_from_openai_compat(raw), "## Review");
    }

    #[test]
    fn test_extract_content_parts() {
        let raw = r#"{"choices":[{"message":{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}}]}"#;

        assert_eq!(extract_text_from_openai_compat(raw), "ab");
    }

    #[test]
    fn test_extract_legacy_text() {
        let raw = r#"{"choices":[{"text":"legacy"}]}"#;

        assert_eq!(extract_text_from_openai_compat(raw), "legacy");
    }

    #[test]
    fn test_extract_fallbacks() {
        assert_eq!(extract_text_from_openai_compat(r#""just a string""#), "just a string");
        assert_eq!(extract_text_from_openai_compat("plain text"), "plain text");
        assert_eq!(extract_text_from_openai_compat(r#"{"error":"x"}"#), r#"{"error":"x"}"#);
    }
}
