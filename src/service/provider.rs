//! Text and vision providers.
//!
//! Both build an OpenAI-compatible request body and delegate the transport to
//! the [`LlmClient`]. The vision provider also turns local file references
//! into inline `data:` URLs, since upstream endpoints cannot read our disk.

use std::{path::Path, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value, json};
use tracing::{instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{MessageContent, Res, RichMessage, RichPart, Upstream},
    },
    service::llm::{ChatCall, ChatOutput, LlmClient},
};

/// Headers forwarded upstream for a call.
pub fn upstream_headers(upstream: &Upstream) -> Vec<(String, String)> {
    upstream
        .auth_header
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| ("Authorization".to_string(), v.clone()))
        .collect()
}

/// Encode bytes as a `data:` URL.
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Best mime type for a file, preferring the declared one.
pub fn mime_for(path: &Path, declared: Option<&str>) -> String {
    match declared {
        Some(m) if !m.trim().is_empty() => m.to_string(),
        _ => mime_guess::from_path(path).first_or_octet_stream().to_string(),
    }
}

// Text.

/// A text-only chat request.
#[derive(Debug, Clone, Default)]
pub struct TextChat {
    pub upstream: Upstream,
    /// System prompt; omitted from the body when empty.
    pub system: String,
    pub messages: Vec<RichMessage>,
    /// OpenRouter plugins (e.g., web search).
    pub plugins: Option<Value>,
    /// Extra top-level body fields; they win over the generated ones.
    pub extra: Map<String, Value>,
}

/// Provider for text-only chat calls.
#[derive(Clone)]
pub struct TextProvider {
    llm: LlmClient,
    timeout: Duration,
}

impl TextProvider {
    pub fn new(llm: LlmClient, config: &Config) -> Self {
        Self {
            llm,
            timeout: Duration::from_millis(config.llm_timeout_ms),
        }
    }

    /// Build the request body for a text chat.
    pub fn build_body(chat: &TextChat) -> Res<Value> {
        let mut messages = Vec::with_capacity(chat.messages.len() + 1);

        if !chat.system.trim().is_empty() {
            messages.push(serde_json::to_value(RichMessage::system(chat.system.clone()))?);
        }

        for message in &chat.messages {
            messages.push(serde_json::to_value(message)?);
        }

        let mut body = json!({
            "model": chat.upstream.model,
            "messages": messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(plugins) = &chat.plugins {
                obj.insert("plugins".to_string(), plugins.clone());
            }

            for (k, v) in &chat.extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        Ok(body)
    }

    #[instrument(name = "TextProvider::chat", skip_all)]
    pub async fn chat(&self, chat: &TextChat) -> Res<ChatOutput> {
        let call = ChatCall {
            api_url: chat.upstream.api_url.clone(),
            body: Self::build_body(chat)?,
            headers: upstream_headers(&chat.upstream),
            timeout: self.timeout,
        };

        self.llm.chat(&call).await
    }
}

// Vision.

/// Provider for chat calls carrying images or PDFs.
#[derive(Clone)]
pub struct VisionProvider {
    llm: LlmClient,
    timeout: Duration,
}

impl VisionProvider {
    pub fn new(llm: LlmClient, config: &Config) -> Self {
        Self {
            llm,
            timeout: Duration::from_millis(config.vision_timeout_ms),
        }
    }

    /// Request body with local references left in place (what gets persisted).
    pub fn build_body(model: &str, messages: &[RichMessage]) -> Res<Value> {
        Ok(json!({
            "model": model,
            "messages": serde_json::to_value(messages)?,
            "stream": false,
        }))
    }

    /// Replace every `image_path` part with an inline `image_url` part.
    ///
    /// Files that cannot be read are dropped with a warning.
    pub async fn inline_messages(messages: &[RichMessage]) -> Vec<RichMessage> {
        let mut out = Vec::with_capacity(messages.len());

        for message in messages {
            let content = match &message.content {
                MessageContent::Text(_) => message.content.clone(),
                MessageContent::Parts(parts) => {
                    let mut inlined = Vec::with_capacity(parts.len());

                    for part in parts {
                        match part {
                            RichPart::ImagePath { path, mime } => match tokio::fs::read(path).await {
                                Ok(bytes) => inlined.push(RichPart::image_url(data_url(&mime_for(path, mime.as_deref()), &bytes))),
                                Err(err) => warn!("Skipping unreadable attachment `{}`: {err}", path.display()),
                            },
                            other => inlined.push(other.clone()),
                        }
                    }

                    MessageContent::Parts(inlined)
                }
            };

            out.push(RichMessage {
                role: message.role.clone(),
                content,
            });
        }

        out
    }

    #[instrument(name = "VisionProvider::chat_rich", skip_all)]
    pub async fn chat_rich(&self, upstream: &Upstream, messages: &[RichMessage]) -> Res<ChatOutput> {
        let inlined = Self::inline_messages(messages).await;

        let call = ChatCall {
            api_url: upstream.api_url.clone(),
            body: Self::build_body(&upstream.model, &inlined)?,
            headers: upstream_headers(upstream),
            timeout: self.timeout,
        };

        self.llm.chat(&call).await
    }
}

// Tests.
