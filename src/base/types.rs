//! Shared result aliases and domain types.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Language.

/// Output language of a review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }

    /// Human name used inside prompt templates.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Zh => "Chinese",
            Language::En => "English",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Err;

    fn from_str(s: &str) -> Res<Self> {
        match s.trim() {
            "zh" => Ok(Language::Zh),
            "en" => Ok(Language::En),
            other => Err(anyhow::anyhow!("unsupported language `{other}`")),
        }
    }
}

// Attachments.

/// Where the bytes of an attachment live.
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    /// A file on local disk (an upload streamed to temporary storage).
    Path(PathBuf),
    /// Bytes already held in memory.
    Bytes(Vec<u8>),
}

/// A user-supplied file (image or PDF) attached to a review.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime: Option<String>,
    pub source: AttachmentSource,
}

// Messages.

/// One part of a multi-part chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    /// A reference to a local file; it is inlined before the message leaves the service.
    ///
    /// Only built from uploads, never parsed from client JSON.
    #[serde(skip_deserializing)]
    ImagePath { path: PathBuf, mime: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl RichPart {
    pub fn text(text: impl Into<String>) -> Self {
        RichPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        RichPart::ImageUrl { image_url: ImageUrl { url: url.into() } }
    }
}

/// Message content: a bare string or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<RichPart>),
}

impl MessageContent {
    /// Concatenated text of every text part.
    pub fn plain_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    RichPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A chat message that may carry images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichMessage {
    pub role: String,
    pub content: MessageContent,
}

impl RichMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(content: MessageContent) -> Self {
        Self { role: "user".to_string(), content }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }
}

/// A prior conversation turn supplied by the client.
///
/// Either a plain `{role, content}` message or a review round
/// `{modelMarkdown, dialog}` as stored by the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Message {
        role: String,
        content: Value,
    },
    Round {
        #[serde(rename = "modelMarkdown", default)]
        model_markdown: String,
        #[serde(default)]
        dialog: String,
    },
}

impl HistoryEntry {
    /// Convert into chat messages, in conversation order.
    pub fn to_messages(&self) -> Vec<RichMessage> {
        match self {
            HistoryEntry::Message { role, content } => {
                let content = match content {
                    Value::String(s) => MessageContent::Text(s.clone()),
                    Value::Null => return Vec::new(),
                    other => serde_json::from_value::<Vec<RichPart>>(other.clone())
                        .map(MessageContent::Parts)
                        .unwrap_or_else(|_| MessageContent::Text(other.to_string())),
                };

                vec![RichMessage { role: role.clone(), content }]
            }
            HistoryEntry::Round { model_markdown, dialog } => {
                let mut out = Vec::new();

                if !model_markdown.trim().is_empty() {
                    out.push(RichMessage::assistant(model_markdown.clone()));
                }

                if !dialog.trim().is_empty() {
                    out.push(RichMessage::user(MessageContent::Text(dialog.clone())));
                }

                out
            }
        }
    }
}

// Requests.

/// Tuning knobs of a single review.
#[derive(Debug, Clone, Default)]
pub struct ReviewOptions {
    pub progress_id: Option<String>,
    pub enable_search: bool,
    pub search_top_n: Option<usize>,
    /// Explicit search query; derived from the submission when absent.
    pub search_query: Option<String>,
    /// Overrides the configured search model.
    pub search_model: Option<String>,
}

/// Everything the user submitted for one review.
#[derive(Debug, Clone, Default)]
pub struct ReviewRequest {
    pub files: Vec<Attachment>,
    pub system_prompt: String,
    pub extra_systems: Vec<String>,
    pub requirements: String,
    pub specs: String,
    pub dialog: String,
    pub history: Vec<HistoryEntry>,
    pub language: Language,
    pub options: ReviewOptions,
}

/// Upstream endpoint, model and credentials for a call.
#[derive(Clone, Default)]
pub struct Upstream {
    pub api_url: String,
    pub model: String,
    /// Raw `Authorization` header forwarded from the client.
    pub auth_header: Option<String>,
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("auth_header", &self.auth_header.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// Timeline.

/// Who produced a timeline event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[default]
    Agent,
    External,
    Frontend,
    Backend,
}

/// Public reference to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub url: String,
    pub filename: String,
}

/// One processing step of a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub step: String,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    pub origin: Origin,
    pub category: String,
    #[serde(default)]
    pub meta: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, ArtifactRef>,
}

impl TimelineItem {
    pub fn with_artifact(mut self, name: &str, artifact: Option<ArtifactRef>) -> Self {
        if let Some(artifact) = artifact {
            self.artifacts.insert(name.to_string(), artifact);
        }
        self
    }
}

// Results.

/// A web search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

/// Components and technical routes extracted from a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFacts {
    #[serde(default)]
    pub key_components: Vec<String>,
    #[serde(default)]
    pub key_tech_routes: Vec<String>,
}

/// Result of the identify step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentifyReport {
    #[serde(flatten)]
    pub facts: KeyFacts,
    pub timeline: Vec<TimelineItem>,
}

/// Result of a review.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    pub markdown: String,
    pub timeline: Vec<TimelineItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_summaries: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<SearchHit>,
}

// Tests.
