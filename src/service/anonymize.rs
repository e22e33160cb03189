//! Optional scrubbing of personal data from outgoing text.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::base::types::{MessageContent, RichMessage, RichPart};

// Statics.

static EMAIL: OnceLock<Regex> = OnceLock::new();
static PHONE: OnceLock<Regex> = OnceLock::new();

fn email() -> &'static Regex {
    EMAIL.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static regex"))
}

fn phone() -> &'static Regex {
    PHONE.get_or_init(|| Regex::new(r"\+?\d{1,3}[-.\s]?\(?\d{2,4}\)?[-.\s]?\d{3,4}[-.\s]?\d{3,4}").expect("static regex"))
}

/// Redacts e-mail addresses, phone numbers and configured words.
#[derive(Debug, Clone, Default)]
pub struct Anonymizer {
    words: Option<Regex>,
}

impl Anonymizer {
    pub fn new(sensitive_words: &[String]) -> Self {
        let alternatives: Vec<String> = sensitive_words.iter().map(|w| w.trim()).filter(|w| !w.is_empty()).map(regex::escape).collect();

        if alternatives.is_empty() {
            return Self::default();
        }

        let words = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).case_insensitive(true).build();

        match words {
            Ok(words) => Self { words: Some(words) },
            Err(err) => {
                warn!("Ignoring sensitive word list: {err}");
                Self::default()
            }
        }
    }

    pub fn scrub(&self, text: &str) -> String {
        let text = email().replace_all(text, "[REDACTED_EMAIL]");
        let text = phone().replace_all(&text, "[REDACTED_PHONE]");

        match &self.words {
            Some(words) => words.replace_all(&text, "[REDACTED]").into_owned(),
            None => text.into_owned(),
        }
    }

    /// Scrub every text part in place; images are left alone.
    pub fn scrub_messages(&self, messages: &mut [RichMessage]) {
        for message in messages {
            match &mut message.content {
                MessageContent::Text(text) => *text = self.scrub(text),
                MessageContent::Parts(parts) => {
                    for part in parts {
                        if let RichPart::Text { text } = part {
                            *text = self.scrub(text);
                        }
                    }
                }
            }
        }
    }
}

// Tests.
