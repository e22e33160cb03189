//! Use cases composing the services into a full request/response cycle.
//!
//! - [`direct_review::DirectReview`]: one-shot review, optionally search-augmented.
//! - [`identify_key_facts::IdentifyKeyFacts`]: extract key components and technical routes.
//! - [`orchestrate::OrchestrateReview`]: picks and chains the two above.

pub mod direct_review;
pub mod identify_key_facts;
pub mod orchestrate;

use crate::{
    base::{
        text::join_sections,
        types::{Attachment, AttachmentSource, HistoryEntry, MessageContent, ReviewRequest, RichMessage, RichPart},
    },
    service::provider::data_url,
};

/// Markers of a previously generated review report.
const REPORT_MARKERS: &[&str] = &["## 元信息", "## 本轮修订摘要", "## 评审报告", "【评审报告】", "## metadata", "## revision summary", "## review report"];

/// Turn an attachment into a message part.
///
/// Files on disk stay references until the vision provider inlines them;
/// in-memory bytes are inlined right away.
pub fn attachment_part(attachment: &Attachment) -> RichPart {
    match &attachment.source {
        AttachmentSource::Path(path) => RichPart::ImagePath {
            path: path.clone(),
            mime: attachment.mime.clone(),
        },
        AttachmentSource::Bytes(bytes) => {
            let mime = attachment.mime.as_deref().filter(|m| !m.trim().is_empty()).unwrap_or("application/octet-stream");
            RichPart::image_url(data_url(mime, bytes))
        }
    }
}

/// The current user turn: a text part with the given section headings, then one part per attachment.
///
/// The text part is left out when every section is empty.
pub fn user_turn(headings: [&str; 3], request: &ReviewRequest) -> RichMessage {
    let text = join_sections(&[(headings[0], &request.requirements), (headings[1], &request.specs), (headings[2], &request.dialog)]);

    let mut parts = Vec::with_capacity(request.files.len() + 1);
    if !text.trim().is_empty() {
        parts.push(RichPart::text(text));
    }
    parts.extend(request.files.iter().map(attachment_part));

    RichMessage::user(MessageContent::Parts(parts))
}

/// Whether `history` already contains a review, i.e. this is a revision round.
pub fn is_revision(history: &[HistoryEntry]) -> bool {
    history.iter().flat_map(HistoryEntry::to_messages).any(|m| {
        let text = m.content.plain_text();

        (m.role == "assistant" && !text.trim().is_empty()) || REPORT_MARKERS.iter().any(|marker| text.to_lowercase().contains(&marker.to_lowercase()))
    })
}

/// Non-empty requirements, specs and dialog joined by newlines.
pub fn submission_text(request: &ReviewRequest) -> String {
    [&request.requirements, &request.specs, &request.dialog]
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_user_turn() {
        let request = ReviewRequest {
            requirements: "12V in".to_string(),
            dialog: "check the LDO".to_string(),
            files: vec![
                Attachment {
                    name: "a.png".to_string(),
                    mime: Some("image/png".to_string()),
                    source: AttachmentSource::Path(PathBuf::from("/tmp/a.png")),
                },
                Attachment {
                    name: "b".to_string(),
                    mime: None,
                    source: AttachmentSource::Bytes(vec![0xff]),
                },
            ],
            ..Default::default()
        };

        let message = user_turn(["Design requirements:", "Design specs:", "User dialog:"], &request);

        assert_eq!(message.role, "user");
        assert_eq!(
            message.content,
            MessageContent::Parts(vec![
                RichPart::text("Design requirements:\n12V in\n\nUser dialog:\ncheck the LDO"),
                RichPart::ImagePath {
                    path: PathBuf::from("/tmp/a.png"),
                    mime: Some("image/png".to_string()),
                },
                RichPart::image_url("data:application/octet-stream;base64,/w=="),
            ])
        );
    }

    #[test]
    fn test_user_turn_without_text() {
        let request = ReviewRequest {
            files: vec![Attachment {
                name: "a.png".to_string(),
                mime: Some("image/png".to_string()),
                source: AttachmentSource::Bytes(vec![0x01]),
            }],
            ..Default::default()
        };

        let message = user_turn(["Design requirements:", "Design specs:", "User dialog:"], &request);

        assert_eq!(message.content, MessageContent::Parts(vec![RichPart::image_url("data:image/png;base64,AQ==")]));
    }

    #[test]
    fn test_is_revision() {
        let first: Vec<HistoryEntry> = serde_json::from_value(json!([{ "role": "user", "content": "hello" }])).unwrap();
        let answered: Vec<HistoryEntry> = serde_json::from_value(json!([{ "role": "assistant", "content": "report" }])).unwrap();
        let marked: Vec<HistoryEntry> = serde_json::from_value(json!([{ "role": "user", "content": "## Review Report\n..." }])).unwrap();
        let blank: Vec<HistoryEntry> = serde_json::from_value(json!([{ "role": "assistant", "content": "  " }])).unwrap();

        assert!(!is_revision(&[]));
        assert!(!is_revision(&first));
        assert!(is_revision(&answered));
        assert!(is_revision(&marked));
        assert!(!is_revision(&blank));
    }

    #[test]
    fn test_submission_text() {
        let request = ReviewRequest {
            requirements: " a ".to_string(),
            specs: "".to_string(),
            dialog: "c".to_string(),
            ..Default::default()
        };

        assert_eq!(submission_text(&request), "a\nc");
    }
}
