//! Identify key components and technical routes of a submission.
//!
//! The result seeds the web search query of an orchestrated review.

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::{
    base::{
        prompts::{PromptLoader, identify_fallback},
        text::{extract_json_object, snippet},
        types::{ArtifactRef, IdentifyReport, KeyFacts, Origin, Res, ReviewRequest, RichMessage, TimelineItem, Upstream},
    },
    service::{anonymize::Anonymizer, provider::VisionProvider, storage::artifact::ArtifactStore, timeline::TimelineService},
};

use super::user_turn;

/// Identify use case.
#[derive(Clone)]
pub struct IdentifyKeyFacts {
    vision: VisionProvider,
    prompts: PromptLoader,
    artifacts: ArtifactStore,
    timeline: TimelineService,
    anonymizer: Option<Anonymizer>,
}

impl IdentifyKeyFacts {
    pub fn new(vision: VisionProvider, prompts: PromptLoader, artifacts: ArtifactStore, timeline: TimelineService, anonymizer: Option<Anonymizer>) -> Self {
        Self {
            vision,
            prompts,
            artifacts,
            timeline,
            anonymizer,
        }
    }

    #[instrument(name = "IdentifyKeyFacts::execute", skip_all)]
    pub async fn execute(&self, upstream: &Upstream, request: &ReviewRequest) -> Res<IdentifyReport> {
        let progress_id = request.options.progress_id.as_deref();
        let mut report = IdentifyReport::default();

        let system = match self.prompts.pass_prompt("identify").await {
            Ok(p) => p,
            Err(err) => {
                debug!("Using built-in identify prompt: {err}");
                identify_fallback(request.language).to_string()
            }
        };

        let mut messages = vec![RichMessage::system(system), user_turn(["Requirements:", "Specs:", "Dialog:"], request)];

        if let Some(anonymizer) = &self.anonymizer {
            anonymizer.scrub_messages(&mut messages);
        }

        // Request.

        let body = VisionProvider::build_body(&upstream.model, &messages)?;
        let request_artifact = self.save(serde_json::to_string_pretty(&body)?, "identify_request", ".json").await;

        let item = TimelineItem::new("identify.request", json!({ "apiUrl": upstream.api_url, "model": upstream.model, "messageCount": messages.len() }))
            .origin(Origin::Backend)
            .category("llm")
            .with_artifact("request", request_artifact);
        self.record(progress_id, item, &mut report.timeline).await;

        // Response.

        let output = self.vision.chat_rich(upstream, &messages).await?;
        let response_artifact = self.save(output.raw.clone(), "identify_response", ".json").await;

        let item = TimelineItem::new("identify.response", json!({ "snippet": snippet(&output.text, 500) }))
            .origin(Origin::Backend)
            .category("llm")
            .with_artifact("response", response_artifact);
        self.record(progress_id, item, &mut report.timeline).await;

        // Parse.

        match extract_json_object(&output.text) {
            Some(value) => report.facts = key_facts_from(&value),
            None => {
                warn!("Identify reply is not JSON");

                let artifact = self.save(output.text.clone(), "identify_parse_failure", ".txt").await;
                let item = TimelineItem::new("identify.parse.failure.saved", json!({ "snippet": snippet(&output.text, 500) }))
                    .origin(Origin::Backend)
                    .category("llm")
                    .with_artifact("failure", artifact);
                self.record(progress_id, item, &mut report.timeline).await;
            }
        }

        Ok(report)
    }

    async fn record(&self, progress_id: Option<&str>, item: TimelineItem, timeline: &mut Vec<TimelineItem>) {
        self.timeline.push(progress_id, &item).await;
        timeline.push(item);
    }

    async fn save(&self, content: String, hint: &str, ext: &str) -> Option<ArtifactRef> {
        self.artifacts
            .save(content, hint, Some(ext))
            .await
            .inspect_err(|err| warn!("Failed to save `{hint}` artifact: {err}"))
            .ok()
    }
}

/// Read both lists leniently: strings are kept, objects contribute their `name`.
fn key_facts_from(value: &Value) -> KeyFacts {
    KeyFacts {
        key_components: string_list(value.get("keyComponents")),
        key_tech_routes: string_list(value.get("keyTechRoutes")),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(|s| s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{
            config::{Config, ConfigInner},
            types::Language,
        },
        service::{
            llm::{ChatCall, ChatOutput, GenericLlmClient, LlmClient},
            progress::ProgressStore,
        },
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct CannedLlm {
        reply: String,
        bodies: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl GenericLlmClient for CannedLlm {
        async fn chat(&self, call: &ChatCall) -> Res<ChatOutput> {
            self.bodies.lock().push(call.body.clone());
            Ok(ChatOutput {
                text: self.reply.clone(),
                raw: "{}".to_string(),
            })
        }
    }

    fn setup(dir: &std::path::Path, reply: &str) -> (IdentifyKeyFacts, Arc<CannedLlm>) {
        let config = Config::from(ConfigInner {
            storage_root: dir.join("storage").to_string_lossy().to_string(),
            prompt_root: dir.join("prompts").to_string_lossy().to_string(),
            ..Default::default()
        });

        let llm = Arc::new(CannedLlm {
            reply: reply.to_string(),
            bodies: Mutex::new(Vec::new()),
        });

        let identify = IdentifyKeyFacts::new(
            VisionProvider::new(LlmClient::new(llm.clone()), &config),
            PromptLoader::from_config(&config),
            ArtifactStore::from_config(&config),
            TimelineService::from_config(&config, ProgressStore::memory()),
            None,
        );

        (identify, llm)
    }

    fn upstream() -> Upstream {
        Upstream {
            api_url: String::new(),
            model: "m".to_string(),
            auth_header: None,
        }
    }

    #[tokio::test]
    async fn test_identify_parses_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (identify, llm) = setup(dir.path(), "```json\n{\"keyComponents\":[\"TPS54331\",{\"name\":\"LM358\"}],\"keyTechRoutes\":[\"buck\", \"\"]}\n```");

        let request = ReviewRequest {
            requirements: "24V to 5V".to_string(),
            language: Language::En,
            ..Default::default()
        };

        let report = identify.execute(&upstream(), &request).await.unwrap();

        assert_eq!(report.facts.key_components, vec!["TPS54331", "LM358"]);
        assert_eq!(report.facts.key_tech_routes, vec!["buck"]);
        assert_eq!(report.timeline.iter().map(|t| t.step.as_str()).collect::<Vec<_>>(), vec!["identify.request", "identify.response"]);

        let bodies = llm.bodies.lock();
        assert!(bodies[0]["messages"][0]["content"].as_str().unwrap().starts_with("Identify key components"));
        assert_eq!(bodies[0]["messages"][1]["content"][0]["text"], "Requirements:\n24V to 5V");
    }

    #[tokio::test]
    async fn test_identify_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (identify, _) = setup(dir.path(), "I could not find anything.");

        let report = identify.execute(&upstream(), &ReviewRequest::default()).await.unwrap();

        assert_eq!(report.facts, KeyFacts::default());
        let last = report.timeline.last().unwrap();
        assert_eq!(last.step, "identify.parse.failure.saved");
        assert!(last.artifacts.contains_key("failure"));
    }

    #[tokio::test]
    async fn test_identify_uses_prompt_file() {
        let dir = tempfile::tempdir().unwrap();
        let agent = dir.path().join("prompts").join("circuit-agent");
        std::fs::create_dir_all(&agent).unwrap();
        std::fs::write(agent.join("identify_prompt.md"), "Custom identify prompt.").unwrap();

        let (identify, llm) = setup(dir.path(), "{}");

        identify.execute(&upstream(), &ReviewRequest::default()).await.unwrap();

        assert_eq!(llm.bodies.lock()[0]["messages"][0]["content"], "Custom identify prompt.");
    }
}
