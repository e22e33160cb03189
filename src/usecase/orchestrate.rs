//! Orchestrated review.
//!
//! The reviewer system prompt is picked for the round (initial or revision),
//! an optional identify pass focuses the web search, and a direct review runs.

use tracing::{info, instrument, warn};

use crate::base::{
    prompts::{PromptLoadError, PromptLoader, SystemVariant},
    text::snippet,
    types::{Err, Language, ReviewReport, ReviewRequest, Upstream},
};

use super::{direct_review::DirectReview, identify_key_facts::IdentifyKeyFacts, is_revision, submission_text};

const MAX_QUERY_CHARS: usize = 2000;

/// Input of an orchestrated review.
#[derive(Debug, Clone, Default)]
pub struct OrchestrateInput {
    pub upstream: Upstream,
    pub request: ReviewRequest,
    /// Model used for the web search pass.
    pub aux_model: Option<String>,
}

/// Failure of an orchestrated review.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    #[error("Failed to load system prompt")]
    PromptUnavailable(#[source] PromptLoadError),
    #[error(transparent)]
    Failed(#[from] Err),
}

/// Orchestrate use case.
#[derive(Clone)]
pub struct OrchestrateReview {
    direct: DirectReview,
    identify: IdentifyKeyFacts,
    prompts: PromptLoader,
}

impl OrchestrateReview {
    pub fn new(direct: DirectReview, identify: IdentifyKeyFacts, prompts: PromptLoader) -> Self {
        Self { direct, identify, prompts }
    }

    #[instrument(name = "OrchestrateReview::execute", skip_all)]
    pub async fn execute(&self, input: OrchestrateInput) -> Result<ReviewReport, OrchestrateError> {
        let OrchestrateInput { upstream, mut request, aux_model } = input;

        let variant = if is_revision(&request.history) { SystemVariant::Revision } else { SystemVariant::Initial };
        info!("Orchestrating {variant:?} review");

        let system = self.prompts.system_prompt(request.language, Some(variant)).await.map_err(OrchestrateError::PromptUnavailable)?;

        // A client-supplied prompt is kept as an addendum to the reviewer persona.
        let client_prompt = std::mem::replace(&mut request.system_prompt, system);
        if !client_prompt.trim().is_empty() && client_prompt.trim() != request.system_prompt {
            request.extra_systems.insert(0, client_prompt);
        }

        let mut identify_timeline = Vec::new();

        if request.options.enable_search {
            let keywords = match self.identify.execute(&upstream, &request).await {
                Ok(report) => {
                    identify_timeline = report.timeline;
                    dedupe_keywords(report.facts.key_components.into_iter().chain(report.facts.key_tech_routes))
                }
                Err(err) => {
                    warn!("Identify step failed, searching on the raw submission: {err}");
                    Vec::new()
                }
            };

            if request.options.search_query.as_deref().is_none_or(|q| q.trim().is_empty()) {
                request.options.search_query = Some(search_query(&keywords, &request));
            }

            if let Some(model) = aux_model.filter(|m| !m.trim().is_empty()) {
                request.options.search_model = Some(model);
            }
        }

        let mut report = self.direct.execute(&upstream, &request).await?;

        identify_timeline.append(&mut report.timeline);
        report.timeline = identify_timeline;

        Ok(report)
    }
}

/// Case-insensitive de-duplication that keeps the first spelling.
pub fn dedupe_keywords(keywords: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();

    keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect()
}

/// Query focused on the keywords, or the raw submission when there are none.
pub fn search_query(keywords: &[String], request: &ReviewRequest) -> String {
    if keywords.is_empty() {
        return snippet(&submission_text(request), MAX_QUERY_CHARS);
    }

    match request.language {
        Language::Zh => format!("围绕以下关键点检索并整合：{}", keywords.join("、")),
        Language::En => format!("Search and consolidate around: {}", keywords.join(", ")),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{
            config::{Config, ConfigInner},
            types::{HistoryEntry, Language, ReviewOptions, SearchHit},
        },
        service::{
            llm::{ChatCall, ChatOutput, GenericLlmClient, LlmClient},
            progress::ProgressStore,
            provider::VisionProvider,
            search::{GenericSearchProvider, SearchClient, SearchContext},
            storage::artifact::ArtifactStore,
            timeline::TimelineService,
        },
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    use crate::base::types::Res;

    /// Replies with identify JSON to identify prompts and with a report otherwise.
    #[derive(Default)]
    struct ScriptedLlm {
        systems: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenericLlmClient for ScriptedLlm {
        async fn chat(&self, call: &ChatCall) -> Res<ChatOutput> {
            let system = call.body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
            self.systems.lock().push(system.clone());

            let text = if system.contains("keyComponents") {
                r#"{"keyComponents":["LDO","ldo","MCU"],"keyTechRoutes":["I2C"]}"#.to_string()
            } else {
                "## Review report".to_string()
            };

            Ok(ChatOutput { text, raw: "{}".to_string() })
        }
    }

    #[derive(Default)]
    struct QueryCapture {
        queries: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl GenericSearchProvider for QueryCapture {
        async fn search(&self, ctx: &SearchContext, query: &str, _top_n: usize) -> Res<Vec<SearchHit>> {
            self.queries.lock().push((query.to_string(), ctx.model_override.clone()));
            Ok(Vec::new())
        }

        async fn summarize_url(&self, _ctx: &SearchContext, _url: &str, _limit: usize, _lang: Language) -> Res<String> {
            Ok(String::new())
        }
    }

    fn setup(dir: &std::path::Path) -> (OrchestrateReview, Arc<ScriptedLlm>, Arc<QueryCapture>) {
        let agent = dir.join("prompts").join("circuit-agent");
        std::fs::create_dir_all(&agent).unwrap();
        std::fs::write(agent.join("system_prompt_initial_en.md"), "INITIAL").unwrap();
        std::fs::write(agent.join("system_prompt_revision_en.md"), "REVISION").unwrap();

        let config = Config::from(ConfigInner {
            storage_root: dir.join("storage").to_string_lossy().to_string(),
            prompt_root: dir.join("prompts").to_string_lossy().to_string(),
            ..Default::default()
        });

        let llm = Arc::new(ScriptedLlm::default());
        let search = Arc::new(QueryCapture::default());
        let vision = VisionProvider::new(LlmClient::new(llm.clone()), &config);
        let prompts = PromptLoader::from_config(&config);
        let artifacts = ArtifactStore::from_config(&config);
        let timeline = TimelineService::from_config(&config, ProgressStore::memory());

        let direct = DirectReview::new(vision.clone(), Some(SearchClient::new(search.clone())), artifacts.clone(), timeline.clone(), None);
        let identify = IdentifyKeyFacts::new(vision, prompts.clone(), artifacts, timeline, None);

        (OrchestrateReview::new(direct, identify, prompts), llm, search)
    }

    fn input() -> OrchestrateInput {
        OrchestrateInput {
            upstream: Upstream {
                model: "m".to_string(),
                ..Default::default()
            },
            request: ReviewRequest {
                requirements: "sensor node".to_string(),
                language: Language::En,
                ..Default::default()
            },
            aux_model: None,
        }
    }

    #[test]
    fn test_dedupe_keywords() {
        let keywords = dedupe_keywords(["LDO", " ldo ", "", "MCU"].map(String::from));

        assert_eq!(keywords, vec!["LDO", "MCU"]);
    }

    #[test]
    fn test_search_query() {
        let mut request = ReviewRequest {
            requirements: "x".repeat(3000),
            ..Default::default()
        };

        assert_eq!(search_query(&[], &request).chars().count(), 2000);
        assert_eq!(search_query(&["A".to_string(), "B".to_string()], &request), "围绕以下关键点检索并整合：A、B");

        request.language = Language::En;
        assert_eq!(search_query(&["A".to_string(), "B".to_string()], &request), "Search and consolidate around: A, B");
    }

    #[tokio::test]
    async fn test_initial_review_without_search() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrate, llm, search) = setup(dir.path());

        let report = orchestrate.execute(input()).await.unwrap();

        assert_eq!(report.markdown, "## Review report");
        assert_eq!(llm.systems.lock().as_slice(), ["INITIAL".to_string()]);
        assert!(search.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_revision_review_with_search() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrate, llm, search) = setup(dir.path());

        let mut input = input();
        input.aux_model = Some("openai/gpt-4o".to_string());
        input.request.system_prompt = "Focus on EMC.".to_string();
        input.request.history = vec![HistoryEntry::Round {
            model_markdown: "## Review report\nold".to_string(),
            dialog: "updated".to_string(),
        }];
        input.request.options = ReviewOptions {
            enable_search: true,
            ..Default::default()
        };

        let report = orchestrate.execute(input).await.unwrap();

        let steps: Vec<_> = report.timeline.iter().map(|t| t.step.as_str()).collect();
        assert_eq!(steps, vec!["identify.request", "identify.response", "llm.request", "llm.response"]);

        let queries = search.queries.lock();
        assert_eq!(queries[0], ("Search and consolidate around: LDO, MCU, I2C".to_string(), Some("openai/gpt-4o".to_string())));

        let systems = llm.systems.lock();
        assert_eq!(systems.last().unwrap(), "REVISION");
    }

    #[tokio::test]
    async fn test_search_model_defaults_to_review_model() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrate, _, search) = setup(dir.path());

        let mut input = input();
        input.request.options.enable_search = true;

        orchestrate.execute(input).await.unwrap();

        let queries = search.queries.lock();
        assert_eq!(queries[0].1.as_deref(), Some("m"));
    }

    #[tokio::test]
    async fn test_missing_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrate, _, _) = setup(dir.path());

        let mut input = input();
        input.request.language = Language::Zh;

        let err = orchestrate.execute(input).await.unwrap_err();

        assert!(matches!(err, OrchestrateError::PromptUnavailable(PromptLoadError::NotFound { .. })));
    }
}
