//! Direct review: build the conversation, optionally augment it with web
//! search results, call the vision model and persist everything.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        text::snippet,
        types::{ArtifactRef, Origin, Res, ReviewReport, ReviewRequest, RichMessage, SearchHit, TimelineItem, Upstream},
    },
    service::{
        anonymize::Anonymizer,
        provider::VisionProvider,
        search::{SearchClient, SearchContext, SearchTrace, SearchTraceEvent},
        storage::artifact::ArtifactStore,
        timeline::TimelineService,
    },
};

use super::{submission_text, user_turn};

const DEFAULT_TOP_N: usize = 5;
const SUMMARY_WORD_LIMIT: usize = 1024;
const MIN_SUMMARY_CHARS: usize = 50;
const TRACE_SNIPPET_CHARS: usize = 2000;

/// Phrases models use when they could not fetch a page.
const UNREACHABLE_MARKERS: &[&str] = &[
    "无法直接访问",
    "无法直接打开",
    "无法直接抓取",
    "无法访问该网页内容",
    "抱歉，我目前无法直接打开或抓取外部 url",
    "unable to access",
    "not accessible",
];

/// Whether a page summary is unusable.
pub fn is_failed_summary(summary: &str) -> bool {
    let trimmed = summary.trim();
    let lower = trimmed.to_lowercase();

    trimmed.chars().count() < MIN_SUMMARY_CHARS || UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Direct review use case.
#[derive(Clone)]
pub struct DirectReview {
    vision: VisionProvider,
    search: Option<SearchClient>,
    artifacts: ArtifactStore,
    timeline: TimelineService,
    anonymizer: Option<Anonymizer>,
}

impl DirectReview {
    pub fn new(vision: VisionProvider, search: Option<SearchClient>, artifacts: ArtifactStore, timeline: TimelineService, anonymizer: Option<Anonymizer>) -> Self {
        Self {
            vision,
            search,
            artifacts,
            timeline,
            anonymizer,
        }
    }

    /// System prompt, extra system messages, prior turns, then the current user turn.
    pub fn build_messages(request: &ReviewRequest) -> Vec<RichMessage> {
        let mut messages = Vec::new();

        if !request.system_prompt.trim().is_empty() {
            messages.push(RichMessage::system(request.system_prompt.clone()));
        }

        messages.extend(request.extra_systems.iter().filter(|s| !s.trim().is_empty()).map(|s| RichMessage::system(s.clone())));
        messages.extend(request.history.iter().flat_map(|h| h.to_messages()));
        messages.push(user_turn(["Design requirements:", "Design specs:", "User dialog:"], request));

        messages
    }

    #[instrument(name = "DirectReview::execute", skip_all)]
    pub async fn execute(&self, upstream: &Upstream, request: &ReviewRequest) -> Res<ReviewReport> {
        let progress_id = request.options.progress_id.as_deref();
        let mut report = ReviewReport::default();
        let mut messages = Self::build_messages(request);

        if let Some(anonymizer) = &self.anonymizer {
            anonymizer.scrub_messages(&mut messages);
        }

        if request.options.enable_search {
            match &self.search {
                Some(search) => self.augment_with_search(search, upstream, request, &mut messages, &mut report).await,
                None => warn!("Search requested but no search provider is configured"),
            }
        }

        // Request.

        let body = VisionProvider::build_body(&upstream.model, &messages)?;
        let request_artifact = self.save_json(&body, "llm_request").await;

        let item = TimelineItem::new(
            "llm.request",
            json!({
                "apiUrl": upstream.api_url,
                "model": upstream.model,
                "messageCount": messages.len(),
                "hasHistory": !request.history.is_empty(),
                "hasAttachments": !request.files.is_empty(),
            }),
        )
        .origin(Origin::Backend)
        .category("llm")
        .with_artifact("request", request_artifact);
        self.record(progress_id, item, &mut report.timeline).await;

        // Response.

        let output = self.vision.chat_rich(upstream, &messages).await?;

        let response_artifact = self.save(&output.raw, "llm_response", ".json").await;
        let result_artifact = self.save(&output.text, "direct_review_report", ".md").await;

        let item = TimelineItem::new(
            "llm.response",
            json!({
                "snippet": snippet(&output.text, 1000),
                "contentLength": output.text.chars().count(),
            }),
        )
        .origin(Origin::Backend)
        .category("llm")
        .with_artifact("response", response_artifact)
        .with_artifact("result", result_artifact);
        self.record(progress_id, item, &mut report.timeline).await;

        info!("Direct review finished ({} chars)", output.text.chars().count());

        report.markdown = output.text;

        Ok(report)
    }

    /// Prepend search hits and page summaries as system messages.
    ///
    /// Failures are recorded on the timeline and never abort the review.
    async fn augment_with_search(&self, search: &SearchClient, upstream: &Upstream, request: &ReviewRequest, messages: &mut Vec<RichMessage>, report: &mut ReviewReport) {
        let progress_id = request.options.progress_id.as_deref();

        let query = match request.options.search_query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => q.to_string(),
            None => submission_text(request),
        };
        let query = match &self.anonymizer {
            Some(anonymizer) => anonymizer.scrub(&query),
            None => query,
        };

        if query.trim().is_empty() {
            return;
        }

        let top_n = request.options.search_top_n.unwrap_or(DEFAULT_TOP_N).max(1);
        let recorder = Arc::new(SearchRecorder {
            artifacts: self.artifacts.clone(),
            timeline: self.timeline.clone(),
            progress_id: progress_id.map(str::to_string),
            items: Mutex::default(),
        });

        // Search rides on the caller's endpoint and credentials.
        let ctx = SearchContext {
            api_url: upstream.api_url.clone(),
            auth_header: upstream.auth_header.clone(),
            model_override: request.options.search_model.clone().or_else(|| Some(upstream.model.clone())),
            trace: Some(recorder.clone()),
        };

        let searched = search.search(&ctx, &query, top_n).await;
        report.timeline.append(&mut recorder.drain());

        let hits = match searched {
            Ok(hits) => hits,
            Err(err) => {
                warn!("Search failed: {err}");
                let item = TimelineItem::new("search.failed", json!({ "error": err.to_string(), "query": query }))
                    .origin(Origin::Backend)
                    .category("search");
                self.record(progress_id, item, &mut report.timeline).await;
                return;
            }
        };

        if hits.is_empty() {
            return;
        }

        messages.insert(0, RichMessage::system(search_results_message(&hits)));

        let item = TimelineItem::new("search.results", json!({ "count": hits.len(), "query": query }))
            .origin(Origin::Backend)
            .category("search");
        self.record(progress_id, item, &mut report.timeline).await;

        // Summaries are fetched concurrently and applied in hit order.

        let summaries = join_all(hits.iter().map(|hit| search.summarize_url(&ctx, &hit.url, SUMMARY_WORD_LIMIT, request.language))).await;
        report.timeline.append(&mut recorder.drain());

        for (hit, summary) in hits.iter().zip(summaries) {
            let summary = match summary {
                Ok(s) if !is_failed_summary(&s) => s,
                Ok(_) => {
                    self.record_failed_summary(progress_id, hit, "unusable summary", report).await;
                    continue;
                }
                Err(err) => {
                    self.record_failed_summary(progress_id, hit, &err.to_string(), report).await;
                    continue;
                }
            };

            let artifact = self.save(&summary, "search_summary", ".txt").await;
            let item = TimelineItem::new("search.summary.saved", json!({ "title": hit.title, "url": hit.url }))
                .origin(Origin::Backend)
                .category("search")
                .with_artifact("summary", artifact);
            self.record(progress_id, item, &mut report.timeline).await;

            messages.insert(0, RichMessage::system(format!("External source summary ({} - {}):\n{}", hit.title, hit.url, summary)));
            report.search_summaries.push(summary);
        }

        report.citations = hits;
    }

    async fn record_failed_summary(&self, progress_id: Option<&str>, hit: &SearchHit, reason: &str, report: &mut ReviewReport) {
        let item = TimelineItem::new("search.summary.failed", json!({ "title": hit.title, "url": hit.url, "reason": reason }))
            .origin(Origin::Backend)
            .category("search");
        self.record(progress_id, item, &mut report.timeline).await;
    }

    async fn record(&self, progress_id: Option<&str>, item: TimelineItem, timeline: &mut Vec<TimelineItem>) {
        self.timeline.push(progress_id, &item).await;
        timeline.push(item);
    }

    async fn save(&self, content: &str, hint: &str, ext: &str) -> Option<ArtifactRef> {
        save_artifact(&self.artifacts, content, hint, ext).await
    }

    async fn save_json<T: Serialize>(&self, value: &T, hint: &str) -> Option<ArtifactRef> {
        match self.artifacts.save_json(value, hint).await {
            Ok(artifact) => Some(artifact),
            Err(err) => {
                warn!("Failed to save `{hint}` artifact: {err}");
                None
            }
        }
    }
}

async fn save_artifact(artifacts: &ArtifactStore, content: &str, hint: &str, ext: &str) -> Option<ArtifactRef> {
    match artifacts.save(content, hint, Some(ext)).await {
        Ok(artifact) => Some(artifact),
        Err(err) => {
            warn!("Failed to save `{hint}` artifact: {err}");
            None
        }
    }
}

/// Saves each search LLM round as an artifact and a `search.llm.*` timeline step.
struct SearchRecorder {
    artifacts: ArtifactStore,
    timeline: TimelineService,
    progress_id: Option<String>,
    items: Mutex<Vec<TimelineItem>>,
}

impl SearchRecorder {
    fn drain(&self) -> Vec<TimelineItem> {
        std::mem::take(&mut *self.items.lock())
    }
}

#[async_trait]
impl SearchTrace for SearchRecorder {
    async fn record(&self, event: SearchTraceEvent) {
        let item = match event {
            SearchTraceEvent::Request { target, model, body } => {
                let content = body.to_string();
                let artifact = save_artifact(&self.artifacts, &content, "search_llm_request", ".json").await;

                TimelineItem::new(
                    "search.llm.request",
                    json!({ "target": target.as_str(), "model": model, "bodySnippet": snippet(&content, TRACE_SNIPPET_CHARS) }),
                )
                .with_artifact("search_llm_request", artifact)
            }
            SearchTraceEvent::Response { target, model, raw, text } => {
                let artifact = save_artifact(&self.artifacts, &raw, "search_llm_response", ".txt").await;

                TimelineItem::new(
                    "search.llm.response",
                    json!({ "target": target.as_str(), "model": model, "bodySnippet": snippet(&text, TRACE_SNIPPET_CHARS) }),
                )
                .with_artifact("search_llm_response", artifact)
            }
        };

        let item = item.origin(Origin::Backend).category("search");
        self.timeline.push(self.progress_id.as_deref(), &item).await;
        self.items.lock().push(item);
    }
}

fn search_results_message(hits: &[SearchHit]) -> String {
    let lines = hits.iter().enumerate().map(|(i, h)| format!("{}. {} — {}", i + 1, h.title, h.url)).collect::<Vec<_>>();

    format!("Search results summary:\n{}", lines.join("\n"))
}

// Tests.
