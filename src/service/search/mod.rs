pub mod openrouter;

use std::{ops::Deref, sync::Arc, sync::OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::base::types::{Language, Res, SearchHit};

// Structs.

/// Per-request search settings.
#[derive(Clone, Default)]
pub struct SearchContext {
    /// Endpoint; empty means the configured default.
    pub api_url: String,
    /// `Authorization` header forwarded from the client.
    pub auth_header: Option<String>,
    /// Replaces the configured search model.
    pub model_override: Option<String>,
    /// Observer of every search LLM exchange.
    pub trace: Option<Arc<dyn SearchTrace>>,
}

/// Which search round an exchange belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTarget {
    Query,
    Summary,
}

impl SearchTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTarget::Query => "query",
            SearchTarget::Summary => "summary",
        }
    }
}

/// One side of a search LLM exchange.
#[derive(Debug, Clone)]
pub enum SearchTraceEvent {
    /// `{system, messages, plugins}` as sent; request headers are never part of it.
    Request { target: SearchTarget, model: String, body: Value },
    Response { target: SearchTarget, model: String, raw: String, text: String },
}

// Traits.

/// Generic web search provider trait.
///
/// Searches are LLM calls with web access; hits are parsed out of the reply.
#[async_trait]
pub trait GenericSearchProvider: Send + Sync + 'static {
    /// Return up to `top_n` hits for `query`.
    async fn search(&self, ctx: &SearchContext, query: &str, top_n: usize) -> Res<Vec<SearchHit>>;

    /// Summarize the page at `url` in roughly `word_limit` words.
    async fn summarize_url(&self, ctx: &SearchContext, url: &str, word_limit: usize, lang: Language) -> Res<String>;
}

/// Observer of search LLM exchanges; recording must not fail the search.
#[async_trait]
pub trait SearchTrace: Send + Sync {
    async fn record(&self, event: SearchTraceEvent);
}

/// Search client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct SearchClient {
    inner: Arc<dyn GenericSearchProvider>,
}

impl Deref for SearchClient {
    type Target = dyn GenericSearchProvider;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl SearchClient {
    pub fn new(inner: Arc<dyn GenericSearchProvider>) -> Self {
        Self { inner }
    }
}

// Statics.

static URL_PATTERN: OnceLock<Regex> = OnceLock::new();
static DASH_RUN: OnceLock<Regex> = OnceLock::new();

fn url_pattern() -> &'static Regex {
    URL_PATTERN.get_or_init(|| Regex::new(r"https?://[^\s,;)\]]+").expect("static regex"))
}

fn dash_run() -> &'static Regex {
    DASH_RUN.get_or_init(|| Regex::new(r"[\s\-–—:|]+").expect("static regex"))
}

// Helpers.

/// Pick the search model, appending `:online` when the model needs it.
pub fn resolve_search_model(configured: &str, model_override: Option<&str>, force_online: bool) -> String {
    let raw = model_override.filter(|m| !m.trim().is_empty()).unwrap_or(configured).trim();

    if force_online && !raw.contains("perplexity/") && !raw.ends_with(":online") {
        format!("{raw}:online")
    } else {
        raw.to_string()
    }
}

/// Parse a search reply into hits.
///
/// A JSON array of `{title|name, url|link}` objects is preferred; otherwise the
/// first URL of each line is taken, titled by the rest of the line.
pub fn parse_search_hits(text: &str, top_n: usize) -> Vec<SearchHit> {
    let text = text.trim();

    if text.is_empty() || top_n == 0 {
        return Vec::new();
    }

    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
        return items
            .iter()
            .filter_map(|item| {
                let pick = |a: &str, b: &str| {
                    item.get(a)
                        .or_else(|| item.get(b))
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .unwrap_or_default()
                        .to_string()
                };

                let title = pick("title", "name");
                let url = pick("url", "link");

                (!title.is_empty() && !url.is_empty()).then_some(SearchHit { title, url })
            })
            .take(top_n)
            .collect();
    }

    text.lines()
        .filter_map(|line| {
            let found = url_pattern().find(line)?;
            let url = found.as_str().to_string();
            let rest = line.replacen(found.as_str(), " ", 1);
            let title = dash_run().replace_all(&rest, " ").trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.').trim().to_string();

            Some(SearchHit {
                title: if title.is_empty() { url.clone() } else { title },
                url,
            })
        })
        .take(top_n)
        .collect()
}

// Tests.
