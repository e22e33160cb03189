//! OpenRouter web search.
//!
//! Uses OpenRouter's `web` plugin (Exa engine) so the model answers with
//! fresh results, then parses hits from the reply.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::{
    base::{
        config::Config,
        prompts::{PromptLoader, SEARCH_FALLBACK_PROMPT, SUMMARY_FALLBACK_PROMPT},
        types::{Language, MessageContent, Res, RichMessage, SearchHit, Upstream},
    },
    service::{
        llm::ChatOutput,
        provider::{TextChat, TextProvider},
    },
};

use super::{GenericSearchProvider, SearchClient, SearchContext, SearchTarget, SearchTraceEvent, parse_search_hits, resolve_search_model};

// Extra methods on `SearchClient` applied by the openrouter implementation.

impl SearchClient {
    pub fn openrouter(config: &Config, text: TextProvider, prompts: PromptLoader) -> Self {
        Self {
            inner: Arc::new(OpenRouterSearch::new(config, text, prompts)),
        }
    }
}

/// OpenRouter search implementation.
#[derive(Clone)]
pub struct OpenRouterSearch {
    text: TextProvider,
    prompts: PromptLoader,
    config: Config,
}

impl OpenRouterSearch {
    pub fn new(config: &Config, text: TextProvider, prompts: PromptLoader) -> Self {
        Self {
            text,
            prompts,
            config: config.clone(),
        }
    }

    async fn search_system_prompt(&self, top_n: usize) -> String {
        let template = match self.prompts.pass_prompt("search").await {
            Ok(p) => p,
            Err(err) => {
                debug!("Using built-in search prompt: {err}");
                SEARCH_FALLBACK_PROMPT.to_string()
            }
        };

        template.replace("{topN}", &top_n.to_string())
    }

    async fn summary_system_prompt(&self, word_limit: usize, lang: Language) -> String {
        let template = match self.prompts.pass_prompt("summary").await {
            Ok(p) => p,
            Err(err) => {
                debug!("Using built-in summary prompt: {err}");
                SUMMARY_FALLBACK_PROMPT.to_string()
            }
        };

        template.replace("{limit}", &word_limit.clamp(64, 2048).to_string()).replace("{lang}", lang.display_name())
    }

    /// Run one chat round, reporting both sides to the context's trace.
    async fn round(&self, ctx: &SearchContext, target: SearchTarget, chat: &TextChat) -> Res<ChatOutput> {
        let model = chat.upstream.model.clone();

        if let Some(trace) = &ctx.trace {
            let body = json!({ "system": chat.system, "messages": chat.messages, "plugins": chat.plugins });
            trace.record(SearchTraceEvent::Request { target, model: model.clone(), body }).await;
        }

        let output = self.text.chat(chat).await?;

        if let Some(trace) = &ctx.trace {
            trace
                .record(SearchTraceEvent::Response {
                    target,
                    model,
                    raw: output.raw.clone(),
                    text: output.text.clone(),
                })
                .await;
        }

        Ok(output)
    }

    fn upstream(&self, ctx: &SearchContext, model: String) -> Upstream {
        Upstream {
            api_url: ctx.api_url.clone(),
            model,
            auth_header: ctx.auth_header.clone(),
        }
    }
}

fn web_plugin(max_results: usize) -> serde_json::Value {
    json!([{ "id": "web", "engine": "exa", "max_results": max_results }])
}

#[async_trait]
impl GenericSearchProvider for OpenRouterSearch {
    #[instrument(name = "OpenRouterSearch::search", skip_all)]
    async fn search(&self, ctx: &SearchContext, query: &str, top_n: usize) -> Res<Vec<SearchHit>> {
        let top_n = top_n.max(1);
        let model = resolve_search_model(&self.config.search_model, ctx.model_override.as_deref(), self.config.search_force_online);

        let chat = TextChat {
            upstream: self.upstream(ctx, model),
            system: self.search_system_prompt(top_n).await,
            messages: vec![RichMessage::user(MessageContent::Text(query.to_string()))],
            plugins: Some(web_plugin(top_n)),
            ..Default::default()
        };

        let output = self.round(ctx, SearchTarget::Query, &chat).await?;
        let hits = parse_search_hits(&output.text, top_n);

        if hits.is_empty() {
            warn!("Search reply contained no usable hits");
        }

        Ok(hits)
    }

    #[instrument(name = "OpenRouterSearch::summarize_url", skip_all)]
    async fn summarize_url(&self, ctx: &SearchContext, url: &str, word_limit: usize, lang: Language) -> Res<String> {
        let chat = TextChat {
            upstream: self.upstream(ctx, self.config.summary_model.clone()),
            system: self.summary_system_prompt(word_limit, lang).await,
            messages: vec![RichMessage::user(MessageContent::Text(format!("URL: {url}")))],
            plugins: Some(web_plugin(1)),
            ..Default::default()
        };

        let output = self.round(ctx, SearchTarget::Summary, &chat).await?;

        Ok(output.text.trim().to_string())
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::config::ConfigInner,
        service::{llm::LlmClient, search::SearchTrace},
    };
    use parking_lot::Mutex;
    use serde_json::Value;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<SearchTraceEvent>>,
    }

    #[async_trait]
    impl SearchTrace for EventLog {
        async fn record(&self, event: SearchTraceEvent) {
            self.events.lock().push(event);
        }
    }

    fn reply(text: &str) -> Value {
        json!({ "choices": [{ "message": { "content": text } }] })
    }

    fn create_search(server: &MockServer, prompt_root: &std::path::Path) -> (SearchClient, SearchContext) {
        let config = Config::from(ConfigInner {
            openrouter_base: format!("{}/chat", server.uri()),
            search_model: "openai/gpt-4o-mini".to_string(),
            fetch_retries: 0,
            ..Default::default()
        });

        let text = TextProvider::new(LlmClient::http(&config).unwrap(), &config);
        let prompts = PromptLoader::new(prompt_root, "circuit-agent");

        (SearchClient::openrouter(&config, text, prompts), SearchContext::default())
    }

    #[tokio::test]
    async fn test_search_sends_plugin_and_online_model() {
        let server = MockServer::start().await;
        let prompts = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "model": "openai/gpt-4o-mini:online",
                "plugins": [{ "id": "web", "engine": "exa", "max_results": 2 }],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(r#"[{"title":"A","url":"https://a.example"}]"#)))
            .expect(1)
            .mount(&server)
            .await;

        let (search, ctx) = create_search(&server, prompts.path());
        let hits = search.search(&ctx, "buck converter ripple", 2).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://a.example");
    }

    #[tokio::test]
    async fn test_search_uses_prompt_template() {
        let server = MockServer::start().await;
        let prompts = tempfile::tempdir().unwrap();
        let agent = prompts.path().join("circuit-agent");
        std::fs::create_dir_all(&agent).unwrap();
        std::fs::write(agent.join("search_prompt.md"), "Return {topN} links.").unwrap();

        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "messages": [{ "role": "system", "content": "Return 3 links." }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("see https://b.example")))
            .expect(1)
            .mount(&server)
            .await;

        let (search, ctx) = create_search(&server, prompts.path());
        let hits = search.search(&ctx, "q", 3).await.unwrap();

        assert_eq!(hits[0].url, "https://b.example");
    }

    #[tokio::test]
    async fn test_summarize_url() {
        let server = MockServer::start().await;
        let prompts = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "model": "qwen/qwen2.5-vl-72b-instruct:free",
                "plugins": [{ "id": "web", "engine": "exa", "max_results": 1 }],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("  A concise summary.  ")))
            .expect(1)
            .mount(&server)
            .await;

        let (search, ctx) = create_search(&server, prompts.path());
        let summary = search.summarize_url(&ctx, "https://a.example", 10, Language::En).await.unwrap();

        assert_eq!(summary, "A concise summary.");
    }

    #[tokio::test]
    async fn test_search_uses_request_endpoint_and_credentials() {
        let default = MockServer::start().await;
        let own = MockServer::start().await;
        let prompts = tempfile::tempdir().unwrap();

        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200).set_body_json(reply("[]"))).expect(0).mount(&default).await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer own-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(r#"[{"title":"A","url":"https://a.example"}]"#)))
            .expect(1)
            .mount(&own)
            .await;

        let (search, _) = create_search(&default, prompts.path());
        let ctx = SearchContext {
            api_url: format!("{}/v1/chat/completions", own.uri()),
            auth_header: Some("Bearer own-key".to_string()),
            ..Default::default()
        };

        let hits = search.search(&ctx, "q", 1).await.unwrap();

        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_rounds_are_traced_without_headers() {
        let server = MockServer::start().await;
        let prompts = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(r#"[{"title":"A","url":"https://a.example"}]"#)))
            .mount(&server)
            .await;

        let (search, _) = create_search(&server, prompts.path());
        let log = Arc::new(EventLog::default());
        let ctx = SearchContext {
            auth_header: Some("Bearer very-secret".to_string()),
            trace: Some(log.clone()),
            ..Default::default()
        };

        search.search(&ctx, "ripple", 1).await.unwrap();
        search.summarize_url(&ctx, "https://a.example", 100, Language::Zh).await.unwrap();

        let events = log.events.lock();
        assert_eq!(events.len(), 4);

        let SearchTraceEvent::Request { target, model, body } = &events[0] else {
            panic!("expected a request event");
        };
        assert_eq!(*target, SearchTarget::Query);
        assert_eq!(model, "openai/gpt-4o-mini:online");
        assert_eq!(body["messages"][0]["content"], "ripple");
        assert_eq!(body["plugins"][0]["id"], "web");
        assert!(!body.to_string().contains("very-secret"));

        assert!(matches!(&events[1], SearchTraceEvent::Response { target: SearchTarget::Query, .. }));
        assert!(matches!(&events[2], SearchTraceEvent::Request { target: SearchTarget::Summary, .. }));
        assert!(matches!(&events[3], SearchTraceEvent::Response { target: SearchTarget::Summary, text, .. } if text.contains("a.example")));
    }
}
