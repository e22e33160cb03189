//! HTTP client for OpenAI-compatible chat endpoints (OpenRouter by default).
//!
//! Requests are plain JSON posts over a pooled `reqwest` client. Transport
//! failures, timeouts, `429` and `5xx` replies are retried with exponential
//! backoff up to `fetch_retries` extra attempts.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::base::{
    config::Config,
    text::snippet,
    types::{Err, Res},
};

use super::{ChatCall, ChatOutput, GenericLlmClient, LlmClient, extract_text_from_openai_compat};

// Extra methods on `LlmClient` applied by the http implementation.

impl LlmClient {
    pub fn http(config: &Config) -> Res<Self> {
        let client = HttpLlmClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Specific implementations.

/// Outcome of a single failed attempt.
enum Attempt {
    Retryable(Err),
    Fatal(Err),
}

/// HTTP LLM client implementation.
#[derive(Clone)]
pub struct HttpLlmClient {
    client: reqwest::Client,
    config: Config,
}

impl HttpLlmClient {
    /// Create a new HTTP LLM client.
    #[instrument(name = "HttpLlmClient::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        let keep_alive = Duration::from_millis(config.keep_alive_msecs);

        let client = reqwest::Client::builder().pool_idle_timeout(keep_alive).tcp_keepalive(keep_alive).build()?;

        Ok(Self { client, config: config.clone() })
    }

    fn endpoint<'a>(&'a self, call: &'a ChatCall) -> &'a str {
        if call.api_url.trim().is_empty() { &self.config.openrouter_base } else { &call.api_url }
    }

    async fn send(&self, call: &ChatCall) -> Result<ChatOutput, Attempt> {
        let mut request = self.client.post(self.endpoint(call)).header(CONTENT_TYPE, "application/json").json(&call.body);

        for (name, value) in &call.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| Attempt::Retryable(e.into()))?;
        let status = response.status();
        let raw = response.text().await.map_err(|e| Attempt::Retryable(e.into()))?;

        if !status.is_success() {
            warn!("Upstream replied {status}: {}", snippet(&raw, 500));

            let err = anyhow::anyhow!("upstream {}", status.as_u16());

            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Attempt::Retryable(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        Ok(ChatOutput {
            text: extract_text_from_openai_compat(&raw),
            raw,
        })
    }
}

#[async_trait]
impl GenericLlmClient for HttpLlmClient {
    #[instrument(name = "HttpLlmClient::chat", skip_all)]
    async fn chat(&self, call: &ChatCall) -> Res<ChatOutput> {
        let max_retries = self.config.fetch_retries;
        let mut retries = 0;

        loop {
            let result = timeout(call.timeout, self.send(call)).await;

            match result {
                Ok(Ok(output)) => {
                    debug!("Upstream call succeeded after {} attempts", retries + 1);
                    return Ok(output);
                }
                Ok(Err(Attempt::Fatal(err))) => return Err(err),
                Ok(Err(Attempt::Retryable(err))) => {
                    if retries >= max_retries {
                        return Err(err);
                    }
                    retries += 1;
                    warn!("Upstream call failed, retrying {retries}/{max_retries}: {err}");
                }
                Err(_) => {
                    if retries >= max_retries {
                        return Err(anyhow::anyhow!("upstream timeout"));
                    }
                    retries += 1;
                    warn!("Upstream call timed out, retrying {retries}/{max_retries}");
                }
            }

            tokio::time::sleep(backoff_delay(retries)).await;
        }
    }
}

const RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Exponential backoff before retry number `retry` (1-based), capped.
fn backoff_delay(retry: u32) -> Duration {
    let factor = 2_u64.checked_pow(retry.saturating_sub(1)).unwrap_or(u64::MAX);

    Duration::from_millis(RETRY_DELAY_MS.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::config::ConfigInner;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    fn create_test_config(retries: u32) -> Config {
        Config::from(ConfigInner {
            fetch_retries: retries,
            ..Default::default()
        })
    }

    fn call(server: &MockServer) -> ChatCall {
        ChatCall {
            api_url: format!("{}/v1/chat/completions", server.uri()),
            body: json!({ "model": "m", "messages": [], "stream": false }),
            headers: vec![("Authorization".to_string(), "Bearer k".to_string())],
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(64), Duration::from_millis(MAX_RETRY_DELAY_MS));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(MAX_RETRY_DELAY_MS));
    }

    #[tokio::test]
    async fn test_chat_extracts_text_and_keeps_raw() {
        let server = MockServer::start().await;
        let body = json!({ "choices": [{ "message": { "content": "looks fine" } }] });

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer k"))
            .and(body_partial_json(json!({ "model": "m", "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::http(&create_test_config(1)).unwrap();
        let output = client.chat(&call(&server)).await.unwrap();

        assert_eq!(output.text, "looks fine");
        assert_eq!(serde_json::from_str::<serde_json::Value>(&output.raw).unwrap(), body);
    }

    #[tokio::test]
    async fn test_chat_retries_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST")).respond_with(ResponseTemplate::new(503)).expect(2).mount(&server).await;

        let client = LlmClient::http(&create_test_config(1)).unwrap();
        let err = client.chat(&call(&server)).await.unwrap_err();

        assert_eq!(err.to_string(), "upstream 503");
    }

    #[tokio::test]
    async fn test_chat_does_not_retry_client_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST")).respond_with(ResponseTemplate::new(401)).expect(1).mount(&server).await;

        let client = LlmClient::http(&create_test_config(3)).unwrap();
        let err = client.chat(&call(&server)).await.unwrap_err();

        assert_eq!(err.to_string(), "upstream 401");
    }

    #[tokio::test]
    async fn test_chat_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = LlmClient::http(&create_test_config(0)).unwrap();
        let mut call = call(&server);
        call.timeout = Duration::from_millis(100);

        let err = client.chat(&call).await.unwrap_err();

        assert_eq!(err.to_string(), "upstream timeout");
    }
}
