//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, path::Path, sync::Arc};

use serde::Deserialize;

use super::types::Res;

/// Default bind host.
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default bind port.
fn default_port() -> u16 {
    4001
}

/// Default route prefix for every endpoint.
fn default_base_path() -> String {
    "/api/v1/circuit-agent".to_string()
}

/// Default OpenAI-compatible chat completions endpoint.
fn default_openrouter_base() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

/// Default TTL for progress lists kept in Redis.
fn default_progress_ttl_secs() -> u64 {
    86_400
}

fn default_progress_key_prefix() -> String {
    "cagent:prog:".to_string()
}

/// Default upstream timeout (two hours; review models are slow).
fn default_timeout_ms() -> u64 {
    7_200_000
}

fn default_fetch_retries() -> u32 {
    1
}

fn default_keep_alive_msecs() -> u64 {
    60_000
}

fn default_storage_root() -> String {
    "storage".to_string()
}

fn default_prompt_root() -> String {
    "ReviewAIPrompt".to_string()
}

fn default_agent_name() -> String {
    "circuit-agent".to_string()
}

/// Default model used for web search.
fn default_search_model() -> String {
    "perplexity/sonar".to_string()
}

fn default_search_force_online() -> bool {
    true
}

/// Default model used for URL summaries.
fn default_summary_model() -> String {
    "qwen/qwen2.5-vl-72b-instruct:free".to_string()
}

/// Default request body limit (200 MiB).
fn default_max_upload_bytes() -> usize {
    200 * 1024 * 1024
}

/// Default CORS origins for the local front-ends.
fn default_cors_origins() -> Vec<String> {
    ["3002", "3003", "5173"]
        .iter()
        .flat_map(|port| [format!("http://localhost:{port}"), format!("http://127.0.0.1:{port}")])
        .collect()
}

/// Configuration for the circuit agent.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<ConfigInner> for Config {
    fn from(inner: ConfigInner) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// Bind host (`CIRCUIT_AGENT_HOST`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port (`CIRCUIT_AGENT_PORT`).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Route prefix (`CIRCUIT_AGENT_BASE_PATH`).
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Chat endpoint used when a request does not name one (`CIRCUIT_AGENT_OPENROUTER_BASE`).
    #[serde(default = "default_openrouter_base")]
    pub openrouter_base: String,
    /// Optional Redis URL for the progress store (`CIRCUIT_AGENT_REDIS_URL`).
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Expiry applied to Redis progress lists (`CIRCUIT_AGENT_PROGRESS_TTL_SECS`).
    #[serde(default = "default_progress_ttl_secs")]
    pub progress_ttl_secs: u64,
    /// Key prefix for Redis progress lists (`CIRCUIT_AGENT_PROGRESS_KEY_PREFIX`).
    #[serde(default = "default_progress_key_prefix")]
    pub progress_key_prefix: String,
    /// Timeout for text-only upstream calls (`CIRCUIT_AGENT_LLM_TIMEOUT_MS`).
    #[serde(default = "default_timeout_ms")]
    pub llm_timeout_ms: u64,
    /// Timeout for upstream calls carrying attachments (`CIRCUIT_AGENT_VISION_TIMEOUT_MS`).
    #[serde(default = "default_timeout_ms")]
    pub vision_timeout_ms: u64,
    /// Extra attempts on transient upstream failures (`CIRCUIT_AGENT_FETCH_RETRIES`).
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Idle keep-alive of pooled upstream connections (`CIRCUIT_AGENT_KEEP_ALIVE_MSECS`).
    #[serde(default = "default_keep_alive_msecs")]
    pub keep_alive_msecs: u64,
    /// Root directory for artifacts, timeline, sessions and uploads (`CIRCUIT_AGENT_STORAGE_ROOT`).
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    /// Root directory of prompt templates (`CIRCUIT_AGENT_PROMPT_ROOT`).
    #[serde(default = "default_prompt_root")]
    pub prompt_root: String,
    /// Prompt sub-directory for this agent (`CIRCUIT_AGENT_AGENT_NAME`).
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    /// Model used for web search (`CIRCUIT_AGENT_SEARCH_MODEL`).
    #[serde(default = "default_search_model")]
    pub search_model: String,
    /// Append `:online` to search models that are not natively online (`CIRCUIT_AGENT_SEARCH_FORCE_ONLINE`).
    #[serde(default = "default_search_force_online")]
    pub search_force_online: bool,
    /// Model used to summarize search hits (`CIRCUIT_AGENT_SUMMARY_MODEL`).
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    /// Fail startup when prompt preload fails (`CIRCUIT_AGENT_STRICT_PROMPTS`).
    #[serde(default)]
    pub strict_prompts: bool,
    /// Scrub personal data from text before it leaves the service (`CIRCUIT_AGENT_ANONYMIZE_INPUT`).
    #[serde(default)]
    pub anonymize_input: bool,
    /// Extra words redacted when anonymizing (`CIRCUIT_AGENT_SENSITIVE_WORDS`, comma separated).
    #[serde(default)]
    pub sensitive_words: Vec<String>,
    /// Request body limit in bytes (`CIRCUIT_AGENT_MAX_UPLOAD_BYTES`).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Allowed CORS origins (`CIRCUIT_AGENT_CORS_ORIGINS`, comma separated).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            openrouter_base: default_openrouter_base(),
            redis_url: None,
            progress_ttl_secs: default_progress_ttl_secs(),
            progress_key_prefix: default_progress_key_prefix(),
            llm_timeout_ms: default_timeout_ms(),
            vision_timeout_ms: default_timeout_ms(),
            fetch_retries: default_fetch_retries(),
            keep_alive_msecs: default_keep_alive_msecs(),
            storage_root: default_storage_root(),
            prompt_root: default_prompt_root(),
            agent_name: default_agent_name(),
            search_model: default_search_model(),
            search_force_online: default_search_force_online(),
            summary_model: default_summary_model(),
            strict_prompts: false,
            anonymize_input: false,
            sensitive_words: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&Path>) -> Res<Self> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        // Environment wins over the file.
        cfg = cfg.add_source(
            config::Environment::default()
                .prefix("CIRCUIT_AGENT")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("cors_origins")
                .with_list_parse_key("sensitive_words"),
        );

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Res<()> {
        if self.port == 0 {
            return Err(anyhow::anyhow!("Port must be greater than 0."));
        }

        if !self.base_path.starts_with('/') || self.base_path.ends_with('/') {
            return Err(anyhow::anyhow!("Base path must start with `/` and must not end with `/`."));
        }

        if self.llm_timeout_ms == 0 || self.vision_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Upstream timeouts must be greater than 0."));
        }

        if self.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload bytes must be greater than 0."));
        }

        Ok(())
    }

    /// Directory holding persisted artifacts.
    pub fn artifacts_dir(&self) -> std::path::PathBuf {
        Path::new(&self.storage_root).join("artifacts")
    }

    /// Directory holding timeline event files.
    pub fn timeline_dir(&self) -> std::path::PathBuf {
        Path::new(&self.storage_root).join("timeline")
    }

    /// Directory holding saved sessions.
    pub fn sessions_dir(&self) -> std::path::PathBuf {
        Path::new(&self.storage_root).join("sessions")
    }

    /// Directory holding in-flight uploads.
    pub fn tmp_dir(&self) -> std::path::PathBuf {
        Path::new(&self.storage_root).join("tmp")
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from(ConfigInner::default());

        assert_eq!(config.port, 4001);
        assert_eq!(config.base_path, "/api/v1/circuit-agent");
        assert_eq!(config.fetch_retries, 1);
        assert!(config.cors_origins.contains(&"http://localhost:5173".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 5001\nstorage_root = \"/tmp/ca\"\nsensitive_words = [\"acme\"]\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.port, 5001);
        assert_eq!(config.storage_root, "/tmp/ca");
        assert_eq!(config.sensitive_words, vec!["acme".to_string()]);
        assert_eq!(config.search_model, "perplexity/sonar");
    }

    #[test]
    fn test_rejects_trailing_slash_base_path() {
        let config = Config::from(ConfigInner {
            base_path: "/api/".to_string(),
            ..Default::default()
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = Config::from(ConfigInner {
            llm_timeout_ms: 0,
            ..Default::default()
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_dirs() {
        let config = Config::from(ConfigInner {
            storage_root: "/data".to_string(),
            ..Default::default()
        });

        assert_eq!(config.artifacts_dir(), Path::new("/data/artifacts"));
        assert_eq!(config.tmp_dir(), Path::new("/data/tmp"));
    }
}
