//! Prompt template loading.
//!
//! Templates live under `<prompt_root>/<agent>/`:
//! - `system_prompt_<initial|revision>_<lang>.md` (or `system_prompt_<lang>.md`)
//!   for the reviewer persona;
//! - `<variant>_prompt.md` for auxiliary passes (`search`, `summary`, `identify`).
//!
//! Contents are trimmed and cached by path until [`PromptLoader::clear_cache`].

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::base::{
    config::Config,
    types::{Language, Res},
};

/// Fallback system prompt for the search pass; `{topN}` is substituted.
pub const SEARCH_FALLBACK_PROMPT: &str = r#"You are a web search tool. Given the user query, return a JSON array of up to {topN} items, each an object with keys "title" and "url". Return only the JSON array and no extra text."#;

/// Fallback system prompt for URL summaries; `{limit}` and `{lang}` are substituted.
pub const SUMMARY_FALLBACK_PROMPT: &str = "Read the web page at the given URL and summarize the parts relevant to electronic circuit design in {lang}, in at most {limit} words. Return only the summary.";

/// Fallback identify prompt (Chinese).
pub const IDENTIFY_FALLBACK_PROMPT_ZH: &str = r#"请你根据用户提供的需求、规范、对话和图片，识别并返回 JSON：{"keyComponents":[],"keyTechRoutes":[] }。只返回 JSON。"#;

/// Fallback identify prompt (English).
pub const IDENTIFY_FALLBACK_PROMPT_EN: &str = r#"Identify key components and key technical routes. Return pure JSON: {"keyComponents":[],"keyTechRoutes":[]} only."#;

// Errors.

/// Failure to load a prompt template.
#[derive(Debug, thiserror::Error)]
pub enum PromptLoadError {
    #[error("Prompt file not found (path: {})", .path.display())]
    NotFound { path: PathBuf },
    #[error("Prompt file is empty (path: {})", .path.display())]
    Empty { path: PathBuf },
    #[error("Pass prompt requires a variant (path: {})", .path.display())]
    MissingVariant { path: PathBuf },
    #[error("Prompt file could not be read (path: {}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which system prompt of a review round to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemVariant {
    Initial,
    Revision,
}

impl SystemVariant {
    fn as_str(&self) -> &'static str {
        match self {
            SystemVariant::Initial => "initial",
            SystemVariant::Revision => "revision",
        }
    }
}

// Structs.

/// Cached prompt loader.
///
/// This is trivially cloneable; clones share the cache.
#[derive(Clone)]
pub struct PromptLoader {
    root: PathBuf,
    agent_dir: PathBuf,
    cache: Arc<RwLock<HashMap<PathBuf, String>>>,
}

impl PromptLoader {
    pub fn new(root: impl Into<PathBuf>, agent: &str) -> Self {
        let root = root.into();
        let agent_dir = root.join(agent);

        Self {
            root,
            agent_dir,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.prompt_root, &config.agent_name)
    }

    /// Load the reviewer system prompt.
    ///
    /// With a variant, only `system_prompt_<variant>_<lang>.md` is accepted.
    pub async fn system_prompt(&self, lang: Language, variant: Option<SystemVariant>) -> Result<String, PromptLoadError> {
        let file = match variant {
            Some(v) => format!("system_prompt_{}_{}.md", v.as_str(), lang),
            None => format!("system_prompt_{lang}.md"),
        };

        self.load(&self.agent_dir.join(file)).await
    }

    /// Load an auxiliary pass prompt such as `search` or `summary`.
    pub async fn pass_prompt(&self, variant: &str) -> Result<String, PromptLoadError> {
        if variant.trim().is_empty() {
            return Err(PromptLoadError::MissingVariant { path: self.agent_dir.clone() });
        }

        self.load(&self.agent_dir.join(format!("{variant}_prompt.md"))).await
    }

    /// Load a document from the prompt root, falling back to the working directory.
    pub async fn root_document(&self, name: &str) -> Option<String> {
        for path in [self.root.join(name), PathBuf::from(name)] {
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                return Some(content);
            }
        }

        None
    }

    /// Drop every cached template.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// Warm the cache with the reviewer system prompts.
    ///
    /// With `strict`, the first failure is returned; otherwise failures are logged.
    pub async fn preload(&self, strict: bool) -> Res<usize> {
        let mut loaded = 0;

        for lang in [Language::Zh, Language::En] {
            for variant in [SystemVariant::Initial, SystemVariant::Revision] {
                match self.system_prompt(lang, Some(variant)).await {
                    Ok(_) => loaded += 1,
                    Err(err) if strict => return Err(err.into()),
                    Err(err) => warn!("Prompt preload skipped: {err}"),
                }
            }
        }

        Ok(loaded)
    }

    async fn load(&self, path: &Path) -> Result<String, PromptLoadError> {
        let cached = self.cache.read().get(path).cloned();

        if let Some(hit) = cached {
            return Ok(hit);
        }

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(PromptLoadError::NotFound { path: path.to_path_buf() }),
            Err(source) => return Err(PromptLoadError::Io { path: path.to_path_buf(), source }),
        };

        let content = content.trim().to_string();

        if content.is_empty() {
            return Err(PromptLoadError::Empty { path: path.to_path_buf() });
        }

        debug!("Loaded prompt `{}`", path.display());
        self.cache.write().insert(path.to_path_buf(), content.clone());

        Ok(content)
    }
}

/// Identify fallback for the language.
pub fn identify_fallback(lang: Language) -> &'static str {
    match lang {
        Language::Zh => IDENTIFY_FALLBACK_PROMPT_ZH,
        Language::En => IDENTIFY_FALLBACK_PROMPT_EN,
    }
}

// Tests.
