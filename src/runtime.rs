//! Runtime services and shared state for the circuit agent.

use std::net::SocketAddr;

use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        prompts::PromptLoader,
        types::{Res, Void},
    },
    http,
    service::{
        anonymize::Anonymizer,
        llm::LlmClient,
        progress::ProgressStore,
        provider::{TextProvider, VisionProvider},
        search::SearchClient,
        storage::{artifact::ArtifactStore, session::SessionStore},
        timeline::TimelineService,
    },
    usecase::{direct_review::DirectReview, identify_key_facts::IdentifyKeyFacts, orchestrate::OrchestrateReview},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration, the services and the use cases built
/// on top of them. It is designed to be trivially cloneable, so it doubles as
/// the HTTP handler state.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The progress store (Redis or memory).
    pub progress: ProgressStore,
    pub sessions: SessionStore,
    pub prompts: PromptLoader,
    pub direct: DirectReview,
    pub orchestrate: OrchestrateReview,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the LLM client.
        let llm = LlmClient::http(&config)?;

        // Initialize the progress store.
        let progress = ProgressStore::connect(&config).await;

        // Initialize the search client.
        let prompts = PromptLoader::from_config(&config);
        let search = SearchClient::openrouter(&config, TextProvider::new(llm.clone(), &config), prompts.clone());

        let runtime = Self::from_parts(config, llm, Some(search), progress);

        let loaded = runtime.prompts.preload(runtime.config.strict_prompts).await?;
        info!("Preloaded {loaded} system prompts");

        for dir in [runtime.config.artifacts_dir(), runtime.config.tmp_dir()] {
            tokio::fs::create_dir_all(dir).await?;
        }

        Ok(runtime)
    }

    /// Wire a runtime from already-built clients.
    pub fn from_parts(config: Config, llm: LlmClient, search: Option<SearchClient>, progress: ProgressStore) -> Self {
        let prompts = PromptLoader::from_config(&config);
        let artifacts = ArtifactStore::from_config(&config);
        let sessions = SessionStore::from_config(&config);
        let timeline = TimelineService::from_config(&config, progress.clone());
        let vision = VisionProvider::new(llm, &config);
        let anonymizer = config.anonymize_input.then(|| Anonymizer::new(&config.sensitive_words));

        let direct = DirectReview::new(vision.clone(), search, artifacts.clone(), timeline.clone(), anonymizer.clone());
        let identify = IdentifyKeyFacts::new(vision, prompts.clone(), artifacts, timeline, anonymizer);
        let orchestrate = OrchestrateReview::new(direct.clone(), identify, prompts.clone());

        Self {
            config,
            progress,
            sessions,
            prompts,
            direct,
            orchestrate,
        }
    }

    /// Serve the HTTP API until ctrl-c.
    pub async fn start(&self) -> Void {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("Listening on http://{addr}{}", self.config.base_path);

        axum::serve(listener, http::router(self.clone())).with_graceful_shutdown(shutdown_signal()).await?;

        info!("Server stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
