//! Library root for `circuit-agent`.
//!
//! Circuit-agent is the backend of an LLM-assisted circuit design review tool. It:
//! - Accepts requirements, specs, dialog and schematic/PDF uploads as multipart forms
//! - Assembles them into an OpenAI-compatible conversation, inlining images
//! - Optionally augments the conversation with web search results and page summaries
//! - Persists every request, response and report as an artifact
//! - Records a timeline of processing steps that clients can poll while a review runs
//!
//! The architecture is built around extensible traits (LLM transport, web
//! search, progress storage) that allow for different implementations of each
//! service.

pub mod base;
pub mod http;
pub mod runtime;
pub mod service;
pub mod usecase;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::{info, warn};

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the circuit-agent runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with the LLM, search and storage services
/// - Serves the HTTP API until shutdown
pub async fn start(config: Config) -> Void {
    info!("Starting circuit-agent ...");

    // Start the crypto provider.
    if crypto::ring::default_provider().install_default().is_err() {
        warn!("A crypto provider was already installed");
    }

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
