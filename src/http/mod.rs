//! HTTP surface of the circuit agent.
//!
//! Every endpoint lives under the configured base path; `/health` is also
//! served unprefixed for load balancers.

pub mod error;
pub mod form;
pub mod routes;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

use crate::{base::config::Config, runtime::Runtime};

/// Build the application router.
pub fn router(runtime: Runtime) -> Router {
    let config = runtime.config.clone();

    let api = Router::new()
        .route("/health", get(routes::health))
        .route("/progress/{id}", get(routes::progress::get_progress))
        .route("/modes/direct/review", post(routes::review::direct_review))
        .route("/orchestrate/review", post(routes::review::orchestrate_review))
        .route("/system-prompt", get(routes::prompt::system_prompt))
        .route("/sessions/save", post(routes::session::save))
        .route("/sessions/list", get(routes::session::list))
        .route("/sessions/{id}", get(routes::session::load).delete(routes::session::remove))
        .nest_service("/artifacts", ServeDir::new(config.artifacts_dir()));

    Router::new()
        .route("/health", get(routes::health))
        .nest(&config.base_path, api)
        .with_state(runtime)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin `{origin}`");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}
