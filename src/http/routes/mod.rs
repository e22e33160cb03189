//! Route handlers.

pub mod progress;
pub mod prompt;
pub mod review;
pub mod session;

use axum::Json;
use serde_json::{Value, json};

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "circuit-agent", "endpoint": "health" }))
}
