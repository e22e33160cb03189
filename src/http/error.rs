//! HTTP error type and its JSON rendering.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use crate::usecase::orchestrate::OrchestrateError;

/// Errors returned by the handlers; rendered as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Gone(String),
    #[error("Failed to load system prompt")]
    PromptUnavailable { details: String },
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Upstream(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::PromptUnavailable { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// A failed use case; the message is passed to the client.
    pub fn upstream(err: anyhow::Error) -> Self {
        warn!("Review failed: {err:#}");
        ApiError::Upstream(err.to_string())
    }

    /// A local failure; details stay in the logs.
    pub fn internal(public: &str, err: impl std::fmt::Display) -> Self {
        error!("{public}: {err}");
        ApiError::Internal(public.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("invalid multipart body: {}", err.body_text()))
    }
}

impl From<OrchestrateError> for ApiError {
    fn from(err: OrchestrateError) -> Self {
        match err {
            OrchestrateError::PromptUnavailable(source) => {
                error!("Failed to load system prompt: {source}");
                ApiError::PromptUnavailable { details: source.to_string() }
            }
            OrchestrateError::Failed(err) => ApiError::upstream(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::PromptUnavailable { details } => json!({ "error": self.to_string(), "details": details }),
            other => json!({ "error": other.to_string() }),
        };

        (self.status(), Json(body)).into_response()
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Gone("x".into()).status(), StatusCode::GONE);
        assert_eq!(ApiError::PromptUnavailable { details: "x".into() }.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::upstream(anyhow::anyhow!("upstream 500")).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_upstream_keeps_message() {
        assert_eq!(ApiError::upstream(anyhow::anyhow!("upstream 429")).to_string(), "upstream 429");
    }
}
