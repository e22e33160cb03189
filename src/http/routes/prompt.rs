use axum::{
    extract::{Query, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{http::error::ApiError, runtime::Runtime};

#[derive(Debug, Default, Deserialize)]
pub struct PromptQuery {
    #[serde(default)]
    lang: Option<String>,
}

/// The top-level system prompt document for a language, as plain text.
pub async fn system_prompt(State(runtime): State<Runtime>, Query(query): Query<PromptQuery>) -> Result<Response, ApiError> {
    let name = match query.lang.as_deref().map(str::trim) {
        Some("en") => "SystemPrompt.md",
        _ => "系统提示词.md",
    };

    let content = runtime.prompts.root_document(name).await.ok_or_else(|| ApiError::NotFound(format!("system prompt `{name}` not found")))?;

    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], content).into_response())
}
