use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{http::error::ApiError, runtime::Runtime};

const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn save(State(runtime): State<Runtime>, Json(payload): Json<Value>) -> Result<Json<Value>, ApiError> {
    if !payload.is_object() {
        return Err(ApiError::BadRequest("session must be a JSON object".to_string()));
    }

    let id = runtime.sessions.save(payload).await.map_err(|e| ApiError::internal("failed to save session", e))?;

    Ok(Json(json!({ "id": id })))
}

pub async fn list(State(runtime): State<Runtime>, Query(query): Query<ListQuery>) -> Result<Json<Value>, ApiError> {
    let items = runtime
        .sessions
        .list(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await
        .map_err(|e| ApiError::internal("failed to list sessions", e))?;

    Ok(Json(json!({ "items": items })))
}

pub async fn load(State(runtime): State<Runtime>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    match runtime.sessions.load(&id).await {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err(ApiError::NotFound("session not found".to_string())),
        Err(e) => Err(ApiError::internal("failed to load session", e)),
    }
}

pub async fn remove(State(runtime): State<Runtime>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    runtime.sessions.remove(&id).await.map_err(|e| ApiError::internal("failed to delete session", e))?;

    Ok(Json(json!({ "ok": true })))
}
