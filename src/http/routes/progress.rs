use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use crate::{http::error::ApiError, runtime::Runtime};

/// Timeline recorded so far for a progress id.
pub async fn get_progress(State(runtime): State<Runtime>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let timeline = runtime.progress.get(&id).await.map_err(|e| ApiError::internal("failed to read progress", e))?;

    Ok(Json(json!({ "timeline": timeline })))
}
