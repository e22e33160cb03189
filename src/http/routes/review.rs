//! Review endpoints.
//!
//! Both parse the multipart form, run a use case and answer with its JSON
//! result. Uploaded files are removed when the form goes out of scope, on
//! success and on failure alike.

use axum::{
    Json,
    extract::{Multipart, State},
    http::HeaderMap,
};
use tracing::{info, instrument};

use crate::{
    base::types::ReviewReport,
    http::{error::ApiError, form::ReviewForm},
    runtime::Runtime,
    usecase::orchestrate::OrchestrateInput,
};

/// Reset the progress list so polling clients only see this run.
async fn start_progress(runtime: &Runtime, progress_id: Option<&str>) {
    if let Some(id) = progress_id {
        if let Err(err) = runtime.progress.init(id).await {
            tracing::warn!("Failed to reset progress `{id}`: {err}");
        }
    }
}

#[instrument(skip_all)]
pub async fn direct_review(State(runtime): State<Runtime>, headers: HeaderMap, multipart: Multipart) -> Result<Json<ReviewReport>, ApiError> {
    let form = ReviewForm::parse(multipart, &runtime.config.tmp_dir()).await?;
    let upstream = form.fields.upstream(&runtime.config, &headers)?;
    let request = form.review_request()?;

    info!("Direct review with {} files on `{}`", request.files.len(), upstream.model);
    start_progress(&runtime, request.options.progress_id.as_deref()).await;

    let report = runtime.direct.execute(&upstream, &request).await.map_err(ApiError::upstream)?;

    Ok(Json(report))
}

#[instrument(skip_all)]
pub async fn orchestrate_review(State(runtime): State<Runtime>, headers: HeaderMap, multipart: Multipart) -> Result<Json<ReviewReport>, ApiError> {
    let form = ReviewForm::parse(multipart, &runtime.config.tmp_dir()).await?;
    let upstream = form.fields.upstream(&runtime.config, &headers)?;

    // Only the direct review pipeline is served; the structured one is retired.
    if !form.fields.direct_review.unwrap_or_default().0 {
        return Err(ApiError::Gone("structured mode removed; use directReview=true".to_string()));
    }

    let input = OrchestrateInput {
        upstream,
        aux_model: form.fields.aux_model.clone(),
        request: form.review_request()?,
    };

    info!("Orchestrated review with {} files", input.request.files.len());
    start_progress(&runtime, input.request.options.progress_id.as_deref()).await;

    let report = runtime.orchestrate.execute(input).await?;

    Ok(Json(report))
}
