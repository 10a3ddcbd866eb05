//! Handlers for reconstruction submission.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use recon_core::job::{JobRecord, JobStatus};
use recon_core::submission::ReconstructRequest;
use recon_core::types::ModelId;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::RequireApiKey;
use crate::state::AppState;

/// Immediate acknowledgement of an accepted submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: ModelId,
    pub status: JobStatus,
}

/// POST /reconstruct
///
/// Validate the request, publish exactly one queue message, and answer
/// `{id, status: "queued"}` without waiting for the job.
pub async fn submit(
    _key: RequireApiKey,
    State(state): State<AppState>,
    body: Result<Json<ReconstructRequest>, JsonRejection>,
) -> AppResult<Json<SubmitResponse>> {
    let Json(request) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    request.validate()?;

    let record = JobRecord::queued(&request, Utc::now());
    let message_id = state.queue.publish(&record.to_message()).await?;

    tracing::info!(
        model_id = record.id,
        message_id,
        input_url = %record.input_url,
        has_callback = record.callback_url.is_some(),
        "Reconstruction queued",
    );

    Ok(Json(SubmitResponse {
        id: record.id,
        status: record.status,
    }))
}
