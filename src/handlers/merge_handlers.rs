//! HTTP handlers for merge jobs.

use crate::{errors::AppError, handlers::video_handlers::PageQuery, services::AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

/// Request body for `POST /api/merge-jobs`. `video_ids` is playback order.
#[derive(Debug, Deserialize)]
pub struct CreateMergeJobRequest {
    pub video_ids: Vec<Uuid>,
    pub created_by: Option<String>,
}

/// `POST /api/merge-jobs` — validate, persist and queue a merge. Responds 201
/// with the job still in `pending`; progress is polled via the GET endpoints.
pub async fn create_merge_job(
    State(state): State<AppState>,
    Json(req): Json<CreateMergeJobRequest>,
) -> Result<impl IntoResponse, AppError> {
    let details = state
        .merges
        .create_merge_job(req.video_ids, req.created_by)
        .await?;

    let worker = state.merges.clone();
    let job_id = details.job.id;
    state.jobs.submit(worker.run_merge_job(job_id)).await?;

    Ok((StatusCode::CREATED, Json(details)))
}

/// `GET /api/merge-jobs/{id}` — job status, progress and constituents.
pub async fn get_merge_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let details = state.merges.get_job(job_id).await?;
    Ok(Json(details))
}

/// `GET /api/merge-jobs` — newest-first page of merge jobs.
pub async fn list_merge_jobs(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.merges.list_jobs(q.page, q.page_size).await?;
    Ok(Json(page))
}
