//! HTTP handlers for the video catalogue.

use crate::{errors::AppError, services::AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

/// Paging query accepted by the list endpoints.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// `GET /api/videos/{id}` — one video with its rendition map.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let details = state.videos.get_video(video_id).await?;
    Ok(Json(details))
}

/// `GET /api/videos` — newest-first page of videos.
pub async fn list_videos(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.videos.list_videos(q.page, q.page_size).await?;
    Ok(Json(page))
}

/// Request body for `POST /api/videos/{id}/trim`.
#[derive(Debug, Deserialize)]
pub struct TrimRequest {
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

/// Request body for `POST /api/videos/{id}/watermark`.
#[derive(Debug, Deserialize)]
pub struct WatermarkRequest {
    pub text: String,
}

/// `POST /api/videos/{id}/trim` — cut a range out of the stored original and
/// record it as a `trimmed` rendition.
pub async fn trim_video(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
    Json(req): Json<TrimRequest>,
) -> Result<impl IntoResponse, AppError> {
    let details = state
        .videos
        .trim_video(video_id, req.start_seconds, req.duration_seconds)
        .await?;
    Ok(Json(details))
}

/// `POST /api/videos/{id}/watermark` — burn a text watermark into the stored
/// original and record it as a `watermarked` rendition.
pub async fn watermark_video(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
    Json(req): Json<WatermarkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let details = state.videos.watermark_video(video_id, &req.text).await?;
    Ok(Json(details))
}

/// Request body for `POST /api/videos/{id}/audio`.
#[derive(Debug, Deserialize, Default)]
pub struct ExtractAudioRequest {
    pub format: Option<String>,
}

/// `POST /api/videos/{id}/audio` — extract the audio track of the stored
/// original and record it as an `audio` rendition. Defaults to mp3.
pub async fn extract_audio(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
    Json(req): Json<ExtractAudioRequest>,
) -> Result<impl IntoResponse, AppError> {
    let details = state
        .videos
        .extract_audio(video_id, req.format.as_deref())
        .await?;
    Ok(Json(details))
}

/// `DELETE /api/videos/{id}` — remove the record and its media files.
///
/// Refused with 409 while a pending or running merge job references the
/// video.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.videos.delete_video(video_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
