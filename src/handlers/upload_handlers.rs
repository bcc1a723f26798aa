//! HTTP handlers for chunked uploads.
//! Streams chunk bodies to disk without buffering them in memory and
//! delegates assembly to `VideoService`.

use crate::{
    errors::AppError,
    services::{AppState, video_service::FinalizeUpload},
};
use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::Field,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::io;
use tracing::warn;

/// Request body for `POST /api/uploads/{upload_id}/finalize`.
#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub total_chunks: u32,
    pub original_file_name: Option<String>,
    pub uploaded_by: Option<String>,
    #[serde(default)]
    pub publish: bool,
}

/// Accept one chunk via `POST /api/uploads/{upload_id}/chunks`.
///
/// Multipart form with `chunk_index` and `total_chunks` text fields followed
/// by the binary `chunk` field. The metadata fields must precede the data so
/// the body can be streamed straight to disk.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut chunk_index: Option<u32> = None;
    let mut total_chunks: Option<u32> = None;
    let mut stored = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("chunk_index") => chunk_index = Some(parse_u32(field, "chunk_index").await?),
            Some("total_chunks") => total_chunks = Some(parse_u32(field, "total_chunks").await?),
            Some("chunk") => {
                let (Some(index), Some(total)) = (chunk_index, total_chunks) else {
                    return Err(AppError::bad_request(
                        "missing_field",
                        "`chunk_index` and `total_chunks` must precede the `chunk` data",
                    ));
                };
                let stream = field.map(|part| part.map_err(io::Error::other));
                state
                    .videos
                    .save_chunk(&upload_id, index, total, stream)
                    .await?;
                stored = true;
            }
            other => {
                warn!("ignoring unexpected multipart field {:?}", other);
            }
        }
    }

    if !stored {
        return Err(AppError::bad_request(
            "missing_field",
            "multipart field `chunk` is required",
        ));
    }

    Ok(Json(json!({
        "success": true,
        "upload_id": upload_id,
        "chunk_index": chunk_index,
    })))
}

/// `POST /api/uploads/{upload_id}/finalize` — assemble the chunks, create the
/// video record and queue background processing. Responds 201 with the video
/// still in `pending`.
pub async fn finalize_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Json(req): Json<FinalizeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let details = state
        .videos
        .finalize_upload(
            &upload_id,
            FinalizeUpload {
                total_chunks: req.total_chunks,
                original_file_name: req.original_file_name,
                uploaded_by: req.uploaded_by,
                publish: req.publish,
            },
        )
        .await?;

    let worker = state.videos.clone();
    let video_id = details.video.id;
    state.jobs.submit(worker.process_video(video_id)).await?;

    Ok((StatusCode::CREATED, Json(details)))
}

/// `DELETE /api/uploads/{upload_id}` — abandon an in-flight upload and drop
/// its temp chunks. Idempotent.
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.videos.cancel_upload(&upload_id).await?;
    Ok(Json(json!({ "success": true })))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::bad_request("malformed_multipart", err.to_string())
}

async fn parse_u32(field: Field<'_>, name: &'static str) -> Result<u32, AppError> {
    let text = field.text().await.map_err(multipart_error)?;
    text.trim().parse().map_err(|_| {
        AppError::bad_request(
            "invalid_field",
            format!("field `{name}` must be an unsigned integer"),
        )
    })
}
