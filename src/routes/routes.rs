//! Defines routes for the upload, video and merge-job APIs.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST   /api/uploads/{upload_id}/chunks` — accept one chunk (multipart)
//!   - `POST   /api/uploads/{upload_id}/finalize` — assemble and queue processing
//!   - `DELETE /api/uploads/{upload_id}` — abandon an in-flight upload
//!
//! - **Video endpoints**
//!   - `GET    /api/videos` — list videos (supports page, page_size)
//!   - `GET    /api/videos/{id}` — one video with its rendition map
//!   - `POST   /api/videos/{id}/trim` — cut a range into a new rendition
//!   - `POST   /api/videos/{id}/watermark` — burn in a text watermark
//!   - `POST   /api/videos/{id}/audio` — extract the audio track
//!   - `DELETE /api/videos/{id}` — remove record and media files
//!
//! - **Merge-job endpoints**
//!   - `POST   /api/merge-jobs` — create and queue a merge
//!   - `GET    /api/merge-jobs` — list jobs (supports page, page_size)
//!   - `GET    /api/merge-jobs/{id}` — job status and progress

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        merge_handlers::{create_merge_job, get_merge_job, list_merge_jobs},
        upload_handlers::{cancel_upload, finalize_upload, upload_chunk},
        video_handlers::{
            delete_video, extract_audio, get_video, list_videos, trim_video, watermark_video,
        },
    },
    services::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build and return the router for the whole API.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload lifecycle
        .route("/api/uploads/{upload_id}/chunks", post(upload_chunk))
        .route("/api/uploads/{upload_id}/finalize", post(finalize_upload))
        .route("/api/uploads/{upload_id}", delete(cancel_upload))
        // video catalogue
        .route("/api/videos", get(list_videos))
        .route("/api/videos/{id}", get(get_video).delete(delete_video))
        .route("/api/videos/{id}/trim", post(trim_video))
        .route("/api/videos/{id}/watermark", post(watermark_video))
        .route("/api/videos/{id}/audio", post(extract_audio))
        // merge jobs
        .route("/api/merge-jobs", post(create_merge_job).get(list_merge_jobs))
        .route("/api/merge-jobs/{id}", get(get_merge_job))
}
