use crate::media::MediaError;
use crate::services::chunk_store::ChunkStoreError;
use crate::services::merge_service::MergeError;
use crate::services::video_service::VideoError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for handler errors that keeps the message local.
/// `code` is a stable machine-readable tag; `message` is for humans.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<ChunkStoreError> for AppError {
    fn from(err: ChunkStoreError) -> Self {
        let message = err.to_string();
        match err {
            ChunkStoreError::InvalidUploadId => {
                AppError::bad_request("invalid_upload_id", message)
            }
            ChunkStoreError::IndexOutOfRange { .. } => {
                AppError::bad_request("chunk_index_out_of_range", message)
            }
            ChunkStoreError::UploadNotFound(_) => {
                AppError::not_found("upload_not_found", message)
            }
            ChunkStoreError::MissingChunk(_) => AppError::bad_request("missing_chunk", message),
            ChunkStoreError::Io(_) => AppError::internal(message),
        }
    }
}

impl From<VideoError> for AppError {
    fn from(err: VideoError) -> Self {
        let message = err.to_string();
        match err {
            VideoError::NotFound(_) => AppError::not_found("video_not_found", message),
            VideoError::Busy(_) => AppError::new(StatusCode::CONFLICT, "video_busy", message),
            VideoError::UnsupportedFileType(_) => {
                AppError::bad_request("unsupported_file_type", message)
            }
            VideoError::InvalidTrimRange { .. } => {
                AppError::bad_request("invalid_trim_range", message)
            }
            VideoError::Chunks(inner) => inner.into(),
            VideoError::Media(inner) => inner.into(),
            VideoError::Sqlx(_) | VideoError::Io(_) => AppError::internal(message),
        }
    }
}

impl From<MergeError> for AppError {
    fn from(err: MergeError) -> Self {
        let message = err.to_string();
        match err {
            MergeError::InsufficientVideos(_) => {
                AppError::bad_request("insufficient_videos", message)
            }
            MergeError::VideosNotFound(_) => AppError::bad_request("videos_not_found", message),
            MergeError::NotFound(_) => AppError::not_found("merge_job_not_found", message),
            MergeError::SourceFileMissing(_)
            | MergeError::Media(_)
            | MergeError::Sqlx(_)
            | MergeError::Io(_) => AppError::internal(message),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        let message = err.to_string();
        match err {
            MediaError::NoVideoStream(_) => AppError::bad_request("no_video_stream", message),
            MediaError::NoAudioStream(_) => AppError::bad_request("no_audio_stream", message),
            MediaError::ProbeFailed { .. } => {
                AppError::bad_request("unreadable_media", message)
            }
            MediaError::ToolUnavailable { .. }
            | MediaError::TranscodeFailed { .. }
            | MediaError::Io(_) => AppError::internal(message),
        }
    }
}

impl From<crate::jobs::JobError> for AppError {
    fn from(err: crate::jobs::JobError) -> Self {
        AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_unavailable",
            err.to_string(),
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
