//! Represents an uploaded video and its transcoded renditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Processing lifecycle of a video.
///
/// `Pending -> Processing -> Completed | Failed`. `Completed` and `Failed` are
/// terminal for the upload attempt; a re-upload creates a new row. `Merged` is
/// applied to constituents of a completed merge job.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Merged,
}

/// A video record as stored in the `videos` table.
///
/// The stored filename is UUID-based and never derived from the user-supplied
/// name, so untrusted input can never influence on-disk paths.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Video {
    /// Internal UUID, also used in API paths.
    pub id: Uuid,

    /// Filename as supplied by the uploader. Display only.
    pub original_file_name: String,

    /// Server-issued filename of the assembled original under the storage dir.
    pub stored_file_name: String,

    /// Thumbnail filename under the thumbnail dir, set during processing.
    pub thumbnail_file_name: Option<String>,

    /// Size of the assembled original in bytes.
    pub file_size_bytes: i64,

    /// Duration reported by ffprobe.
    pub duration_seconds: f64,

    /// Probed dimensions. `None` means unknown, never zero-as-unknown.
    pub width: Option<i64>,
    pub height: Option<i64>,

    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<i64>,

    /// Identity of the uploader, as reported by the (external) auth layer.
    pub uploaded_by: String,

    pub status: VideoStatus,

    /// Populated only when `status` is `Failed`.
    pub processing_error: Option<String>,

    pub is_published: bool,

    /// Stamped the first time a published video finishes processing.
    pub published_at: Option<DateTime<Utc>>,

    /// Filename of the merged output this video was folded into, if any.
    pub merged_video_path: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// One transcoded quality-ladder rendition of a video.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Rendition {
    pub video_id: Uuid,

    /// Quality label, e.g. `720p` or `original`.
    pub quality: String,

    /// Rendition filename under the storage dir.
    pub file_name: String,

    pub created_at: DateTime<Utc>,
}

/// API shape of a video: the row plus its rendition map.
#[derive(Serialize, Debug)]
pub struct VideoDetails {
    #[serde(flatten)]
    pub video: Video,

    /// quality label -> rendition filename.
    pub renditions: BTreeMap<String, String>,
}

impl VideoDetails {
    pub fn new(video: Video, renditions: Vec<Rendition>) -> Self {
        let renditions = renditions
            .into_iter()
            .map(|r| (r.quality, r.file_name))
            .collect();
        Self { video, renditions }
    }
}

/// Paginated listing response for `GET /api/videos`.
#[derive(Serialize, Debug)]
pub struct VideoPage {
    pub videos: Vec<VideoDetails>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}
