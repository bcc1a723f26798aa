//! Represents a multi-video merge job and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Merge job lifecycle: `Pending -> InProgress -> Completed | Failed`.
/// Terminal once completed or failed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A merge job row. Constituent video ids live in `merge_job_videos`, ordered
/// by `position` — that order is playback order in the merged output.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MergeJob {
    /// Internal UUID, also used in API paths.
    pub id: Uuid,

    /// Opaque token embedded in the merged output filename.
    pub job_token: String,

    pub status: MergeStatus,

    /// 0-100, monotonically non-decreasing while `InProgress`, exactly 100 at
    /// `Completed`.
    pub progress: i64,

    /// Sum of constituent durations, computed when the merge starts.
    pub total_duration_seconds: Option<f64>,

    /// Filename of the merged output under the storage dir.
    pub output_path: Option<String>,

    /// Populated only when `status` is `Failed`.
    pub error_message: Option<String>,

    pub created_by: String,

    pub created_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

/// API shape of a merge job: the row plus its ordered constituent ids.
#[derive(Serialize, Debug)]
pub struct MergeJobDetails {
    #[serde(flatten)]
    pub job: MergeJob,

    /// Constituent video ids in playback order.
    pub video_ids: Vec<Uuid>,
}

/// Paginated listing response for `GET /api/merge-jobs`.
#[derive(Serialize, Debug)]
pub struct MergeJobPage {
    pub jobs: Vec<MergeJobDetails>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}
