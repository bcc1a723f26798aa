//! Service layer: chunk storage, the upload/processing orchestrator, and the
//! merge orchestrator, plus the shared application state handed to handlers.

pub mod chunk_store;
pub mod merge_service;
pub mod video_service;

use crate::jobs::JobQueue;
use merge_service::MergeService;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use video_service::VideoService;

/// Shared state cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub videos: VideoService,
    pub merges: MergeService,
    pub jobs: JobQueue,
    /// Root of permanent media storage; used by readiness checks.
    pub storage_dir: PathBuf,
}

/// Ceiling division for pagination metadata.
pub(crate) fn total_pages(total_count: i64, page_size: i64) -> i64 {
    if page_size <= 0 {
        return 0;
    }
    (total_count + page_size - 1) / page_size
}

/// Clamp caller-supplied paging to sane bounds: page >= 1, 1 <= size <= 100.
pub(crate) fn clamp_paging(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(20).clamp(1, 100);
    (page, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    #[test]
    fn paging_is_clamped() {
        assert_eq!(clamp_paging(None, None), (1, 20));
        assert_eq!(clamp_paging(Some(0), Some(1000)), (1, 100));
        assert_eq!(clamp_paging(Some(3), Some(5)), (3, 5));
    }
}
