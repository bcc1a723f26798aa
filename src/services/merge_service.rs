//! MergeService — the merge orchestrator.
//!
//! Validates merge requests synchronously (arity, existence), persists the
//! job, and runs the actual concatenation in the background while streaming
//! monotonic progress into the job row.

use crate::media::MediaError;
use crate::media::transcode::{ProgressFn, Transcoder};
use crate::models::merge_job::{MergeJob, MergeJobDetails, MergeJobPage, MergeStatus};
use crate::models::video::Video;
use crate::services::{clamp_paging, total_pages};
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("a merge requires at least 2 videos, got {0}")]
    InsufficientVideos(usize),
    #[error("unknown video id(s): {}", format_ids(.0))]
    VideosNotFound(Vec<Uuid>),
    #[error("merge job `{0}` not found")]
    NotFound(Uuid),
    #[error("source file missing: {0}")]
    SourceFileMissing(String),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn format_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type MergeResult<T> = Result<T, MergeError>;

#[derive(Clone)]
pub struct MergeService {
    db: Arc<SqlitePool>,
    transcoder: Arc<Transcoder>,
}

impl MergeService {
    pub fn new(db: Arc<SqlitePool>, transcoder: Arc<Transcoder>) -> Self {
        Self { db, transcoder }
    }

    /// Validate and persist a merge job in `Pending`. The id list is playback
    /// order and is stored as such. Returns immediately — the caller submits
    /// [`run_merge_job`](Self::run_merge_job) to the background pool.
    ///
    /// Validation failures create no job row.
    pub async fn create_merge_job(
        &self,
        video_ids: Vec<Uuid>,
        created_by: Option<String>,
    ) -> MergeResult<MergeJobDetails> {
        if video_ids.len() < 2 {
            return Err(MergeError::InsufficientVideos(video_ids.len()));
        }

        let mut unique: Vec<Uuid> = Vec::new();
        for id in &video_ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM videos WHERE id IN (");
        let mut args = qb.separated(", ");
        for id in &unique {
            args.push_bind(*id);
        }
        qb.push(")");
        let found: Vec<Uuid> = qb.build_query_scalar().fetch_all(&*self.db).await?;
        let missing: Vec<Uuid> = unique
            .iter()
            .filter(|id| !found.contains(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(MergeError::VideosNotFound(missing));
        }

        let job = MergeJob {
            id: Uuid::new_v4(),
            job_token: Uuid::new_v4().to_string(),
            status: MergeStatus::Pending,
            progress: 0,
            total_duration_seconds: None,
            output_path: None,
            error_message: None,
            created_by: created_by.unwrap_or_else(|| "anonymous".into()),
            created_at: Utc::now(),
            completed_at: None,
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO merge_jobs (id, job_token, status, progress, created_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id)
        .bind(&job.job_token)
        .bind(job.status)
        .bind(job.progress)
        .bind(&job.created_by)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;
        for (position, video_id) in video_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO merge_job_videos (job_id, position, video_id) VALUES (?, ?, ?)",
            )
            .bind(job.id)
            .bind(position as i64)
            .bind(video_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!("merge job {} created with {} video(s)", job.id, video_ids.len());
        Ok(MergeJobDetails { job, video_ids })
    }

    /// Background merge phase. Any failure lands in `Failed` with the message
    /// persisted and the constituent videos untouched; the job row always
    /// leaves `InProgress`.
    pub async fn run_merge_job(self, job_id: Uuid) {
        if let Err(err) = self.execute_merge(job_id).await {
            error!("merge job {} failed: {}", job_id, err);
            let persisted = sqlx::query(
                "UPDATE merge_jobs SET status = 'failed', error_message = ? \
                 WHERE id = ? AND status IN ('pending', 'in_progress')",
            )
            .bind(err.to_string())
            .bind(job_id)
            .execute(&*self.db)
            .await;
            if let Err(persist_err) = persisted {
                error!(
                    "could not persist failure for merge job {}: {}",
                    job_id, persist_err
                );
            }
        }
    }

    async fn execute_merge(&self, job_id: Uuid) -> MergeResult<()> {
        let job = self.fetch_job(job_id).await?;
        let claimed = sqlx::query(
            "UPDATE merge_jobs SET status = 'in_progress', progress = 0 \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(job_id)
        .execute(&*self.db)
        .await?;
        if claimed.rows_affected() == 0 {
            warn!("merge job {} not claimable, skipping", job_id);
            return Ok(());
        }

        // Constituents in caller-specified playback order, not creation order.
        let videos: Vec<Video> = sqlx::query_as(
            "SELECT v.* FROM merge_job_videos mjv \
             JOIN videos v ON v.id = mjv.video_id \
             WHERE mjv.job_id = ? ORDER BY mjv.position",
        )
        .bind(job_id)
        .fetch_all(&*self.db)
        .await?;

        let total_duration: f64 = videos.iter().map(|v| v.duration_seconds).sum();
        sqlx::query("UPDATE merge_jobs SET total_duration_seconds = ? WHERE id = ?")
            .bind(total_duration)
            .bind(job_id)
            .execute(&*self.db)
            .await?;

        let mut paths: Vec<PathBuf> = Vec::with_capacity(videos.len());
        for video in &videos {
            let path = self.transcoder.video_path(&video.stored_file_name);
            if !fs::try_exists(&path).await? {
                return Err(MergeError::SourceFileMissing(path.display().to_string()));
            }
            paths.push(path);
        }

        // Progress flows through a channel so the blocking-read side of the
        // transcoder never performs database writes itself.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u8>();
        let writer_db = self.db.clone();
        let writer = tokio::spawn(async move {
            while let Some(percent) = progress_rx.recv().await {
                if let Err(err) = persist_progress(&writer_db, job_id, percent).await {
                    warn!("progress write failed for merge job {}: {}", job_id, err);
                }
            }
        });
        let observer: ProgressFn = Arc::new(move |percent| {
            let _ = progress_tx.send(percent);
        });

        let result = self
            .transcoder
            .concatenate(&paths, &job.job_token, Some(observer))
            .await;
        let _ = writer.await;
        let output = result?;

        sqlx::query(
            "UPDATE merge_jobs SET status = 'completed', progress = 100, \
             completed_at = ?, output_path = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(&output)
        .bind(job_id)
        .execute(&*self.db)
        .await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE videos SET status = 'merged', merged_video_path = ",
        );
        qb.push_bind(&output);
        qb.push(" WHERE id IN (");
        let mut args = qb.separated(", ");
        for video in &videos {
            args.push_bind(video.id);
        }
        qb.push(")");
        qb.build().execute(&*self.db).await?;

        info!(
            "merge job {} completed: {} ({} input(s), {:.1}s)",
            job_id,
            output,
            videos.len(),
            total_duration
        );
        Ok(())
    }

    pub async fn get_job(&self, job_id: Uuid) -> MergeResult<MergeJobDetails> {
        let job = self.fetch_job(job_id).await?;
        let video_ids = self.fetch_constituents(job_id).await?;
        Ok(MergeJobDetails { job, video_ids })
    }

    /// Newest-first page of merge jobs.
    pub async fn list_jobs(
        &self,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> MergeResult<MergeJobPage> {
        let (page, page_size) = clamp_paging(page, page_size);
        let total_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM merge_jobs")
            .fetch_one(&*self.db)
            .await?;

        let rows: Vec<MergeJob> = sqlx::query_as(
            "SELECT id, job_token, status, progress, total_duration_seconds, output_path, \
             error_message, created_by, created_at, completed_at \
             FROM merge_jobs ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&*self.db)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for job in rows {
            let video_ids = self.fetch_constituents(job.id).await?;
            jobs.push(MergeJobDetails { job, video_ids });
        }

        Ok(MergeJobPage {
            jobs,
            total_count,
            page,
            page_size,
            total_pages: total_pages(total_count, page_size),
        })
    }

    async fn fetch_job(&self, job_id: Uuid) -> MergeResult<MergeJob> {
        sqlx::query_as(
            "SELECT id, job_token, status, progress, total_duration_seconds, output_path, \
             error_message, created_by, created_at, completed_at \
             FROM merge_jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => MergeError::NotFound(job_id),
            other => MergeError::Sqlx(other),
        })
    }

    async fn fetch_constituents(&self, job_id: Uuid) -> MergeResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar(
            "SELECT video_id FROM merge_job_videos WHERE job_id = ? ORDER BY position",
        )
        .bind(job_id)
        .fetch_all(&*self.db)
        .await?)
    }
}

/// Guarded write: progress only ever moves forward, so a late small sample
/// can never make the job appear to regress.
async fn persist_progress(db: &SqlitePool, job_id: Uuid, percent: u8) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE merge_jobs SET progress = ? WHERE id = ? AND progress < ?")
        .bind(percent as i64)
        .bind(job_id)
        .bind(percent as i64)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FfmpegTools;
    use crate::models::video::VideoStatus;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::{TempDir, tempdir};

    async fn build_service(dir: &TempDir, tools: FfmpegTools) -> MergeService {
        let storage = dir.path().join("videos");
        let thumbs = dir.path().join("thumbnails");
        for d in [&storage, &thumbs] {
            std::fs::create_dir_all(d).unwrap();
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        let db = Arc::new(pool);

        let transcoder = Arc::new(Transcoder::new(tools, &storage, &thumbs));
        MergeService::new(db, transcoder)
    }

    async fn test_service() -> (TempDir, MergeService) {
        let dir = tempdir().unwrap();
        let tools = FfmpegTools {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
        };
        let service = build_service(&dir, tools).await;
        (dir, service)
    }

    /// Shell-script stand-ins for the media tools: ffprobe reports a fixed
    /// h264+aac clip and ffmpeg always succeeds.
    fn stub_tools(bin_dir: &std::path::Path) -> FfmpegTools {
        use std::os::unix::fs::PermissionsExt;

        const PROBE_JSON: &str = r#"{"streams":[{"codec_type":"video","codec_name":"h264","width":1280,"height":720,"r_frame_rate":"30/1"},{"codec_type":"audio","codec_name":"aac"}],"format":{"duration":"10.000000"}}"#;
        let ffprobe = bin_dir.join("ffprobe");
        std::fs::write(&ffprobe, format!("#!/bin/sh\necho '{PROBE_JSON}'\n")).unwrap();
        let ffmpeg = bin_dir.join("ffmpeg");
        std::fs::write(&ffmpeg, "#!/bin/sh\nexit 0\n").unwrap();
        for bin in [&ffprobe, &ffmpeg] {
            std::fs::set_permissions(bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        FfmpegTools { ffmpeg, ffprobe }
    }

    async fn stubbed_service() -> (TempDir, MergeService) {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let tools = stub_tools(&bin);
        let service = build_service(&dir, tools).await;
        (dir, service)
    }

    async fn seed_video(service: &MergeService, stored: &str, duration: f64) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO videos (id, original_file_name, stored_file_name, file_size_bytes, \
             duration_seconds, uploaded_by, status, is_published, created_at) \
             VALUES (?, ?, ?, 1, ?, 'tester', 'completed', 0, ?)",
        )
        .bind(id)
        .bind(format!("{stored}.orig"))
        .bind(stored)
        .bind(duration)
        .bind(Utc::now())
        .execute(&*service.db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn fewer_than_two_videos_is_rejected_without_a_row() {
        let (_dir, service) = test_service().await;
        let a = seed_video(&service, "a.mp4", 1.0).await;

        let err = service
            .create_merge_job(vec![a], None)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::InsufficientVideos(1)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM merge_jobs")
            .fetch_one(&*service.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn unknown_ids_are_listed_in_the_error() {
        let (_dir, service) = test_service().await;
        let a = seed_video(&service, "a.mp4", 1.0).await;
        let ghost = Uuid::new_v4();

        let err = service
            .create_merge_job(vec![a, ghost], None)
            .await
            .unwrap_err();
        match err {
            MergeError::VideosNotFound(missing) => assert_eq!(missing, vec![ghost]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn playback_order_is_preserved_not_sorted() {
        let (_dir, service) = test_service().await;
        let a = seed_video(&service, "a.mp4", 1.0).await;
        let b = seed_video(&service, "b.mp4", 2.0).await;
        let c = seed_video(&service, "c.mp4", 3.0).await;

        let requested = vec![c, a, b];
        let details = service
            .create_merge_job(requested.clone(), Some("tester".into()))
            .await
            .unwrap();
        assert_eq!(details.job.status, MergeStatus::Pending);
        assert_eq!(details.job.progress, 0);
        assert_eq!(details.video_ids, requested);

        // Round-trip through the read path as well.
        let fetched = service.get_job(details.job.id).await.unwrap();
        assert_eq!(fetched.video_ids, requested);
    }

    #[tokio::test]
    async fn missing_source_file_fails_the_job_and_spares_constituents() {
        let (_dir, service) = test_service().await;
        let a = seed_video(&service, "a.mp4", 1.0).await;
        let b = seed_video(&service, "b.mp4", 2.0).await;
        // Only one of the two source files exists on disk.
        std::fs::write(service.transcoder.video_path("a.mp4"), b"x").unwrap();

        let details = service.create_merge_job(vec![a, b], None).await.unwrap();
        service.clone().run_merge_job(details.job.id).await;

        let job = service.get_job(details.job.id).await.unwrap().job;
        assert_eq!(job.status, MergeStatus::Failed);
        assert!(job.error_message.unwrap().contains("b.mp4"));

        let status: VideoStatus = sqlx::query_scalar("SELECT status FROM videos WHERE id = ?")
            .bind(a)
            .fetch_one(&*service.db)
            .await
            .unwrap();
        assert_eq!(status, VideoStatus::Completed);
    }

    #[tokio::test]
    async fn completed_merge_reports_full_progress_and_marks_constituents() {
        let (_dir, service) = stubbed_service().await;
        let a = seed_video(&service, "a.mp4", 4.0).await;
        let b = seed_video(&service, "b.mp4", 6.0).await;
        for name in ["a.mp4", "b.mp4"] {
            std::fs::write(service.transcoder.video_path(name), b"x").unwrap();
        }

        let details = service.create_merge_job(vec![a, b], None).await.unwrap();
        service.clone().run_merge_job(details.job.id).await;

        let job = service.get_job(details.job.id).await.unwrap().job;
        assert_eq!(job.status, MergeStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert_eq!(job.total_duration_seconds, Some(10.0));
        let output = job.output_path.unwrap();
        assert!(output.starts_with(&format!("merged_{}_", job.job_token)));

        for id in [a, b] {
            let (status, merged_path): (VideoStatus, Option<String>) = sqlx::query_as(
                "SELECT status, merged_video_path FROM videos WHERE id = ?",
            )
            .bind(id)
            .fetch_one(&*service.db)
            .await
            .unwrap();
            assert_eq!(status, VideoStatus::Merged);
            assert_eq!(merged_path.as_deref(), Some(output.as_str()));
        }
    }

    #[tokio::test]
    async fn progress_writes_never_regress() {
        let (_dir, service) = test_service().await;
        let a = seed_video(&service, "a.mp4", 1.0).await;
        let b = seed_video(&service, "b.mp4", 1.0).await;
        let details = service.create_merge_job(vec![a, b], None).await.unwrap();
        let job_id = details.job.id;

        persist_progress(&service.db, job_id, 50).await.unwrap();
        persist_progress(&service.db, job_id, 30).await.unwrap();
        persist_progress(&service.db, job_id, 50).await.unwrap();

        let progress: i64 = sqlx::query_scalar("SELECT progress FROM merge_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&*service.db)
            .await
            .unwrap();
        assert_eq!(progress, 50);

        persist_progress(&service.db, job_id, 80).await.unwrap();
        let progress: i64 = sqlx::query_scalar("SELECT progress FROM merge_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&*service.db)
            .await
            .unwrap();
        assert_eq!(progress, 80);
    }

    #[tokio::test]
    async fn jobs_list_newest_first() {
        let (_dir, service) = test_service().await;
        let a = seed_video(&service, "a.mp4", 1.0).await;
        let b = seed_video(&service, "b.mp4", 1.0).await;

        let first = service.create_merge_job(vec![a, b], None).await.unwrap();
        let second = service.create_merge_job(vec![b, a], None).await.unwrap();
        // Distinct timestamps so ordering is deterministic.
        sqlx::query("UPDATE merge_jobs SET created_at = ? WHERE id = ?")
            .bind(Utc::now() + chrono::Duration::seconds(5))
            .bind(second.job.id)
            .execute(&*service.db)
            .await
            .unwrap();

        let listing = service.list_jobs(None, None).await.unwrap();
        assert_eq!(listing.total_count, 2);
        assert_eq!(listing.jobs[0].job.id, second.job.id);
        assert_eq!(listing.jobs[1].job.id, first.job.id);
    }

    #[tokio::test]
    async fn get_job_not_found() {
        let (_dir, service) = test_service().await;
        let err = service.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MergeError::NotFound(_)));
    }
}
