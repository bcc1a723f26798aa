//! VideoService — the upload orchestrator.
//!
//! Owns the per-video state machine: chunk receipt, finalize (assembly +
//! probe + row creation), the background processing fan-out (thumbnail and
//! quality-ladder renditions), deletion, and read paths. Metadata lives in
//! SQLite; payloads live on disk under the storage/thumbnail dirs.

use crate::media::quality::Quality;
use crate::media::transcode::Transcoder;
use crate::media::MediaError;
use crate::models::video::{Rendition, Video, VideoDetails, VideoPage, VideoStatus};
use crate::services::chunk_store::{ChunkStore, ChunkStoreError};
use crate::services::{clamp_paging, total_pages};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

const ALLOWED_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "wmv", "flv", "mkv", "webm"];

const AUDIO_FORMATS: [&str; 5] = ["mp3", "aac", "wav", "ogg", "flac"];

const VIDEO_COLUMNS: &str = "id, original_file_name, stored_file_name, thumbnail_file_name, \
     file_size_bytes, duration_seconds, width, height, video_codec, audio_codec, frame_rate, \
     bit_rate, uploaded_by, status, processing_error, is_published, published_at, \
     merged_video_path, created_at";

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video `{0}` not found")]
    NotFound(Uuid),
    #[error("video `{0}` is referenced by an active merge job")]
    Busy(Uuid),
    #[error("unsupported file type `{0}`")]
    UnsupportedFileType(String),
    #[error("invalid trim range: start {start}s, duration {duration}s")]
    InvalidTrimRange { start: f64, duration: f64 },
    #[error(transparent)]
    Chunks(#[from] ChunkStoreError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type VideoResult<T> = Result<T, VideoError>;

/// Caller-supplied metadata for finalizing an upload.
#[derive(Clone, Debug, Default)]
pub struct FinalizeUpload {
    pub total_chunks: u32,
    pub original_file_name: Option<String>,
    pub uploaded_by: Option<String>,
    pub publish: bool,
}

#[derive(Clone)]
pub struct VideoService {
    db: Arc<SqlitePool>,
    chunks: ChunkStore,
    transcoder: Arc<Transcoder>,
}

impl VideoService {
    pub fn new(db: Arc<SqlitePool>, chunks: ChunkStore, transcoder: Arc<Transcoder>) -> Self {
        Self {
            db,
            chunks,
            transcoder,
        }
    }

    /// Accept one chunk of an in-flight upload. Repeatable, any order.
    pub async fn save_chunk<S>(
        &self,
        upload_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        stream: S,
    ) -> VideoResult<()>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.chunks
            .save_chunk(upload_id, chunk_index, total_chunks, stream)
            .await?;
        Ok(())
    }

    /// Drop in-flight temp chunks. Has no effect once finalized.
    pub async fn cancel_upload(&self, upload_id: &str) -> VideoResult<()> {
        self.chunks.cancel(upload_id).await?;
        Ok(())
    }

    /// Assemble the chunks, probe the result, and create the video row in
    /// `Pending`. Returns immediately — the caller submits
    /// [`process_video`](Self::process_video) to the background pool.
    ///
    /// Nothing is persisted when assembly or probing fails; a half-finalized
    /// upload leaves no row behind.
    pub async fn finalize_upload(
        &self,
        upload_id: &str,
        req: FinalizeUpload,
    ) -> VideoResult<VideoDetails> {
        let extension = validate_extension(req.original_file_name.as_deref())?;
        let assembled = self
            .chunks
            .finalize(upload_id, req.total_chunks, &extension)
            .await?;

        let info = match self.transcoder.probe_video(&assembled).await {
            Ok(info) => info,
            Err(err) => {
                // The assembled file is useless without metadata; remove it so
                // nothing orphaned refers to it.
                let _ = fs::remove_file(&assembled).await;
                return Err(err.into());
            }
        };

        let stored_file_name = assembled
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let video = Video {
            id: Uuid::new_v4(),
            original_file_name: req
                .original_file_name
                .unwrap_or_else(|| stored_file_name.clone()),
            stored_file_name,
            thumbnail_file_name: None,
            file_size_bytes: info.file_size_bytes as i64,
            duration_seconds: info.duration_seconds.unwrap_or(0.0),
            width: info.width.map(i64::from),
            height: info.height.map(i64::from),
            video_codec: info.video_codec,
            audio_codec: info.audio_codec,
            frame_rate: info.frame_rate,
            bit_rate: info.bit_rate.map(|b| b as i64),
            uploaded_by: req.uploaded_by.unwrap_or_else(|| "anonymous".into()),
            status: VideoStatus::Pending,
            processing_error: None,
            is_published: req.publish,
            published_at: None,
            merged_video_path: None,
            created_at: Utc::now(),
        };

        if let Err(err) = self.insert_video(&video).await {
            let _ = fs::remove_file(&assembled).await;
            return Err(err);
        }

        info!(
            "upload {} finalized as video {} ({} bytes)",
            upload_id, video.id, video.file_size_bytes
        );
        Ok(VideoDetails::new(video, Vec::new()))
    }

    /// Background processing phase: thumbnail plus quality-ladder fan-out.
    ///
    /// The row always leaves `Processing`: any fatal error lands in `Failed`
    /// with the message persisted, and the original HTTP caller only ever
    /// observes the outcome through status polling.
    pub async fn process_video(self, video_id: Uuid) {
        if let Err(err) = self.run_processing(video_id).await {
            error!("processing failed for video {}: {}", video_id, err);
            if let Err(persist_err) = self.mark_failed(video_id, &err.to_string()).await {
                error!(
                    "could not persist failure for video {}: {}",
                    video_id, persist_err
                );
            }
        }
    }

    async fn run_processing(&self, video_id: Uuid) -> VideoResult<()> {
        let claimed = sqlx::query("UPDATE videos SET status = 'processing' WHERE id = ? AND status = 'pending'")
            .bind(video_id)
            .execute(&*self.db)
            .await?;
        if claimed.rows_affected() == 0 {
            warn!("video {} not claimable for processing, skipping", video_id);
            return Ok(());
        }

        let video = self.fetch_video(video_id).await?;
        let source = self.transcoder.video_path(&video.stored_file_name);

        // Thumbnail failure is fatal to the processing phase.
        let thumbnail = self.transcoder.generate_thumbnail(&source, None).await?;
        sqlx::query("UPDATE videos SET thumbnail_file_name = ? WHERE id = ?")
            .bind(&thumbnail)
            .bind(video_id)
            .execute(&*self.db)
            .await?;

        // Quality fan-out. One rung failing is logged and skipped — partial
        // success keeps the other renditions and the original usable.
        let source_height = video.height.unwrap_or(0) as u32;
        for quality in Quality::LADDER {
            let (_, target_height) = quality.dimensions();
            if source_height < target_height {
                info!(
                    "video {}: source height {} below {}, skipping rung",
                    video_id, source_height, quality
                );
                continue;
            }
            match self.transcoder.convert_quality(&source, quality, None).await {
                Ok(file_name) => {
                    self.insert_rendition(video_id, quality.label(), &file_name)
                        .await?;
                }
                Err(err) => {
                    warn!("video {}: {} conversion failed: {}", video_id, quality, err);
                }
            }
        }

        // The original is always an available rendition.
        self.insert_rendition(video_id, "original", &video.stored_file_name)
            .await?;

        // Single atomic write: terminal status plus first-publish stamp.
        sqlx::query(
            "UPDATE videos SET status = 'completed', published_at = \
             CASE WHEN is_published = 1 AND published_at IS NULL THEN ? ELSE published_at END \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(Utc::now())
        .bind(video_id)
        .execute(&*self.db)
        .await?;

        info!("video {} processing completed", video_id);
        Ok(())
    }

    async fn mark_failed(&self, video_id: Uuid, message: &str) -> VideoResult<()> {
        sqlx::query(
            "UPDATE videos SET status = 'failed', processing_error = ? \
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(message)
        .bind(video_id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Remove the row and every on-disk file it references. Filesystem
    /// failures are logged but never block row removal — an orphaned file is
    /// recoverable, a record that can never be deleted is not.
    ///
    /// Refused while a non-terminal merge job references the video, so an
    /// in-flight merge never loses a source from under it.
    pub async fn delete_video(&self, video_id: Uuid) -> VideoResult<()> {
        let video = self.fetch_video(video_id).await?;

        let active_jobs: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM merge_job_videos mjv \
             JOIN merge_jobs mj ON mj.id = mjv.job_id \
             WHERE mjv.video_id = ? AND mj.status IN ('pending', 'in_progress')",
        )
        .bind(video_id)
        .fetch_one(&*self.db)
        .await?;
        if active_jobs > 0 {
            return Err(VideoError::Busy(video_id));
        }

        let renditions = self.fetch_renditions(video_id).await?;
        let mut files: BTreeSet<String> = renditions.into_iter().map(|r| r.file_name).collect();
        files.insert(video.stored_file_name.clone());
        for file_name in files {
            self.remove_media_file(self.transcoder.video_path(&file_name))
                .await;
        }
        if let Some(thumbnail) = &video.thumbnail_file_name {
            self.remove_media_file(self.transcoder.thumbnail_path(thumbnail))
                .await;
        }

        sqlx::query("DELETE FROM renditions WHERE video_id = ?")
            .bind(video_id)
            .execute(&*self.db)
            .await?;
        sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(video_id)
            .execute(&*self.db)
            .await?;

        info!("video {} deleted", video_id);
        Ok(())
    }

    async fn remove_media_file(&self, path: PathBuf) {
        match fs::remove_file(&path).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {}: {}", path.display(), err),
        }
    }

    /// Cut `[start, start + duration)` out of the stored original and record
    /// the result as a `trimmed` rendition. Stream-copies, so this is fast
    /// enough to run in-request.
    pub async fn trim_video(
        &self,
        video_id: Uuid,
        start_seconds: f64,
        duration_seconds: f64,
    ) -> VideoResult<VideoDetails> {
        if start_seconds < 0.0 || duration_seconds <= 0.0 {
            return Err(VideoError::InvalidTrimRange {
                start: start_seconds,
                duration: duration_seconds,
            });
        }
        let video = self.fetch_video(video_id).await?;
        let source = self.transcoder.video_path(&video.stored_file_name);
        let file_name = self
            .transcoder
            .trim(&source, start_seconds, duration_seconds)
            .await?;
        self.insert_rendition(video_id, "trimmed", &file_name).await?;
        self.get_video(video_id).await
    }

    /// Extract the audio track of the stored original and record the result
    /// as an `audio` rendition. Defaults to mp3.
    pub async fn extract_audio(
        &self,
        video_id: Uuid,
        format: Option<&str>,
    ) -> VideoResult<VideoDetails> {
        let format = validate_audio_format(format)?;
        let video = self.fetch_video(video_id).await?;
        let source = self.transcoder.video_path(&video.stored_file_name);
        let file_name = self.transcoder.extract_audio(&source, &format).await?;
        self.insert_rendition(video_id, "audio", &file_name).await?;
        self.get_video(video_id).await
    }

    /// Burn a text watermark into the stored original and record the result as
    /// a `watermarked` rendition.
    pub async fn watermark_video(&self, video_id: Uuid, text: &str) -> VideoResult<VideoDetails> {
        let video = self.fetch_video(video_id).await?;
        let source = self.transcoder.video_path(&video.stored_file_name);
        let file_name = self.transcoder.add_watermark(&source, text).await?;
        self.insert_rendition(video_id, "watermarked", &file_name)
            .await?;
        self.get_video(video_id).await
    }

    pub async fn get_video(&self, video_id: Uuid) -> VideoResult<VideoDetails> {
        let video = self.fetch_video(video_id).await?;
        let renditions = self.fetch_renditions(video_id).await?;
        Ok(VideoDetails::new(video, renditions))
    }

    /// Newest-first page of videos with their rendition maps.
    pub async fn list_videos(
        &self,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> VideoResult<VideoPage> {
        let (page, page_size) = clamp_paging(page, page_size);
        let total_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&*self.db)
            .await?;

        let rows: Vec<Video> = sqlx::query_as(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&*self.db)
        .await?;

        let mut videos = Vec::with_capacity(rows.len());
        for video in rows {
            let renditions = self.fetch_renditions(video.id).await?;
            videos.push(VideoDetails::new(video, renditions));
        }

        Ok(VideoPage {
            videos,
            total_count,
            page,
            page_size,
            total_pages: total_pages(total_count, page_size),
        })
    }

    async fn fetch_video(&self, video_id: Uuid) -> VideoResult<Video> {
        sqlx::query_as(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?"))
            .bind(video_id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => VideoError::NotFound(video_id),
                other => VideoError::Sqlx(other),
            })
    }

    async fn fetch_renditions(&self, video_id: Uuid) -> VideoResult<Vec<Rendition>> {
        Ok(sqlx::query_as(
            "SELECT video_id, quality, file_name, created_at FROM renditions \
             WHERE video_id = ? ORDER BY quality",
        )
        .bind(video_id)
        .fetch_all(&*self.db)
        .await?)
    }

    async fn insert_video(&self, video: &Video) -> VideoResult<()> {
        sqlx::query(&format!(
            "INSERT INTO videos ({VIDEO_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(video.id)
        .bind(&video.original_file_name)
        .bind(&video.stored_file_name)
        .bind(&video.thumbnail_file_name)
        .bind(video.file_size_bytes)
        .bind(video.duration_seconds)
        .bind(video.width)
        .bind(video.height)
        .bind(&video.video_codec)
        .bind(&video.audio_codec)
        .bind(video.frame_rate)
        .bind(video.bit_rate)
        .bind(&video.uploaded_by)
        .bind(video.status)
        .bind(&video.processing_error)
        .bind(video.is_published)
        .bind(video.published_at)
        .bind(&video.merged_video_path)
        .bind(video.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn insert_rendition(
        &self,
        video_id: Uuid,
        quality: &str,
        file_name: &str,
    ) -> VideoResult<()> {
        sqlx::query(
            "INSERT INTO renditions (video_id, quality, file_name, created_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(video_id, quality) DO UPDATE SET file_name = excluded.file_name",
        )
        .bind(video_id)
        .bind(quality)
        .bind(file_name)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

/// Validate the user-supplied filename's extension against the allow-list.
/// The stored filename never derives from user input; only the extension is
/// taken, and only after validation.
fn validate_extension(original_file_name: Option<&str>) -> VideoResult<String> {
    let Some(name) = original_file_name else {
        return Ok("mp4".into());
    };
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(VideoError::UnsupportedFileType(name.to_string()))
    }
}

/// Validate a requested audio output format. The format becomes a filename
/// extension, so it is allow-listed just like upload extensions.
fn validate_audio_format(format: Option<&str>) -> VideoResult<String> {
    let Some(format) = format else {
        return Ok("mp3".into());
    };
    let format = format.to_ascii_lowercase();
    if AUDIO_FORMATS.contains(&format.as_str()) {
        Ok(format)
    } else {
        Err(VideoError::UnsupportedFileType(format))
    }
}
