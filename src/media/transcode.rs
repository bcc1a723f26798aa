//! ffmpeg-based transcoding: thumbnails, quality-ladder renditions, trimming,
//! watermarking, and concatenation.
//!
//! Every operation spawns ffmpeg as a child process and reports fatal failure
//! via `TranscodeFailed`; nothing here retries silently. Long operations take
//! an optional observer that receives monotonically non-decreasing 0-100
//! percentages parsed from `-progress pipe:1` output.

use super::probe::{self, MediaInfo};
use super::progress::{ProgressTracker, parse_progress_line};
use super::quality::Quality;
use super::{FfmpegTools, MediaError, MediaResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

/// Observer for long-running operations; invoked with 0-100 percentages.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Upper bound on captured stderr carried inside error values.
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Clone)]
pub struct Transcoder {
    tools: FfmpegTools,
    storage_dir: PathBuf,
    thumbnail_dir: PathBuf,
}

impl Transcoder {
    pub fn new(
        tools: FfmpegTools,
        storage_dir: impl Into<PathBuf>,
        thumbnail_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tools,
            storage_dir: storage_dir.into(),
            thumbnail_dir: thumbnail_dir.into(),
        }
    }

    /// Full path of a stored video or rendition file.
    pub fn video_path(&self, file_name: &str) -> PathBuf {
        self.storage_dir.join(file_name)
    }

    /// Full path of a stored thumbnail file.
    pub fn thumbnail_path(&self, file_name: &str) -> PathBuf {
        self.thumbnail_dir.join(file_name)
    }

    pub async fn probe_video(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe::probe_video(&self.tools, path).await
    }

    /// Extract a single-frame JPEG thumbnail. When no timestamp is given,
    /// seeks to `min(2s, 10% of duration)` so very short clips still get a
    /// representative frame.
    pub async fn generate_thumbnail(
        &self,
        video_path: &Path,
        at_seconds: Option<f64>,
    ) -> MediaResult<String> {
        let seek = match at_seconds {
            Some(at) => at,
            None => {
                let info = self.probe_video(video_path).await?;
                let duration = info.duration_seconds.unwrap_or(0.0);
                (duration * 0.1).min(2.0).max(0.0)
            }
        };

        let file_name = derived_name(video_path, "thumb", "jpg");
        let output = self.thumbnail_path(&file_name);
        let args = vec![
            "-y".into(),
            "-ss".into(),
            format!("{:.3}", seek),
            "-i".into(),
            video_path.display().to_string(),
            "-frames:v".into(),
            "1".into(),
            "-q:v".into(),
            "2".into(),
            output.display().to_string(),
        ];
        self.run_ffmpeg(args, None, None).await?;

        info!("thumbnail generated: {}", output.display());
        Ok(file_name)
    }

    /// Produce one quality-ladder rendition.
    ///
    /// If the source is already at or below the target in both dimensions the
    /// file is copied unchanged — upscaling wastes compute and produces no
    /// quality gain.
    pub async fn convert_quality(
        &self,
        video_path: &Path,
        quality: Quality,
        progress: Option<ProgressFn>,
    ) -> MediaResult<String> {
        let info = self.probe_video(video_path).await?;
        let (src_w, src_h) = match (info.width, info.height) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(MediaError::NoVideoStream(video_path.display().to_string())),
        };

        if quality.source_fits_within(src_w, src_h) {
            debug!(
                "source {}x{} fits within {}, copying instead of upscaling",
                src_w, src_h, quality
            );
            let ext = extension_of(video_path);
            let file_name = derived_name(video_path, quality.label(), &ext);
            fs::copy(video_path, self.video_path(&file_name)).await?;
            return Ok(file_name);
        }

        let (width, height) = quality.dimensions();
        let file_name = derived_name(video_path, quality.label(), "mp4");
        let output = self.video_path(&file_name);
        let args = vec![
            "-y".into(),
            "-i".into(),
            video_path.display().to_string(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "medium".into(),
            "-b:v".into(),
            quality.bitrate().into(),
            "-vf".into(),
            format!("scale={}:{}", width, height),
            "-c:a".into(),
            "aac".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.display().to_string(),
        ];
        self.run_ffmpeg(args, info.duration_seconds, progress).await?;

        info!("converted {} to {}: {}", video_path.display(), quality, file_name);
        Ok(file_name)
    }

    /// Cut out `[start, start + duration)` without re-encoding.
    pub async fn trim(
        &self,
        video_path: &Path,
        start_seconds: f64,
        duration_seconds: f64,
    ) -> MediaResult<String> {
        let file_name = derived_name(video_path, "trimmed", "mp4");
        let output = self.video_path(&file_name);
        let args = vec![
            "-y".into(),
            "-ss".into(),
            format!("{:.3}", start_seconds),
            "-i".into(),
            video_path.display().to_string(),
            "-t".into(),
            format!("{:.3}", duration_seconds),
            "-c".into(),
            "copy".into(),
            output.display().to_string(),
        ];
        self.run_ffmpeg(args, None, None).await?;

        info!("trimmed {} -> {}", video_path.display(), file_name);
        Ok(file_name)
    }

    /// Extract the audio track into a standalone file in the given format,
    /// dropping video. The encoder follows from the output extension.
    pub async fn extract_audio(&self, video_path: &Path, format: &str) -> MediaResult<String> {
        let info = self.probe_video(video_path).await?;
        if info.audio_codec.is_none() {
            return Err(MediaError::NoAudioStream(video_path.display().to_string()));
        }

        let file_name = derived_name(video_path, "audio", format);
        let output = self.video_path(&file_name);
        let args = vec![
            "-y".into(),
            "-i".into(),
            video_path.display().to_string(),
            "-vn".into(),
            output.display().to_string(),
        ];
        self.run_ffmpeg(args, None, None).await?;

        info!("audio extracted: {}", file_name);
        Ok(file_name)
    }

    /// Burn a translucent text watermark into the top-left corner.
    pub async fn add_watermark(&self, video_path: &Path, text: &str) -> MediaResult<String> {
        let file_name = derived_name(video_path, "watermarked", "mp4");
        let output = self.video_path(&file_name);
        let args = vec![
            "-y".into(),
            "-i".into(),
            video_path.display().to_string(),
            "-vf".into(),
            watermark_filter(text),
            "-c:a".into(),
            "copy".into(),
            output.display().to_string(),
        ];
        self.run_ffmpeg(args, None, None).await?;

        info!("watermark added: {}", file_name);
        Ok(file_name)
    }

    /// Concatenate files in the given order into one output under the storage
    /// dir, named `merged_{tag}_{timestamp}.mp4`.
    ///
    /// Uses the concat demuxer with stream copy when every input reports the
    /// same video codec (fast, lossless); falls back to a re-encode otherwise.
    pub async fn concatenate(
        &self,
        ordered_paths: &[PathBuf],
        tag: &str,
        progress: Option<ProgressFn>,
    ) -> MediaResult<String> {
        let file_name = format!("merged_{}_{}.mp4", tag, Utc::now().format("%Y%m%d%H%M%S"));
        let output = self.video_path(&file_name);

        if let [single] = ordered_paths {
            fs::copy(single, &output).await?;
            return Ok(file_name);
        }

        let mut total_duration = 0.0;
        let mut codecs = Vec::with_capacity(ordered_paths.len());
        for path in ordered_paths {
            let info = self.probe_video(path).await?;
            total_duration += info.duration_seconds.unwrap_or(0.0);
            codecs.push(info.video_codec);
        }
        let stream_copy = codecs.windows(2).all(|pair| pair[0] == pair[1]);

        let list_path = std::env::temp_dir().join(format!("concat_{}.txt", Uuid::new_v4()));
        fs::write(&list_path, concat_list(ordered_paths)).await?;

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.display().to_string(),
        ];
        if stream_copy {
            args.extend(["-c".into(), "copy".into()]);
        } else {
            debug!("inputs disagree on video codec, re-encoding concat output");
            args.extend([
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "medium".into(),
                "-c:a".into(),
                "aac".into(),
            ]);
        }
        args.push(output.display().to_string());

        let result = self
            .run_ffmpeg(args, Some(total_duration), progress)
            .await;
        let _ = fs::remove_file(&list_path).await;
        result?;

        info!("concatenated {} inputs -> {}", ordered_paths.len(), file_name);
        Ok(file_name)
    }

    /// Spawn ffmpeg and wait for it. When `total_duration` is given, progress
    /// reporting is enabled on stdout and forwarded to the observer.
    async fn run_ffmpeg(
        &self,
        mut args: Vec<String>,
        total_duration: Option<f64>,
        progress: Option<ProgressFn>,
    ) -> MediaResult<()> {
        if total_duration.is_some() {
            // Output file must stay the last argument.
            let output = args.pop();
            args.extend(["-progress".into(), "pipe:1".into(), "-nostats".into()]);
            args.extend(output);
        }

        let mut child = Command::new(&self.tools.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let progress_fut = async {
            let Some(stdout) = stdout else { return };
            let mut tracker = total_duration.map(ProgressTracker::new);
            let mut lines = BufReader::new(stdout).lines();
            // Always drain stdout so ffmpeg never blocks on a full pipe.
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(tracker) = tracker.as_mut() else { continue };
                if let Some(seconds) = parse_progress_line(&line) {
                    if let (Some(percent), Some(observer)) =
                        (tracker.update(seconds), progress.as_ref())
                    {
                        observer(percent);
                    }
                }
            }
        };
        let stderr_fut = async {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        };

        let (_, stderr_buf, status) = tokio::join!(progress_fut, stderr_fut, child.wait());
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::TranscodeFailed {
                code: status.code().unwrap_or(-1),
                stderr: stderr_tail(&stderr_buf),
            })
        }
    }
}

/// `{stem}_{suffix}_{uuid}.{ext}` — globally unique and independent of any
/// user-supplied name.
fn derived_name(input: &Path, suffix: &str, ext: &str) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    format!("{}_{}_{}.{}", stem, suffix, Uuid::new_v4(), ext)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
        .to_ascii_lowercase()
}

/// Body of the concat demuxer list file. Single quotes inside paths use the
/// demuxer's `'\''` escape.
fn concat_list(paths: &[PathBuf]) -> String {
    let mut body = String::new();
    for path in paths {
        let escaped = path.display().to_string().replace('\'', r"'\''");
        body.push_str("file '");
        body.push_str(&escaped);
        body.push_str("'\n");
    }
    body
}

/// drawtext filter for the text watermark. Quotes, backslashes, and colons
/// are escaped so arbitrary text cannot break out of the filter expression.
fn watermark_filter(text: &str) -> String {
    let escaped = text
        .replace('\\', r"\\")
        .replace('\'', r"\'")
        .replace(':', r"\:");
    format!(
        "drawtext=text='{}':fontsize=24:fontcolor=white@0.5:x=10:y=10",
        escaped
    )
}

fn stderr_tail(buf: &str) -> String {
    if buf.len() <= STDERR_TAIL_BYTES {
        return buf.trim().to_string();
    }
    let start = buf.len() - STDERR_TAIL_BYTES;
    // Avoid splitting a UTF-8 sequence.
    let start = (start..buf.len()).find(|&i| buf.is_char_boundary(i)).unwrap_or(start);
    buf[start..].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_name_keeps_stem_and_extension() {
        let name = derived_name(Path::new("/data/videos/clip.mp4"), "720p", "mp4");
        assert!(name.starts_with("clip_720p_"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn concat_list_preserves_order_and_escapes_quotes() {
        let paths = vec![
            PathBuf::from("/v/first.mp4"),
            PathBuf::from("/v/it's here.mp4"),
        ];
        let list = concat_list(&paths);
        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines[0], "file '/v/first.mp4'");
        assert_eq!(lines[1], r"file '/v/it'\''s here.mp4'");
    }

    #[test]
    fn watermark_text_cannot_escape_the_filter() {
        let filter = watermark_filter("it's: mine");
        assert!(filter.contains(r"it\'s\: mine"));
    }

    #[test]
    fn stderr_tail_truncates_long_output() {
        let long = "x".repeat(STDERR_TAIL_BYTES * 2);
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL_BYTES);
        assert_eq!(stderr_tail("short"), "short");
    }
}
