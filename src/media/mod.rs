//! External media tooling: ffprobe-based analysis and ffmpeg-based
//! transcoding, both invoked as child processes.
//!
//! Binary resolution is a one-shot, process-wide initialization step:
//! `FfmpegTools::ensure_ready` is called once at startup and is idempotent, so
//! components never race to discover the tools from arbitrary call sites.

pub mod probe;
pub mod progress;
pub mod quality;
pub mod transcode;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("`{tool}` is not runnable: {reason}")]
    ToolUnavailable { tool: String, reason: String },
    #[error("ffprobe failed for `{path}`: {reason}")]
    ProbeFailed { path: String, reason: String },
    #[error("no video stream found in `{0}`")]
    NoVideoStream(String),
    #[error("no audio stream found in `{0}`")]
    NoAudioStream(String),
    #[error("ffmpeg exited with status {code}: {stderr}")]
    TranscodeFailed { code: i32, stderr: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type MediaResult<T> = Result<T, MediaError>;

static TOOLS: OnceCell<FfmpegTools> = OnceCell::const_new();

/// Resolved paths to the ffmpeg and ffprobe binaries.
#[derive(Clone, Debug)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FfmpegTools {
    /// Resolve and verify the media tools exactly once for the process.
    ///
    /// The first caller performs the resolution; every later caller gets the
    /// cached handle regardless of the `tool_dir` it passes. Invoked at
    /// startup so request paths never pay the verification cost.
    pub async fn ensure_ready(tool_dir: Option<&Path>) -> MediaResult<&'static FfmpegTools> {
        TOOLS
            .get_or_try_init(|| async { Self::locate(tool_dir).await })
            .await
    }

    /// The cached handle, if `ensure_ready` has completed.
    pub fn get() -> Option<&'static FfmpegTools> {
        TOOLS.get()
    }

    /// Resolve binaries from `tool_dir` when given, otherwise rely on `PATH`,
    /// and verify each one answers `-version`.
    async fn locate(tool_dir: Option<&Path>) -> MediaResult<Self> {
        let (ffmpeg, ffprobe) = match tool_dir {
            Some(dir) => (dir.join("ffmpeg"), dir.join("ffprobe")),
            None => (PathBuf::from("ffmpeg"), PathBuf::from("ffprobe")),
        };

        verify_runnable(&ffmpeg).await?;
        verify_runnable(&ffprobe).await?;
        info!(
            "media tools ready: ffmpeg={}, ffprobe={}",
            ffmpeg.display(),
            ffprobe.display()
        );

        Ok(Self { ffmpeg, ffprobe })
    }
}

async fn verify_runnable(binary: &Path) -> MediaResult<()> {
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .await
        .map_err(|err| MediaError::ToolUnavailable {
            tool: binary.display().to_string(),
            reason: err.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(MediaError::ToolUnavailable {
            tool: binary.display().to_string(),
            reason: format!("exited with {}", output.status),
        })
    }
}
