use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub temp_dir: String,
    pub thumbnail_dir: String,
    pub database_url: String,
    pub ffmpeg_dir: Option<String>,
    pub worker_count: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Video upload and transcoding pipeline API")]
pub struct Args {
    /// Host to bind to (overrides VIDEO_PIPELINE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VIDEO_PIPELINE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where finished videos live (overrides VIDEO_PIPELINE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Directory for in-flight chunked uploads (overrides VIDEO_PIPELINE_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<String>,

    /// Directory for generated thumbnails (overrides VIDEO_PIPELINE_THUMBNAIL_DIR)
    #[arg(long)]
    pub thumbnail_dir: Option<String>,

    /// Database URL (overrides VIDEO_PIPELINE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory containing ffmpeg/ffprobe binaries; PATH is searched when
    /// unset (overrides VIDEO_PIPELINE_FFMPEG_DIR)
    #[arg(long)]
    pub ffmpeg_dir: Option<String>,

    /// Maximum concurrent background transcode/merge jobs
    /// (overrides VIDEO_PIPELINE_WORKER_COUNT)
    #[arg(long)]
    pub worker_count: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("VIDEO_PIPELINE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("VIDEO_PIPELINE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing VIDEO_PIPELINE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading VIDEO_PIPELINE_PORT"),
        };
        let env_storage =
            env::var("VIDEO_PIPELINE_STORAGE_DIR").unwrap_or_else(|_| "./data/videos".into());
        let env_temp =
            env::var("VIDEO_PIPELINE_TEMP_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_thumbs = env::var("VIDEO_PIPELINE_THUMBNAIL_DIR")
            .unwrap_or_else(|_| "./data/thumbnails".into());
        let env_db = env::var("VIDEO_PIPELINE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/video_pipeline.db".into());
        let env_ffmpeg = env::var("VIDEO_PIPELINE_FFMPEG_DIR").ok();
        let env_workers = match env::var("VIDEO_PIPELINE_WORKER_COUNT") {
            Ok(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing VIDEO_PIPELINE_WORKER_COUNT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 2,
            Err(err) => return Err(err).context("reading VIDEO_PIPELINE_WORKER_COUNT"),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            temp_dir: args.temp_dir.unwrap_or(env_temp),
            thumbnail_dir: args.thumbnail_dir.unwrap_or(env_thumbs),
            database_url: args.database_url.unwrap_or(env_db),
            ffmpeg_dir: args.ffmpeg_dir.or(env_ffmpeg),
            worker_count: args.worker_count.unwrap_or(env_workers).max(1),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
