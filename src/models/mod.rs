//! Core data models for the video pipeline.
//!
//! These entities represent uploaded videos, their transcoded renditions, and
//! long-running merge jobs. They map cleanly to database tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod merge_job;
pub mod video;
