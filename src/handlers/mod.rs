pub mod health_handlers;
pub mod merge_handlers;
pub mod upload_handlers;
pub mod video_handlers;
