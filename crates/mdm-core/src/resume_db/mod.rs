//! Persistent resume/job database (SQLite via sqlx).
//!
//! Stores per-stream resume records (segment layout and flushed offsets) and
//! the CLI's catalogue of submitted jobs.

pub mod db;
mod jobs;
pub mod record;
mod records;
pub mod types;

pub use db::*;
pub use record::{resume_key, ResumeRecord, SegmentRecord, RECORD_VERSION};
pub use types::*;
