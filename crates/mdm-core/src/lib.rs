//! Segmented download engine and job scheduler for the `mdm` media download manager.

pub mod config;
pub mod logging;

pub mod control;
pub mod downloader;
pub mod error;
pub mod fetch_head;
pub mod human;
pub mod job;
pub mod merge;
pub mod ratelimit;
pub mod resource;
pub mod resume_db;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod storage;
pub mod url_model;
