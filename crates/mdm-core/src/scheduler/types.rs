//! Public request and reply types of the scheduler.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::{DownloadJob, JobStatus};
use crate::resume_db::JobId;

/// Which bucket a speed-limit change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedTarget {
    Job(JobId),
    Global,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub dest_path: PathBuf,
    pub status: JobStatus,
    pub priority: i32,
    pub start_at: Option<i64>,
    pub bytes_completed: u64,
    pub total_size: Option<u64>,
    pub speed_limit: Option<u64>,
    pub last_error: Option<String>,
}

impl JobSnapshot {
    pub fn of(job: &DownloadJob) -> Self {
        Self {
            id: job.id,
            url: job.resource.primary_url().to_string(),
            dest_path: job.resource.dest_path.clone(),
            status: job.status,
            priority: job.priority,
            start_at: job.start_at,
            bytes_completed: job.bytes_completed,
            total_size: job.total_size(),
            speed_limit: job.limit.rate(),
            last_error: job.last_error().map(str::to_string),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    #[error("job {0} already exists")]
    DuplicateJob(JobId),
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("cannot {action} job {id} while it is {status}")]
    InvalidState {
        id: JobId,
        action: &'static str,
        status: JobStatus,
    },
    #[error("scheduler is not running")]
    Closed,
}
