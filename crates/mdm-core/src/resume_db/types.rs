//! Types used by the resume/job database.

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// Job identifier, shared by the catalogue and the scheduler.
pub type JobId = i64;

/// Catalogue state stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => JobState::Queued,
            "running" => JobState::Running,
            "paused" => JobState::Paused,
            "completed" => JobState::Completed,
            "cancelled" => JobState::Cancelled,
            _ => JobState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Everything needed to (re)submit a job to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub resource: Resource,
    #[serde(default)]
    pub priority: i32,
    /// Unix seconds; None = as soon as possible.
    #[serde(default)]
    pub start_at: Option<i64>,
    /// Bytes/s; None = unlimited.
    #[serde(default)]
    pub speed_limit: Option<u64>,
}

/// Summary view used by the CLI `status` command.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub id: JobId,
    pub url: String,
    pub dest_path: String,
    pub state: JobState,
    pub priority: i32,
    pub start_at: Option<i64>,
    pub bytes_completed: i64,
    pub total_size: Option<i64>,
    pub error: Option<String>,
}

/// Full catalogue row.
#[derive(Debug, Clone)]
pub struct JobDetails {
    pub id: JobId,
    pub job: NewJob,
    pub state: JobState,
    pub bytes_completed: i64,
    pub total_size: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
