//! Job status and its transition table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Planning,
    Downloading,
    Merging,
    Completed,
    Paused,
    Failed,
    Cancelled,
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Planning => "planning",
            JobStatus::Downloading => "downloading",
            JobStatus::Merging => "merging",
            JobStatus::Completed => "completed",
            JobStatus::Paused => "paused",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and Cancelled never move again. Failed only moves back to
    /// Queued on an explicit user retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Holds an execution slot.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            JobStatus::Planning | JobStatus::Downloading | JobStatus::Merging
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Planning | Cancelled) => true,
            (Planning, Downloading | Paused | Failed | Cancelled) => true,
            // Downloading -> Downloading: segment retry; -> Planning: range fallback replans.
            (Downloading, Downloading | Planning | Merging | Completed | Paused | Failed | Cancelled) => {
                true
            }
            (Merging, Completed | Failed | Cancelled) => true,
            (Paused, Queued | Cancelled) => true,
            (Failed, Queued) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
