//! Download jobs: one resource (plus an optional companion stream) taken from
//! queued to a terminal status.
//!
//! A job downloads its primary stream, then its companion, then hands both to
//! the `Merger`. Progress is checkpointed into the resume store while segments
//! run, so a pause, crash or cancel-with-keep can continue from the recorded
//! offsets.

mod cleanup;
mod progress;
mod run;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::MdmConfig;
use crate::merge::Merger;
use crate::ratelimit::TokenBucket;
use crate::resource::Resource;
use crate::resume_db::{resume_key, JobId, JobState, NewJob, ResumeDb};

pub use cleanup::discard_partials;
pub use progress::JobEvent;
pub use run::{run_job, RunContext};
pub use state::{InvalidTransition, JobStatus};

/// Shared by every job of one scheduler.
pub struct JobEnv {
    pub config: MdmConfig,
    pub db: ResumeDb,
    /// Aggregate cap across all jobs.
    pub global_limit: TokenBucket,
    pub merger: Arc<dyn Merger>,
}

impl JobEnv {
    pub fn new(config: MdmConfig, db: ResumeDb, merger: Arc<dyn Merger>) -> Self {
        let global_limit = TokenBucket::new(config.global_speed_limit);
        Self {
            config,
            db,
            global_limit,
            merger,
        }
    }
}

/// In-memory job. Owned by the scheduler while idle and by the driver while running.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: JobId,
    pub resource: Resource,
    /// Higher runs first.
    pub priority: i32,
    /// Unix seconds; not eligible before this.
    pub start_at: Option<i64>,
    pub status: JobStatus,
    /// High-water mark; never decreases over the job's lifetime.
    pub bytes_completed: u64,
    /// Per-job cap. Clones share the bucket, so a live change reaches running workers.
    pub limit: TokenBucket,
    /// Most recent first-class errors (retries and failures).
    pub errors: Vec<String>,
}

/// Keep the error history bounded.
const MAX_ERRORS: usize = 32;

impl DownloadJob {
    pub fn new(id: JobId, spec: &NewJob) -> Self {
        Self {
            id,
            resource: spec.resource.clone(),
            priority: spec.priority,
            start_at: spec.start_at,
            status: JobStatus::Queued,
            bytes_completed: 0,
            limit: TokenBucket::new(spec.speed_limit),
            errors: Vec::new(),
        }
    }

    pub fn spec(&self) -> NewJob {
        NewJob {
            resource: self.resource.clone(),
            priority: self.priority,
            start_at: self.start_at,
            speed_limit: self.limit.rate(),
        }
    }

    pub fn total_size(&self) -> Option<u64> {
        self.resource.combined_size()
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(next)?;
        Ok(())
    }

    /// Raise the high-water mark.
    pub fn record_bytes(&mut self, bytes: u64) {
        self.bytes_completed = self.bytes_completed.max(bytes);
    }

    pub fn push_error(&mut self, error: String) {
        if self.errors.len() == MAX_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(error);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }

    /// Snapshot event with no speed information.
    pub fn event(&self) -> JobEvent {
        JobEvent {
            job_id: self.id,
            status: self.status,
            bytes_completed: self.bytes_completed,
            total_size: self.total_size(),
            current_speed: 0.0,
            eta_secs: None,
            error_detail: None,
        }
    }
}

/// Catalogue state for a live status.
pub fn catalogue_state(status: JobStatus) -> JobState {
    match status {
        JobStatus::Queued => JobState::Queued,
        JobStatus::Planning | JobStatus::Downloading | JobStatus::Merging => JobState::Running,
        JobStatus::Paused => JobState::Paused,
        JobStatus::Completed => JobState::Completed,
        JobStatus::Failed => JobState::Failed,
        JobStatus::Cancelled => JobState::Cancelled,
    }
}

/// One file a job downloads: the primary stream or its companion.
#[derive(Debug, Clone)]
pub(crate) struct Part {
    /// Stream to fetch; never carries a companion.
    pub resource: Resource,
    /// Where the finished stream lands.
    pub target: PathBuf,
}

impl Part {
    pub(crate) fn key(&self) -> String {
        resume_key(self.resource.primary_url(), &self.target)
    }
}

/// Primary stream first, then the companion if any.
pub(crate) fn parts(resource: &Resource) -> Vec<Part> {
    let mut primary = resource.clone();
    primary.companion = None;
    let mut out = vec![Part {
        target: resource.stream_path(),
        resource: primary,
    }];
    if let Some(c) = &resource.companion {
        out.push(Part {
            target: c.dest_path.clone(),
            resource: (**c).clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(resource: Resource) -> NewJob {
        NewJob {
            resource,
            priority: 2,
            start_at: None,
            speed_limit: Some(1000),
        }
    }

    #[test]
    fn parts_of_merged_job() {
        let audio = Resource::new("http://h/a", "/tmp/clip.audio.tmp").with_size(10);
        let r = Resource::new("http://h/v", "/tmp/clip.mp4")
            .with_size(90)
            .with_companion(audio);
        let p = parts(&r);
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].target, PathBuf::from("/tmp/clip.mp4.video.tmp"));
        assert!(p[0].resource.companion.is_none());
        assert_eq!(p[1].target, PathBuf::from("/tmp/clip.audio.tmp"));
        assert_ne!(p[0].key(), p[1].key());
    }

    #[test]
    fn bytes_never_decrease() {
        let mut job = DownloadJob::new(1, &spec(Resource::new("http://h/f", "/tmp/f")));
        job.record_bytes(500);
        job.record_bytes(100);
        assert_eq!(job.bytes_completed, 500);
        assert_eq!(job.spec().speed_limit, Some(1000));
    }

    #[test]
    fn error_history_is_bounded() {
        let mut job = DownloadJob::new(1, &spec(Resource::new("http://h/f", "/tmp/f")));
        for i in 0..40 {
            job.push_error(format!("e{}", i));
        }
        assert_eq!(job.errors.len(), MAX_ERRORS);
        assert_eq!(job.last_error(), Some("e39"));
    }

    #[test]
    fn catalogue_collapses_running_states() {
        assert_eq!(catalogue_state(JobStatus::Merging), JobState::Running);
        assert_eq!(catalogue_state(JobStatus::Paused), JobState::Paused);
    }
}
