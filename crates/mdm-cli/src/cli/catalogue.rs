//! Job operations applied to the catalogue alone, for when no scheduler is
//! running or the scheduler does not know the job.

use anyhow::{bail, Result};
use mdm_core::job::discard_partials;
use mdm_core::resume_db::{JobDetails, JobId, JobState, ResumeDb};

pub async fn require(db: &ResumeDb, id: JobId) -> Result<JobDetails> {
    match db.get_job(id).await? {
        Some(job) => Ok(job),
        None => bail!("unknown job {}", id),
    }
}

/// A queued job is held back so the next `run` skips it.
pub async fn pause(db: &ResumeDb, id: JobId) -> Result<()> {
    let job = require(db, id).await?;
    match job.state {
        JobState::Paused => Ok(()),
        JobState::Queued | JobState::Running => db.set_state(id, JobState::Paused).await,
        other => bail!("cannot pause job {} while it is {}", id, other.as_str()),
    }
}

/// Paused or failed jobs go back to the queue. Returns whether the job changed.
pub async fn resume(db: &ResumeDb, id: JobId) -> Result<bool> {
    let job = require(db, id).await?;
    match job.state {
        JobState::Queued | JobState::Running => Ok(false),
        JobState::Paused | JobState::Failed => {
            db.set_error(id, None).await?;
            db.set_state(id, JobState::Queued).await?;
            Ok(true)
        }
        other => bail!("cannot resume job {} while it is {}", id, other.as_str()),
    }
}

pub async fn cancel(db: &ResumeDb, id: JobId, keep_partial: bool) -> Result<()> {
    let job = require(db, id).await?;
    if job.state.is_terminal() {
        bail!("cannot cancel job {} while it is {}", id, job.state.as_str());
    }
    if !keep_partial {
        discard_partials(db, &job.job.resource).await?;
    }
    db.set_state(id, JobState::Cancelled).await
}

/// Persist a per-job limit so it applies the next time the job runs.
pub async fn set_limit(db: &ResumeDb, id: JobId, rate: Option<u64>) -> Result<()> {
    let mut job = require(db, id).await?;
    job.job.speed_limit = rate;
    db.update_job(id, &job.job).await
}

/// Set the start time of every unfinished job. Returns how many changed.
pub async fn schedule_all(db: &ResumeDb, start_at: i64) -> Result<usize> {
    let mut count = 0;
    for state in [JobState::Queued, JobState::Running, JobState::Paused] {
        for mut job in db.jobs_in_state(state).await? {
            job.job.start_at = Some(start_at);
            db.update_job(job.id, &job.job).await?;
            count += 1;
        }
    }
    Ok(count)
}
