//! Cloneable client side of the scheduler actor.

use tokio::sync::{broadcast, mpsc, oneshot};

use super::command::Command;
use super::types::{JobSnapshot, SchedulerError, SpeedTarget};
use crate::job::JobEvent;
use crate::resume_db::{JobId, NewJob};

/// Sends requests to the scheduler actor. Every mutation goes through the
/// actor, so admission decisions always see a consistent queue.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(super) commands: mpsc::Sender<Command>,
    pub(super) events: broadcast::Sender<JobEvent>,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Queue a job under a fresh id.
    pub async fn submit(&self, job: NewJob) -> Result<JobId, SchedulerError> {
        self.request(|reply| Command::Submit {
            id: None,
            job,
            reply,
        })
        .await?
    }

    /// Queue a job under a caller-chosen id (e.g. a catalogue row id).
    pub async fn submit_with_id(&self, id: JobId, job: NewJob) -> Result<JobId, SchedulerError> {
        self.request(|reply| Command::Submit {
            id: Some(id),
            job,
            reply,
        })
        .await?
    }

    /// Queue one job per item. Nothing is queued if any item is invalid.
    pub async fn submit_playlist(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>, SchedulerError> {
        self.request(|reply| Command::SubmitPlaylist { jobs, reply })
            .await?
    }

    pub async fn pause(&self, id: JobId) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Pause { id, reply }).await?
    }

    /// Re-queue a paused job, or retry a failed one.
    pub async fn resume(&self, id: JobId) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Resume { id, reply }).await?
    }

    pub async fn cancel(&self, id: JobId, keep_partial: bool) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Cancel {
            id,
            keep_partial,
            reply,
        })
        .await?
    }

    /// `None` or `Some(0)` removes the cap.
    pub async fn set_speed_limit(
        &self,
        target: SpeedTarget,
        rate: Option<u64>,
    ) -> Result<(), SchedulerError> {
        self.request(|reply| Command::SetSpeedLimit {
            target,
            rate,
            reply,
        })
        .await?
    }

    /// Give every waiting job (queued or paused) the same start time. Jobs
    /// already running are left alone. Returns how many changed.
    pub async fn schedule_all(&self, start_at: i64) -> Result<usize, SchedulerError> {
        self.request(|reply| Command::ScheduleAll { start_at, reply })
            .await
    }

    pub async fn snapshot(&self, id: JobId) -> Result<Option<JobSnapshot>, SchedulerError> {
        self.request(|reply| Command::Snapshot { id, reply }).await
    }

    /// All known jobs ordered by id.
    pub async fn list(&self) -> Result<Vec<JobSnapshot>, SchedulerError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Pause running jobs, wait for them to flush, and stop the actor.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
