//! The scheduler actor: sole owner of the queue, the idle jobs and the running set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::budget::ConnectionBudget;
use super::command::Command;
use super::queue::JobQueue;
use super::types::{JobSnapshot, SchedulerError, SpeedTarget};
use crate::control::{StopReason, StopToken};
use crate::job::{discard_partials, run_job, DownloadJob, JobEnv, JobEvent, JobStatus, RunContext};
use crate::resume_db::{unix_timestamp, JobId, NewJob};

type Exit = (JobId, Result<DownloadJob, JoinError>);

/// A job holding an execution slot.
struct Running {
    /// Mirror of the driver's job, kept current from its events.
    job: DownloadJob,
    stop: StopToken,
    keep_partial: Arc<AtomicBool>,
    /// Cancel requested after a pause had already been requested.
    cancel: bool,
}

pub(super) struct Actor {
    env: Arc<JobEnv>,
    budget: Arc<ConnectionBudget>,
    queue: JobQueue,
    idle: HashMap<JobId, DownloadJob>,
    running: HashMap<JobId, Running>,
    tasks: JoinSet<Exit>,
    job_events: mpsc::UnboundedSender<JobEvent>,
    broadcast: broadcast::Sender<JobEvent>,
    next_id: JobId,
}

fn invalid(id: JobId, action: &'static str, status: JobStatus) -> SchedulerError {
    SchedulerError::InvalidState { id, action, status }
}

impl Actor {
    pub(super) fn new(
        env: Arc<JobEnv>,
        job_events: mpsc::UnboundedSender<JobEvent>,
        broadcast: broadcast::Sender<JobEvent>,
    ) -> Self {
        let budget = ConnectionBudget::new(env.config.max_total_connections);
        Self {
            env,
            budget,
            queue: JobQueue::new(),
            idle: HashMap::new(),
            running: HashMap::new(),
            tasks: JoinSet::new(),
            job_events,
            broadcast,
            next_id: 1,
        }
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<JobEvent>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(
            self.env.config.scheduler_tick_ms.max(10),
        ));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown(&mut events).await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        self.shutdown(&mut events).await;
                        return;
                    }
                },
                Some(ev) = events.recv() => self.on_event(ev),
                Some(joined) = self.tasks.join_next() => {
                    // A job's final events are sent before its task returns.
                    self.drain(&mut events);
                    self.on_joined(joined).await;
                }
                _ = tick.tick() => {}
            }
            self.admit();
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.broadcast.send(event);
    }

    fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<JobEvent>) {
        while let Ok(ev) = events.try_recv() {
            self.on_event(ev);
        }
    }

    fn on_event(&mut self, ev: JobEvent) {
        if let Some(run) = self.running.get_mut(&ev.job_id) {
            run.job.status = ev.status;
            run.job.record_bytes(ev.bytes_completed);
            if let Some(detail) = &ev.error_detail {
                run.job.push_error(detail.clone());
            }
        }
        self.emit(ev);
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { id, job, reply } => {
                let _ = reply.send(self.submit(id, job));
            }
            Command::SubmitPlaylist { jobs, reply } => {
                let _ = reply.send(self.submit_playlist(jobs));
            }
            Command::Pause { id, reply } => {
                let _ = reply.send(self.pause(id));
            }
            Command::Resume { id, reply } => {
                let _ = reply.send(self.resume(id));
            }
            Command::Cancel {
                id,
                keep_partial,
                reply,
            } => {
                let res = self.cancel(id, keep_partial).await;
                let _ = reply.send(res);
            }
            Command::SetSpeedLimit {
                target,
                rate,
                reply,
            } => {
                let _ = reply.send(self.set_speed_limit(target, rate));
            }
            Command::ScheduleAll { start_at, reply } => {
                let _ = reply.send(self.schedule_all(start_at));
            }
            Command::Snapshot { id, reply } => {
                let _ = reply.send(self.job(id).map(JobSnapshot::of));
            }
            Command::List { reply } => {
                let mut all: Vec<JobSnapshot> = self
                    .idle
                    .values()
                    .chain(self.running.values().map(|r| &r.job))
                    .map(JobSnapshot::of)
                    .collect();
                all.sort_by_key(|s| s.id);
                let _ = reply.send(all);
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn job(&self, id: JobId) -> Option<&DownloadJob> {
        self.running
            .get(&id)
            .map(|r| &r.job)
            .or_else(|| self.idle.get(&id))
    }

    fn allocate_id(&mut self, requested: Option<JobId>) -> Result<JobId, SchedulerError> {
        match requested {
            Some(id) => {
                if self.job(id).is_some() {
                    return Err(SchedulerError::DuplicateJob(id));
                }
                self.next_id = self.next_id.max(id + 1);
                Ok(id)
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                Ok(id)
            }
        }
    }

    fn submit(&mut self, id: Option<JobId>, mut spec: NewJob) -> Result<JobId, SchedulerError> {
        spec.resource
            .validate()
            .map_err(SchedulerError::InvalidResource)?;
        let id = self.allocate_id(id)?;
        if spec.speed_limit.is_none() {
            spec.speed_limit = self.env.config.default_job_speed_limit;
        }
        let job = DownloadJob::new(id, &spec);
        self.queue.push(id, job.priority, job.start_at);
        info!(
            job_id = id,
            url = %job.resource.primary_url(),
            priority = job.priority,
            start_at = ?job.start_at,
            "job queued"
        );
        self.emit(job.event());
        self.idle.insert(id, job);
        Ok(id)
    }

    fn submit_playlist(&mut self, jobs: Vec<NewJob>) -> Result<Vec<JobId>, SchedulerError> {
        for (i, spec) in jobs.iter().enumerate() {
            spec.resource
                .validate()
                .map_err(|e| SchedulerError::InvalidResource(format!("item {}: {}", i, e)))?;
        }
        let count = jobs.len();
        let ids = jobs
            .into_iter()
            .map(|spec| self.submit(None, spec))
            .collect::<Result<Vec<_>, _>>()?;
        info!(count, "playlist queued");
        Ok(ids)
    }

    fn pause(&mut self, id: JobId) -> Result<(), SchedulerError> {
        if let Some(run) = self.running.get(&id) {
            if run.job.status == JobStatus::Merging {
                return Err(invalid(id, "pause", JobStatus::Merging));
            }
            info!(job_id = id, "pause requested");
            run.stop.stop(StopReason::Pause);
            return Ok(());
        }
        match self.idle.get(&id) {
            Some(job) if job.status == JobStatus::Paused => Ok(()),
            Some(job) => Err(invalid(id, "pause", job.status)),
            None => Err(SchedulerError::UnknownJob(id)),
        }
    }

    fn resume(&mut self, id: JobId) -> Result<(), SchedulerError> {
        if let Some(run) = self.running.get(&id) {
            return Err(invalid(id, "resume", run.job.status));
        }
        let job = self.idle.get_mut(&id).ok_or(SchedulerError::UnknownJob(id))?;
        match job.status {
            JobStatus::Queued => return Ok(()),
            JobStatus::Paused | JobStatus::Failed => {}
            status => return Err(invalid(id, "resume", status)),
        }
        job.transition(JobStatus::Queued)
            .map_err(|e| invalid(id, "resume", e.from))?;
        self.queue.push(id, job.priority, job.start_at);
        info!(job_id = id, bytes = job.bytes_completed, "job re-queued");
        let event = job.event();
        self.emit(event);
        Ok(())
    }

    async fn cancel(&mut self, id: JobId, keep_partial: bool) -> Result<(), SchedulerError> {
        let keep = keep_partial || self.env.config.keep_partial_on_cancel;
        if let Some(run) = self.running.get_mut(&id) {
            info!(job_id = id, keep_partial = keep, "cancel requested");
            run.keep_partial.store(keep, Ordering::Release);
            run.cancel = true;
            run.stop.stop(StopReason::Cancel);
            return Ok(());
        }
        let status = self
            .idle
            .get(&id)
            .map(|j| j.status)
            .ok_or(SchedulerError::UnknownJob(id))?;
        if !status.can_transition_to(JobStatus::Cancelled) {
            return Err(invalid(id, "cancel", status));
        }
        self.queue.remove(id);
        if let Some(mut job) = self.idle.remove(&id) {
            self.discard(&mut job, keep).await;
            self.idle.insert(id, job);
        }
        Ok(())
    }

    /// Cancel a job that is not running.
    async fn discard(&mut self, job: &mut DownloadJob, keep: bool) {
        if !keep {
            if let Err(e) = discard_partials(&self.env.db, &job.resource).await {
                warn!(job_id = job.id, error = %e, "failed to remove partial files");
            }
        }
        if let Err(e) = job.transition(JobStatus::Cancelled) {
            warn!(job_id = job.id, error = %e, "cancelling anyway");
            job.status = JobStatus::Cancelled;
        }
        self.queue.forget(job.id);
        info!(
            job_id = job.id,
            url = %job.resource.primary_url(),
            bytes = job.bytes_completed,
            keep_partial = keep,
            "job cancelled"
        );
        self.emit(job.event());
    }

    fn set_speed_limit(
        &mut self,
        target: SpeedTarget,
        rate: Option<u64>,
    ) -> Result<(), SchedulerError> {
        let rate = rate.filter(|&r| r > 0);
        match target {
            SpeedTarget::Global => self.env.global_limit.set_rate(rate),
            SpeedTarget::Job(id) => {
                // Clones of the bucket share state, so a running driver sees this at once.
                let job = self.job(id).ok_or(SchedulerError::UnknownJob(id))?;
                job.limit.set_rate(rate);
            }
        }
        info!(?target, ?rate, "speed limit changed");
        Ok(())
    }

    fn schedule_all(&mut self, start_at: i64) -> usize {
        let mut changed = 0;
        for job in self.idle.values_mut().filter(|j| !j.status.is_terminal()) {
            job.start_at = Some(start_at);
            if job.status == JobStatus::Queued {
                self.queue.reschedule(job.id, job.start_at);
            }
            changed += 1;
        }
        info!(start_at, changed, "scheduled all pending jobs");
        changed
    }

    fn admit(&mut self) {
        let now = unix_timestamp();
        let max_jobs = self.env.config.max_concurrent_jobs.max(1);
        while self.running.len() < max_jobs && self.budget.free() > 0 {
            let Some(id) = self.queue.pop_ready(now) else {
                break;
            };
            match self.idle.remove(&id) {
                Some(job) => self.start(job),
                None => warn!(job_id = id, "queued id has no job"),
            }
        }
    }

    fn start(&mut self, job: DownloadJob) {
        let id = job.id;
        let slots = self
            .budget
            .take(self.env.config.max_connections_per_job.max(1));
        let stop = StopToken::new();
        let keep_partial = Arc::new(AtomicBool::new(false));
        let ctx = RunContext {
            stop: stop.clone(),
            keep_partial: Arc::clone(&keep_partial),
            connections: slots.count(),
            events: self.job_events.clone(),
        };
        debug!(job_id = id, connections = slots.count(), "admitting job");
        self.running.insert(
            id,
            Running {
                job: job.clone(),
                stop,
                keep_partial,
                cancel: false,
            },
        );
        let driver = tokio::spawn(run_job(Arc::clone(&self.env), job, ctx));
        self.tasks.spawn(async move {
            let res = driver.await;
            drop(slots);
            (id, res)
        });
    }

    async fn on_joined(&mut self, joined: Result<Exit, JoinError>) {
        let (id, res) = match joined {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "job supervisor task failed");
                return;
            }
        };
        let Some(run) = self.running.remove(&id) else {
            return;
        };
        let mut job = match res {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = id, error = %e, "job driver panicked");
                let mut job = run.job;
                job.push_error(format!("internal error: {}", e));
                job.status = JobStatus::Failed;
                let mut ev = job.event();
                ev.error_detail = job.last_error().map(str::to_string);
                self.emit(ev);
                job
            }
        };
        if run.cancel && job.status == JobStatus::Paused {
            self.discard(&mut job, run.keep_partial.load(Ordering::Acquire))
                .await;
        }
        if job.status.is_terminal() {
            self.queue.forget(id);
        }
        self.idle.insert(id, job);
    }

    async fn shutdown(&mut self, events: &mut mpsc::UnboundedReceiver<JobEvent>) {
        info!(
            running = self.running.len(),
            queued = self.queue.len(),
            "scheduler shutting down"
        );
        for run in self.running.values() {
            run.stop.stop(StopReason::Pause);
        }
        while let Some(joined) = self.tasks.join_next().await {
            self.drain(events);
            self.on_joined(joined).await;
        }
        self.drain(events);
    }
}
