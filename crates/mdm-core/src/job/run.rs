//! Job driver: plan, download, checkpoint, merge, settle.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::cleanup::discard_partials;
use super::progress::{eta_secs, SpeedMeter};
use super::{parts, DownloadJob, JobEnv, JobEvent, JobStatus, Part};
use crate::control::{StopReason, StopToken};
use crate::downloader::{
    download_segments, segment_counters, PoolConfig, PoolOutcome, SegmentEvent, TransferOptions,
};
use crate::error::DownloadError;
use crate::merge::MergeError;
use crate::ratelimit::Throttle;
use crate::resume_db::{ResumeDb, ResumeRecord};
use crate::segmenter::{SegmentPlan, SegmentPlanner, SegmentStatus};
use crate::storage::{temp_path, StorageError, StorageWriter, StorageWriterBuilder};

/// Per-run handles supplied by the scheduler.
pub struct RunContext {
    pub stop: StopToken,
    /// Read when the job ends cancelled: keep `.part` files and resume records.
    pub keep_partial: Arc<AtomicBool>,
    /// Connection slots reserved for this run.
    pub connections: usize,
    pub events: mpsc::UnboundedSender<JobEvent>,
}

enum Finish {
    Completed,
    Paused,
}

enum PartOutcome {
    /// Stream is in place; its length.
    Done(u64),
    Stopped(StopReason),
}

fn stopped(reason: StopReason) -> Result<Finish, DownloadError> {
    match reason {
        StopReason::Cancel => Err(DownloadError::Cancelled),
        _ => Ok(Finish::Paused),
    }
}

/// Drive `job` until it completes, pauses, fails or is cancelled. The returned
/// job carries the final status; every transition was also sent on `ctx.events`.
pub async fn run_job(env: Arc<JobEnv>, mut job: DownloadJob, ctx: RunContext) -> DownloadJob {
    let started = Instant::now();
    let mut driver = Driver {
        env: &*env,
        ctx: &ctx,
        meter: SpeedMeter::new(job.bytes_completed),
        job: &mut job,
    };
    let result = driver.drive().await;
    driver.settle(result, started).await;
    job
}

struct Driver<'a> {
    env: &'a JobEnv,
    ctx: &'a RunContext,
    job: &'a mut DownloadJob,
    meter: SpeedMeter,
}

/// Last persisted checkpoint.
struct Saved {
    at: Instant,
    bytes: u64,
}

impl Saved {
    fn new(bytes: u64) -> Self {
        Self {
            at: Instant::now(),
            bytes,
        }
    }

    fn due(&self, bytes: u64, every: Duration, threshold: u64) -> bool {
        self.at.elapsed() >= every || bytes.saturating_sub(self.bytes) >= threshold
    }
}

fn received(counters: &[AtomicU64]) -> Vec<u64> {
    counters.iter().map(|c| c.load(Ordering::Acquire)).collect()
}

/// Flush the file, then record the offsets counted before the flush.
/// Counters only advance after a write returns, so every counted byte is durable.
async fn checkpoint(
    db: &ResumeDb,
    storage: &StorageWriter,
    counters: &[AtomicU64],
    record: &mut ResumeRecord,
) -> Result<(), DownloadError> {
    let offsets = received(counters);
    let writer = storage.clone();
    tokio::task::spawn_blocking(move || writer.sync())
        .await
        .map_err(|e| DownloadError::Internal(format!("sync task: {}", e)))??;
    record.set_received(&offsets);
    db.save_record(record).await?;
    Ok(())
}

fn open_storage(tmp: &Path, plan: &SegmentPlan) -> Result<StorageWriter, StorageError> {
    if plan.completed_bytes() > 0 {
        return StorageWriter::open_existing(tmp);
    }
    let mut builder = StorageWriterBuilder::create(tmp)?;
    if let Some(total) = plan.total_size {
        builder.preallocate(total)?;
    }
    Ok(builder.build())
}

/// Length of a stream finished by an earlier run, if it is still in place.
async fn finished_len(record: Option<&ResumeRecord>, target: &Path) -> Option<u64> {
    let record = record.filter(|r| r.finished)?;
    let len = tokio::fs::metadata(target).await.ok()?.len();
    record.total_size.map_or(true, |t| t == len).then_some(len)
}

impl Driver<'_> {
    fn emit(&self, error_detail: Option<String>) {
        let speed = if self.job.status == JobStatus::Downloading {
            self.meter.speed()
        } else {
            0.0
        };
        let total_size = self.job.total_size();
        let _ = self.ctx.events.send(JobEvent {
            job_id: self.job.id,
            status: self.job.status,
            bytes_completed: self.job.bytes_completed,
            total_size,
            current_speed: speed,
            eta_secs: eta_secs(self.job.bytes_completed, total_size, speed),
            error_detail,
        });
    }

    fn set_status(&mut self, next: JobStatus) -> Result<(), DownloadError> {
        self.job
            .transition(next)
            .map_err(|e| DownloadError::Internal(e.to_string()))?;
        debug!(job_id = self.job.id, status = %next, "job status");
        self.emit(None);
        Ok(())
    }

    fn ensure_downloading(&mut self) -> Result<(), DownloadError> {
        if self.job.status == JobStatus::Downloading {
            return Ok(());
        }
        self.set_status(JobStatus::Downloading)
    }

    fn report(&mut self, bytes: u64) {
        self.job.record_bytes(bytes);
        self.meter.sample(self.job.bytes_completed);
        self.emit(None);
    }

    async fn drive(&mut self) -> Result<Finish, DownloadError> {
        self.set_status(JobStatus::Planning)?;
        let parts = parts(&self.job.resource);
        let mut base = 0u64;
        for part in &parts {
            match self.download_part(part, base).await? {
                PartOutcome::Done(len) => base += len,
                PartOutcome::Stopped(reason) => return stopped(reason),
            }
        }
        self.ensure_downloading()?;
        self.job.record_bytes(base);

        if self.job.resource.companion.is_some() {
            if let Some(reason) = self.ctx.stop.reason() {
                return stopped(reason);
            }
            if let Some(reason) = self.merge(&parts).await? {
                return stopped(reason);
            }
        }
        for part in &parts {
            self.env.db.delete_record(&part.key()).await?;
        }
        self.set_status(JobStatus::Completed)?;
        Ok(Finish::Completed)
    }

    async fn download_part(&mut self, part: &Part, base: u64) -> Result<PartOutcome, DownloadError> {
        if let Some(reason) = self.ctx.stop.reason() {
            return Ok(PartOutcome::Stopped(reason));
        }
        let env = self.env;
        let key = part.key();
        let tmp = temp_path(&part.target);

        let mut record = env.db.load_record(&key).await?;
        if let Some(len) = finished_len(record.as_ref(), &part.target).await {
            info!(job_id = self.job.id, path = %part.target.display(), "stream already downloaded");
            return Ok(PartOutcome::Done(len));
        }
        if record.as_ref().is_some_and(|r| r.finished || !tmp.exists()) {
            debug!(job_id = self.job.id, path = %tmp.display(), "dropping stale resume record");
            env.db.delete_record(&key).await?;
            record = None;
        }

        let mut plan = SegmentPlanner::from_config(&env.config)
            .plan_with_resume(&part.resource, record.as_ref());
        if plan.completed_bytes() > 0 {
            info!(
                job_id = self.job.id,
                resumed_bytes = plan.completed_bytes(),
                segments = plan.segments.len(),
                "resuming stream"
            );
        }

        loop {
            let storage = open_storage(&tmp, &plan)?;
            self.ensure_downloading()?;
            match self.run_pool(part, &mut plan, &storage, base).await? {
                PoolOutcome::Completed => {
                    let len = self.finish_part(part, &plan, storage).await?;
                    return Ok(PartOutcome::Done(len));
                }
                PoolOutcome::Stopped(reason) => return Ok(PartOutcome::Stopped(reason)),
                PoolOutcome::RangeIgnored { index } if !plan.single_stream => {
                    warn!(
                        job_id = self.job.id,
                        index,
                        url = %part.resource.primary_url(),
                        "server ignored range request; falling back to a single stream"
                    );
                    self.job
                        .push_error(format!("segment {}: range request ignored", index));
                    env.db.delete_record(&key).await?;
                    drop(storage);
                    self.set_status(JobStatus::Planning)?;
                    plan = SegmentPlanner::single_stream(part.resource.total_size, false);
                }
                PoolOutcome::RangeIgnored { index } => {
                    return Err(DownloadError::RangeUnsupported(format!(
                        "segment {} of {}",
                        index,
                        part.resource.primary_url()
                    )));
                }
                PoolOutcome::Failed { index, error } => {
                    return Err(DownloadError::from_segment(index, error));
                }
            }
        }
    }

    /// Run the segment pool on blocking threads while reporting progress and checkpointing.
    async fn run_pool(
        &mut self,
        part: &Part,
        plan: &mut SegmentPlan,
        storage: &StorageWriter,
        base: u64,
    ) -> Result<PoolOutcome, DownloadError> {
        let env = self.env;
        let counters = Arc::new(segment_counters(plan));
        let pool_stop = self.ctx.stop.child();
        let cfg = PoolConfig {
            max_workers: self
                .ctx
                .connections
                .clamp(1, env.config.max_connections_per_job.max(1)),
            retry: env.config.retry_policy(),
            transfer: TransferOptions::from_config(&env.config),
        };
        let (seg_tx, mut seg_rx) = mpsc::unbounded_channel();
        let mut pool = {
            let resource = part.resource.clone();
            let plan = plan.clone();
            let counters = Arc::clone(&counters);
            let storage = storage.clone();
            let throttle = Throttle::new(self.job.limit.clone(), env.global_limit.clone());
            let stop = pool_stop.clone();
            tokio::task::spawn_blocking(move || {
                download_segments(
                    &resource,
                    &plan,
                    &counters,
                    &storage,
                    &throttle,
                    &stop,
                    &cfg,
                    Some(&seg_tx),
                )
            })
        };

        let mut record = ResumeRecord::from_plan(part.resource.primary_url(), &part.target, plan);
        let mut saved = Saved::new(plan.completed_bytes());
        let every = Duration::from_millis(env.config.checkpoint_interval_ms.max(1));
        let mut tick =
            tokio::time::interval(Duration::from_millis(env.config.progress_interval_ms.max(10)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let joined = loop {
            tokio::select! {
                joined = &mut pool => break joined,
                Some(ev) = seg_rx.recv() => self.on_segment_event(plan, ev),
                _ = tick.tick() => {
                    let now: u64 = received(&counters).iter().sum();
                    self.report(base + now);
                    if saved.due(now, every, env.config.checkpoint_bytes) {
                        if let Err(e) = checkpoint(&env.db, storage, &counters, &mut record).await {
                            pool_stop.stop(StopReason::Abort);
                            let _ = pool.await;
                            return Err(e);
                        }
                        saved = Saved::new(now);
                    }
                }
            }
        };
        while let Ok(ev) = seg_rx.try_recv() {
            self.on_segment_event(plan, ev);
        }
        let outcome =
            joined.map_err(|e| DownloadError::Internal(format!("segment pool: {}", e)))?;

        // Persist what is on disk before reporting the outcome.
        checkpoint(&env.db, storage, &counters, &mut record).await?;
        for (seg, n) in plan.segments.iter_mut().zip(received(&counters)) {
            seg.set_received(n);
        }
        if let PoolOutcome::Stopped(StopReason::Pause) = outcome {
            for seg in plan
                .segments
                .iter_mut()
                .filter(|s| s.status == SegmentStatus::Active)
            {
                seg.status = SegmentStatus::Paused;
            }
        }
        self.report(base + plan.completed_bytes());
        Ok(outcome)
    }

    fn on_segment_event(&mut self, plan: &mut SegmentPlan, ev: SegmentEvent) {
        match ev {
            SegmentEvent::Started { index } => {
                if let Some(s) = plan.segments.get_mut(index) {
                    s.status = SegmentStatus::Active;
                }
            }
            SegmentEvent::Retrying {
                index,
                attempt,
                delay,
                error,
            } => {
                if let Some(s) = plan.segments.get_mut(index) {
                    s.retries = attempt;
                }
                let detail = format!("segment {} attempt {}: {}", index, attempt, error);
                debug!(job_id = self.job.id, index, attempt, ?delay, "retrying segment");
                self.job.push_error(detail.clone());
                self.emit(Some(detail));
            }
            SegmentEvent::Completed { index } => {
                if let Some(s) = plan.segments.get_mut(index) {
                    s.status = SegmentStatus::Completed;
                }
            }
            SegmentEvent::Failed { index, error } => {
                if let Some(s) = plan.segments.get_mut(index) {
                    s.status = SegmentStatus::Failed;
                }
                self.job
                    .push_error(format!("segment {} failed: {}", index, error));
            }
        }
    }

    /// Verify the size, rename into place and mark the record finished.
    async fn finish_part(
        &mut self,
        part: &Part,
        plan: &SegmentPlan,
        storage: StorageWriter,
    ) -> Result<u64, DownloadError> {
        let received = plan.completed_bytes();
        let len = match plan.total_size {
            Some(expected) => {
                let on_disk = storage.file_len()?;
                if received != expected || on_disk != expected {
                    return Err(DownloadError::Integrity {
                        path: part.target.display().to_string(),
                        expected,
                        actual: if received != expected { received } else { on_disk },
                    });
                }
                expected
            }
            None => {
                storage.truncate(received)?;
                received
            }
        };
        let target = part.target.clone();
        tokio::task::spawn_blocking(move || storage.finalize(&target))
            .await
            .map_err(|e| DownloadError::Internal(format!("finalize task: {}", e)))??;

        let mut record = ResumeRecord::from_plan(part.resource.primary_url(), &part.target, plan);
        record.finished = true;
        self.env.db.save_record(&record).await?;
        info!(job_id = self.job.id, path = %part.target.display(), bytes = len, "stream complete");
        Ok(len)
    }

    /// Mux the two streams into the destination. `Some(reason)` when a cancel
    /// cut the encoder short; the streams stay in place.
    async fn merge(&mut self, parts: &[Part]) -> Result<Option<StopReason>, DownloadError> {
        let (Some(video), Some(audio)) = (parts.first(), parts.get(1)) else {
            return Err(DownloadError::Internal("merge needs two streams".to_string()));
        };
        self.set_status(JobStatus::Merging)?;
        let merger = Arc::clone(&self.env.merger);
        let video = video.target.clone();
        let audio = audio.target.clone();
        let output = self.job.resource.dest_path.clone();
        let timeout = Duration::from_secs(self.env.config.merge_config().timeout_secs);
        info!(job_id = self.job.id, output = %output.display(), "merging streams");

        let merged = {
            let (video, audio) = (video.clone(), audio.clone());
            let stop = self.ctx.stop.clone();
            tokio::task::spawn_blocking(move || {
                merger.merge(&video, &audio, &output, timeout, &stop)
            })
            .await
            .map_err(|e| DownloadError::Internal(format!("merge task: {}", e)))?
        };
        match merged {
            Ok(()) => {}
            Err(MergeError::Stopped(reason)) => return Ok(Some(reason)),
            Err(e) => return Err(e.into()),
        }
        for input in [&video, &audio] {
            if let Err(e) = tokio::fs::remove_file(input).await {
                warn!(path = %input.display(), error = %e, "failed to remove merged input");
            }
        }
        Ok(None)
    }

    /// Move to the terminal (or paused) status and log the outcome.
    async fn settle(&mut self, result: Result<Finish, DownloadError>, started: Instant) {
        let job_id = self.job.id;
        let url = self.job.resource.primary_url().to_string();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Finish::Completed) => {
                info!(job_id, url = %url, bytes = self.job.bytes_completed, elapsed_ms, "job completed");
            }
            Ok(Finish::Paused) => {
                self.force(JobStatus::Paused, None);
                info!(job_id, url = %url, bytes = self.job.bytes_completed, "job paused");
            }
            Err(DownloadError::Cancelled) => {
                let keep = self.ctx.keep_partial.load(Ordering::Acquire);
                if !keep {
                    if let Err(e) = discard_partials(&self.env.db, &self.job.resource).await {
                        warn!(job_id, error = %e, "failed to remove partial files");
                    }
                }
                self.force(JobStatus::Cancelled, None);
                info!(job_id, url = %url, bytes = self.job.bytes_completed, keep_partial = keep, "job cancelled");
            }
            Err(e) => {
                let detail = e.to_string();
                error!(
                    job_id,
                    url = %url,
                    bytes = self.job.bytes_completed,
                    error_kind = e.kind(),
                    error = %e,
                    "job failed"
                );
                self.job.push_error(detail.clone());
                self.force(JobStatus::Failed, Some(detail));
            }
        }
    }

    fn force(&mut self, next: JobStatus, detail: Option<String>) {
        if let Err(e) = self.job.transition(next) {
            warn!(job_id = self.job.id, error = %e, "forcing job status");
            self.job.status = next;
        }
        self.emit(detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MdmConfig;
    use crate::merge::Merger;
    use crate::ratelimit::TokenBucket;
    use crate::resource::Resource;
    use crate::resume_db::NewJob;

    struct NoMerge;

    impl Merger for NoMerge {
        fn merge(
            &self,
            _: &Path,
            _: &Path,
            _: &Path,
            _: Duration,
            _: &StopToken,
        ) -> Result<(), MergeError> {
            Err(MergeError::EmptyOutput("unused".into()))
        }
    }

    async fn env() -> Arc<JobEnv> {
        Arc::new(JobEnv {
            config: MdmConfig::default(),
            db: ResumeDb::open_memory().await.unwrap(),
            global_limit: TokenBucket::unlimited(),
            merger: Arc::new(NoMerge),
        })
    }

    fn job(resource: Resource) -> DownloadJob {
        DownloadJob::new(
            7,
            &NewJob {
                resource,
                priority: 0,
                start_at: None,
                speed_limit: None,
            },
        )
    }

    #[test]
    fn checkpoint_due_on_time_or_bytes() {
        let s = Saved::new(100);
        assert!(!s.due(150, Duration::from_secs(60), 1000));
        assert!(s.due(1100, Duration::from_secs(60), 1000));
        assert!(s.due(100, Duration::ZERO, 1000));
    }

    #[tokio::test]
    async fn stopped_before_start_pauses_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("f.bin");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop = StopToken::new();
        stop.stop(StopReason::Pause);
        let ctx = RunContext {
            stop,
            keep_partial: Arc::new(AtomicBool::new(false)),
            connections: 4,
            events: tx,
        };
        let out = run_job(env().await, job(Resource::new("http://127.0.0.1:9/f", &dest)), ctx).await;
        assert_eq!(out.status, JobStatus::Paused);
        assert!(!temp_path(&dest).exists());
        let statuses: Vec<JobStatus> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![JobStatus::Planning, JobStatus::Paused]);
    }

    #[tokio::test]
    async fn unreachable_server_fails_with_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("f.bin");
        let mut config = MdmConfig::default();
        config.retry = Some(crate::config::RetryConfig {
            max_attempts: 1,
            base_delay_secs: 0.0,
            max_delay_secs: 0,
        });
        config.connect_timeout_secs = 2;
        let env = Arc::new(JobEnv {
            config,
            db: ResumeDb::open_memory().await.unwrap(),
            global_limit: TokenBucket::unlimited(),
            merger: Arc::new(NoMerge),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RunContext {
            stop: StopToken::new(),
            keep_partial: Arc::new(AtomicBool::new(false)),
            connections: 1,
            events: tx,
        };
        let resource = Resource::new("http://127.0.0.1:9/f", &dest).with_size(10);
        let out = run_job(env, job(resource), ctx).await;
        assert_eq!(out.status, JobStatus::Failed);
        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert!(last.error_detail.unwrap().contains("network"));
    }
}
