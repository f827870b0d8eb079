//! Core segmented downloader engine.
//!
//! Runs the pending segments of one stream on a bounded pool of OS threads
//! (libcurl is blocking). Each worker pulls segments from a shared queue,
//! retries its segment with backoff, and writes through the shared
//! `StorageWriter` at the segment offset. Per-segment byte counters are shared
//! with the job so it can checkpoint while workers run.

pub(crate) mod headers;
mod segment;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::control::{StopReason, StopToken};
use crate::ratelimit::Throttle;
use crate::resource::Resource;
use crate::retry::{run_with_retry, RetryPolicy, SegmentError};
use crate::segmenter::{SegmentPlan, SegmentStatus};
use crate::storage::StorageWriter;

pub use segment::{fetch_segment, SegmentTask, TransferOptions};

/// Per-segment notifications from the pool to the owning job.
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    Started { index: usize },
    Retrying {
        index: usize,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Completed { index: usize },
    Failed { index: usize, error: String },
}

/// How a pool run ended.
#[derive(Debug)]
pub enum PoolOutcome {
    /// Every pending segment is complete.
    Completed,
    /// Pause or cancel; flushed offsets are in the counters.
    Stopped(StopReason),
    /// A ranged request came back as a full or misaligned response.
    RangeIgnored { index: usize },
    /// A segment exhausted its retries or hit a fatal error.
    Failed { index: usize, error: SegmentError },
}

/// Pool limits for one run.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum concurrent workers (per-job cap, already reduced by the global budget).
    pub max_workers: usize,
    pub retry: RetryPolicy,
    pub transfer: TransferOptions,
}

/// One counter per planned segment, seeded with the bytes already on disk.
pub fn segment_counters(plan: &SegmentPlan) -> Vec<AtomicU64> {
    plan.segments
        .iter()
        .map(|s| AtomicU64::new(s.received))
        .collect()
}

fn send(events: Option<&UnboundedSender<SegmentEvent>>, ev: SegmentEvent) {
    if let Some(tx) = events {
        let _ = tx.send(ev);
    }
}

/// Download every segment of `plan` that is not complete. Blocks until all
/// workers have returned.
///
/// A network failure that exhausts its retries stops new segments from being
/// started but lets active ones finish, so their bytes are kept. Range and
/// storage failures stop every worker at once. A stop on `stop` ends the run
/// with `Stopped` once workers have flushed.
#[allow(clippy::too_many_arguments)]
pub fn download_segments(
    resource: &Resource,
    plan: &SegmentPlan,
    counters: &[AtomicU64],
    storage: &StorageWriter,
    throttle: &Throttle,
    stop: &StopToken,
    cfg: &PoolConfig,
    events: Option<&UnboundedSender<SegmentEvent>>,
) -> PoolOutcome {
    let pending: VecDeque<usize> = plan
        .segments
        .iter()
        .filter(|s| s.status != SegmentStatus::Completed)
        .map(|s| s.index)
        .collect();
    if pending.is_empty() {
        return PoolOutcome::Completed;
    }

    let count = pending.len();
    let work = Mutex::new(pending);
    let local_stop = stop.child();
    let num_workers = cfg.max_workers.max(1).min(count);
    let (tx, rx) = mpsc::channel::<(usize, Result<(), SegmentError>)>();

    std::thread::scope(|scope| {
        for _ in 0..num_workers {
            let tx = tx.clone();
            let work = &work;
            let local_stop = &local_stop;
            scope.spawn(move || loop {
                if local_stop.is_stopped() {
                    break;
                }
                let index = match work.lock().unwrap_or_else(|p| p.into_inner()).pop_front() {
                    Some(i) => i,
                    None => break,
                };
                send(events, SegmentEvent::Started { index });
                let seg = &plan.segments[index];
                let res = run_with_retry(
                    &cfg.retry,
                    local_stop,
                    || counters[index].load(Ordering::Acquire),
                    |attempt, e, delay| {
                        tracing::debug!(index, attempt, ?delay, error = %e, "segment retry");
                        send(
                            events,
                            SegmentEvent::Retrying {
                                index,
                                attempt,
                                delay,
                                error: e.to_string(),
                            },
                        );
                    },
                    |attempt| {
                        let task = SegmentTask {
                            url: resource.url_for_attempt(attempt),
                            range: seg.range,
                            single_stream: plan.single_stream,
                            resumable: plan.resumable,
                            received: &counters[index],
                        };
                        fetch_segment(&task, storage, throttle, local_stop, &cfg.transfer)
                    },
                );
                if tx.send((index, res)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut first_error: Option<PoolOutcome> = None;
        let mut to_receive = count;
        while to_receive > 0 {
            let Ok((index, res)) = rx.recv() else {
                break;
            };
            to_receive -= 1;
            match res {
                Ok(()) => {
                    tracing::debug!(
                        index,
                        bytes = counters[index].load(Ordering::Acquire),
                        "segment complete"
                    );
                    send(events, SegmentEvent::Completed { index });
                }
                Err(SegmentError::Stopped(_)) => {}
                Err(e) => {
                    tracing::warn!(index, error = %e, "segment failed");
                    send(
                        events,
                        SegmentEvent::Failed {
                            index,
                            error: e.to_string(),
                        },
                    );
                    let abort_all = matches!(
                        e,
                        SegmentError::RangeIgnored { .. } | SegmentError::Storage(_)
                    );
                    let drained = {
                        let mut q = work.lock().unwrap_or_else(|p| p.into_inner());
                        let n = q.len();
                        q.clear();
                        n
                    };
                    to_receive = to_receive.saturating_sub(drained);
                    if abort_all {
                        local_stop.stop(StopReason::Abort);
                    }
                    if first_error.is_none() {
                        first_error = Some(match e {
                            SegmentError::RangeIgnored { .. } => PoolOutcome::RangeIgnored { index },
                            e => PoolOutcome::Failed { index, error: e },
                        });
                    }
                }
            }
            // Segments never started after a stop are not reported.
            if local_stop.is_stopped() {
                let mut q = work.lock().unwrap_or_else(|p| p.into_inner());
                to_receive = to_receive.saturating_sub(q.len());
                q.clear();
            }
        }

        if let Some(outcome) = first_error {
            return outcome;
        }
        match stop.reason() {
            Some(reason) => PoolOutcome::Stopped(reason),
            None => PoolOutcome::Completed,
        }
    })
}
