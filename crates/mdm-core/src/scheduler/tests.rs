//! Scheduler actor tests that need no network: jobs are either scheduled far
//! in the future or point at a closed local port.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use super::*;
use crate::config::{MdmConfig, RetryConfig};
use crate::control::StopToken;
use crate::job::{JobEvent, JobStatus};
use crate::merge::{MergeError, Merger};
use crate::resource::Resource;
use crate::resume_db::{unix_timestamp, JobId, NewJob, ResumeDb};

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

async fn scheduler(config: MdmConfig) -> SchedulerHandle {
    let db = ResumeDb::open_memory().await.unwrap();
    start(Arc::new(JobEnv::new(config, db, Arc::new(NoMerge))))
}

fn later(url: &str) -> NewJob {
    NewJob {
        resource: Resource::new(url, "/tmp/mdm-scheduler-test.bin"),
        priority: 0,
        start_at: Some(unix_timestamp() + 3600),
        speed_limit: None,
    }
}

async fn wait_for(rx: &mut broadcast::Receiver<JobEvent>, id: JobId, status: JobStatus) {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let ev = rx.recv().await.unwrap();
            if ev.job_id == id && ev.status == status {
                return;
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn submit_list_and_snapshot() {
    let s = scheduler(MdmConfig::default()).await;
    let a = s.submit(later("http://127.0.0.1:9/a")).await.unwrap();
    let b = s.submit_with_id(40, later("http://127.0.0.1:9/b")).await.unwrap();
    let c = s.submit(later("http://127.0.0.1:9/c")).await.unwrap();
    assert_eq!((a, b, c), (1, 40, 41));

    let all = s.list().await.unwrap();
    assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1, 40, 41]);
    assert!(all.iter().all(|j| j.status == JobStatus::Queued));
    assert_eq!(s.snapshot(40).await.unwrap().unwrap().url, "http://127.0.0.1:9/b");
    assert!(s.snapshot(2).await.unwrap().is_none());

    assert!(matches!(
        s.submit_with_id(40, later("http://127.0.0.1:9/d")).await,
        Err(SchedulerError::DuplicateJob(40))
    ));
    s.shutdown().await.unwrap();
    assert!(matches!(s.list().await, Err(SchedulerError::Closed)));
}

#[tokio::test]
async fn invalid_playlist_queues_nothing() {
    let s = scheduler(MdmConfig::default()).await;
    let mut bad = later("http://127.0.0.1:9/2");
    bad.resource.urls.clear();
    let err = s
        .submit_playlist(vec![later("http://127.0.0.1:9/1"), bad])
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidResource(_)));
    assert!(s.list().await.unwrap().is_empty());

    let ids = s
        .submit_playlist(vec![later("http://127.0.0.1:9/1"), later("http://127.0.0.1:9/2")])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn pause_is_rejected_while_queued_and_cancel_is_final() {
    let s = scheduler(MdmConfig::default()).await;
    let id = s.submit(later("http://127.0.0.1:9/a")).await.unwrap();
    assert!(matches!(
        s.pause(id).await,
        Err(SchedulerError::InvalidState {
            status: JobStatus::Queued,
            ..
        })
    ));
    s.cancel(id, false).await.unwrap();
    assert_eq!(
        s.snapshot(id).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );
    assert!(s.resume(id).await.is_err());
    assert!(s.cancel(id, false).await.is_err());
    assert!(matches!(
        s.pause(99).await,
        Err(SchedulerError::UnknownJob(99))
    ));
}

#[tokio::test]
async fn speed_limits_apply_to_jobs_and_default() {
    let cfg = MdmConfig {
        default_job_speed_limit: Some(1000),
        ..MdmConfig::default()
    };
    let s = scheduler(cfg).await;
    let id = s.submit(later("http://127.0.0.1:9/a")).await.unwrap();
    assert_eq!(s.snapshot(id).await.unwrap().unwrap().speed_limit, Some(1000));
    s.set_speed_limit(SpeedTarget::Job(id), Some(0)).await.unwrap();
    assert_eq!(s.snapshot(id).await.unwrap().unwrap().speed_limit, None);
    s.set_speed_limit(SpeedTarget::Global, Some(5000)).await.unwrap();
    assert!(s
        .set_speed_limit(SpeedTarget::Job(77), Some(1))
        .await
        .is_err());
}

#[tokio::test]
async fn schedule_all_moves_start_times() {
    let s = scheduler(MdmConfig::default()).await;
    let mut rx = s.subscribe();
    let dir = tempfile::tempdir().unwrap();
    let mut first = later("http://127.0.0.1:9/a");
    first.resource.dest_path = dir.path().join("a");
    let a = s.submit(first).await.unwrap();
    let b = s.submit(later("http://127.0.0.1:9/b")).await.unwrap();
    s.cancel(b, true).await.unwrap();

    let when = unix_timestamp() + 7200;
    assert_eq!(s.schedule_all(when).await.unwrap(), 1);
    assert_eq!(s.snapshot(a).await.unwrap().unwrap().start_at, Some(when));

    // Pulling the start time into the past admits the job on the next tick.
    s.schedule_all(0).await.unwrap();
    wait_for(&mut rx, a, JobStatus::Planning).await;
}

#[tokio::test]
async fn failed_job_can_be_retried() {
    let cfg = MdmConfig {
        retry: Some(RetryConfig {
            max_attempts: 1,
            base_delay_secs: 0.0,
            max_delay_secs: 0,
        }),
        ..MdmConfig::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let s = scheduler(cfg).await;
    let mut rx = s.subscribe();
    let id = s
        .submit(NewJob {
            resource: Resource::new("http://127.0.0.1:9/x", dir.path().join("x")).with_size(10),
            priority: 0,
            start_at: None,
            speed_limit: None,
        })
        .await
        .unwrap();
    wait_for(&mut rx, id, JobStatus::Failed).await;
    // The failure event is sent before the slot is released.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snap = s.snapshot(id).await.unwrap().unwrap();
    assert_eq!(snap.status, JobStatus::Failed);
    assert!(snap.last_error.is_some());

    s.resume(id).await.unwrap();
    wait_for(&mut rx, id, JobStatus::Failed).await;
}
