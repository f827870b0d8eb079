//! `mdm run` – run the scheduler over the catalogue's queued jobs.
//!
//! Scheduler events are mirrored into the catalogue so `mdm status` and the
//! next run see the same state. Other `mdm` invocations steer this process
//! through the control socket.

use anyhow::Result;
use mdm_core::config::MdmConfig;
use mdm_core::human::{format_duration, format_size};
use mdm_core::job::{catalogue_state, JobEnv, JobEvent, JobStatus};
use mdm_core::merge::CommandMerger;
use mdm_core::resume_db::{JobId, JobState, ResumeDb};
use mdm_core::scheduler::{self, SchedulerHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::cli::control_socket;

/// Catalogue progress writes and progress lines, per job.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Writes scheduler events through to the catalogue and prints them.
struct Mirror<'a> {
    db: &'a ResumeDb,
    status: HashMap<JobId, JobStatus>,
    last_progress: HashMap<JobId, Instant>,
}

impl<'a> Mirror<'a> {
    fn new(db: &'a ResumeDb) -> Self {
        Self {
            db,
            status: HashMap::new(),
            last_progress: HashMap::new(),
        }
    }

    async fn apply(&mut self, ev: &JobEvent) -> Result<()> {
        let id = ev.job_id;
        let changed = self.status.insert(id, ev.status) != Some(ev.status);
        if changed {
            self.db.set_state(id, catalogue_state(ev.status)).await?;
            match (&ev.error_detail, ev.status) {
                (Some(e), _) => self.db.set_error(id, Some(e.as_str())).await?,
                (None, JobStatus::Planning) => self.db.set_error(id, None).await?,
                _ => {}
            }
            match &ev.error_detail {
                Some(e) => println!("[{id}] {}: {e}", ev.status),
                None => println!("[{id}] {}", ev.status),
            }
        }

        let now = Instant::now();
        let due = self
            .last_progress
            .get(&id)
            .map_or(true, |t| now.duration_since(*t) >= PROGRESS_INTERVAL);
        if changed || due {
            self.db
                .set_progress(id, ev.bytes_completed, ev.total_size)
                .await?;
            self.last_progress.insert(id, now);
            if !changed && ev.status == JobStatus::Downloading {
                println!("[{id}] {}", progress_line(ev));
            }
        }
        Ok(())
    }

    /// Catch up after missing events.
    async fn resync(&mut self, handle: &SchedulerHandle) -> Result<()> {
        for job in handle.list().await? {
            self.status.insert(job.id, job.status);
            self.db.set_state(job.id, catalogue_state(job.status)).await?;
            self.db
                .set_progress(job.id, job.bytes_completed, job.total_size)
                .await?;
        }
        Ok(())
    }
}

fn progress_line(ev: &JobEvent) -> String {
    let done = format_size(ev.bytes_completed);
    let mut line = match ev.total_size {
        Some(total) if total > 0 => format!(
            "{} / {} ({:.1}%)",
            done,
            format_size(total),
            ev.bytes_completed as f64 * 100.0 / total as f64
        ),
        _ => done,
    };
    if ev.current_speed > 0.0 {
        line.push_str(&format!("  {}/s", format_size(ev.current_speed as u64)));
    }
    if let Some(eta) = ev.eta_secs {
        line.push_str(&format!("  ETA {}", format_duration(eta)));
    }
    line
}

/// No job is queued or in progress.
async fn drained(handle: &SchedulerHandle) -> Result<bool> {
    Ok(handle
        .list()
        .await?
        .iter()
        .all(|j| j.status.is_terminal() || j.status == JobStatus::Paused))
}

pub async fn run_scheduler(
    db: ResumeDb,
    mut cfg: MdmConfig,
    jobs: Option<usize>,
    watch: bool,
) -> Result<()> {
    let recovered = db.recover_running_jobs().await?;
    if recovered > 0 {
        tracing::info!("recovered {} job(s) from previous run", recovered);
    }
    if let Some(n) = jobs {
        cfg.max_concurrent_jobs = n.max(1);
    }

    let merger = Arc::new(CommandMerger::from_config(&cfg.merge_config()));
    let env = Arc::new(JobEnv::new(cfg, db.clone(), merger));
    let handle = scheduler::start(env);
    let mut events = handle.subscribe();

    let queued = db.jobs_in_state(JobState::Queued).await?;
    let submitted = queued.len();
    for job in queued {
        if let Err(e) = handle.submit_with_id(job.id, job.job).await {
            tracing::warn!(job_id = job.id, "rejected by scheduler: {}", e);
            db.set_state(job.id, JobState::Failed).await?;
            db.set_error(job.id, Some(e.to_string().as_str())).await?;
        }
    }

    let socket_path = control_socket::socket_path();
    let listener = match &socket_path {
        Some(path) => {
            match control_socket::spawn_control_listener(handle.clone(), db.clone(), path) {
                Ok(task) => {
                    tracing::debug!(path = %path.display(), "control socket listening");
                    Some(task)
                }
                Err(e) => {
                    tracing::warn!("control socket unavailable: {:#}", e);
                    None
                }
            }
        }
        None => None,
    };

    if submitted == 0 && !watch {
        println!("No queued jobs.");
    }

    let mut mirror = Mirror::new(&db);
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted; pausing active downloads...");
                interrupted = true;
                break;
            }
            ev = events.recv() => match ev {
                Ok(ev) => mirror.apply(&ev).await?,
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!(missed = n, "event stream lagged");
                    mirror.resync(&handle).await?;
                }
                Err(RecvError::Closed) => break,
            },
            _ = tick.tick() => {
                if !watch && drained(&handle).await? {
                    break;
                }
            }
        }
    }

    // Jobs interrupted here were never paused by the user: queue them for the next run.
    let interrupted_jobs: Vec<JobId> = if interrupted {
        handle
            .list()
            .await?
            .into_iter()
            .filter(|j| j.status.is_running())
            .map(|j| j.id)
            .collect()
    } else {
        Vec::new()
    };

    if let Some(task) = listener {
        task.abort();
    }
    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }
    handle.shutdown().await?;
    loop {
        match events.try_recv() {
            Ok(ev) => mirror.apply(&ev).await?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    for id in interrupted_jobs {
        db.set_state(id, JobState::Queued).await?;
    }

    tracing::info!("run finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: JobStatus, bytes: u64, error: Option<&str>) -> JobEvent {
        JobEvent {
            job_id: 1,
            status,
            bytes_completed: bytes,
            total_size: Some(1000),
            current_speed: 0.0,
            eta_secs: None,
            error_detail: error.map(str::to_string),
        }
    }

    #[test]
    fn progress_line_shows_percent_speed_and_eta() {
        let mut ev = event(JobStatus::Downloading, 250, None);
        ev.current_speed = 2048.0;
        ev.eta_secs = Some(30.0);
        let line = progress_line(&ev);
        assert!(line.contains("(25.0%)"), "{line}");
        assert!(line.contains("2 KB/s"), "{line}");
        assert!(line.contains("ETA 30 seconds"), "{line}");
    }

    #[tokio::test]
    async fn mirror_writes_state_progress_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let db = ResumeDb::open_memory().await.unwrap();
        let id = db
            .add_job(&mdm_core::resume_db::NewJob {
                resource: mdm_core::resource::Resource::new(
                    "http://127.0.0.1:9/f",
                    dir.path().join("f"),
                ),
                priority: 0,
                start_at: None,
                speed_limit: None,
            })
            .await
            .unwrap();
        assert_eq!(id, 1);

        let mut mirror = Mirror::new(&db);
        mirror.apply(&event(JobStatus::Planning, 0, None)).await.unwrap();
        mirror.apply(&event(JobStatus::Downloading, 400, None)).await.unwrap();
        let job = db.get_job(1).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.bytes_completed, 400);

        mirror
            .apply(&event(JobStatus::Failed, 400, Some("network error on segment 0")))
            .await
            .unwrap();
        let job = db.get_job(1).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("network error on segment 0"));
    }
}
