//! Control socket: server (during `mdm run`) and client (every other command).
//! Protocol: one JSON request per line, answered by one JSON response line.

use anyhow::{bail, Context, Result};
use mdm_core::resume_db::{JobId, ResumeDb};
use mdm_core::scheduler::{JobSnapshot, SchedulerError, SchedulerHandle, SpeedTarget};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use super::catalogue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    /// Pick up a job just added to the catalogue.
    Submit { id: JobId },
    Pause { id: JobId },
    Resume { id: JobId },
    Cancel { id: JobId, keep_partial: bool },
    Limit { target: SpeedTarget, rate: Option<u64> },
    ScheduleAll { start_at: i64 },
    List,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobSnapshot>,
}

impl Response {
    fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    fn failed(e: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            error: Some(e.to_string()),
            ..Self::default()
        }
    }

    /// Turn a refusal from the running scheduler into an error.
    pub fn into_result(self) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            bail!(self.error.unwrap_or_else(|| "request refused".to_string()))
        }
    }
}

/// Serves `path` until the returned task is aborted. Removes a stale socket first.
pub fn spawn_control_listener(
    handle: SchedulerHandle,
    db: ResumeDb,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handle = handle.clone();
                    let db = db.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, &handle, &db).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    }))
}

async fn serve(stream: UnixStream, handle: &SchedulerHandle, db: &ResumeDb) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(line) {
            Ok(req) => {
                tracing::debug!(?req, "control request");
                dispatch(handle, db, req).await
            }
            Err(e) => Response::failed(format!("malformed request: {}", e)),
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        write.write_all(&out).await?;
    }
    Ok(())
}

fn reply(r: Result<()>) -> Response {
    match r {
        Ok(()) => Response::ok(),
        Err(e) => Response::failed(format!("{:#}", e)),
    }
}

/// Apply a request to the scheduler. Jobs the scheduler has never seen (paused
/// before this run started, or finished long ago) are handled in the catalogue.
async fn dispatch(handle: &SchedulerHandle, db: &ResumeDb, req: Request) -> Response {
    match req {
        Request::Submit { id } => reply(submit(handle, db, id).await),
        Request::Pause { id } => match handle.pause(id).await {
            Err(SchedulerError::UnknownJob(_)) => reply(catalogue::pause(db, id).await),
            r => reply(r.map_err(Into::into)),
        },
        Request::Resume { id } => match handle.resume(id).await {
            Err(SchedulerError::UnknownJob(_)) => {
                let r = async {
                    if catalogue::resume(db, id).await? {
                        submit(handle, db, id).await?;
                    }
                    Ok::<(), anyhow::Error>(())
                };
                reply(r.await)
            }
            r => reply(r.map_err(Into::into)),
        },
        Request::Cancel { id, keep_partial } => match handle.cancel(id, keep_partial).await {
            Err(SchedulerError::UnknownJob(_)) => {
                reply(catalogue::cancel(db, id, keep_partial).await)
            }
            r => reply(r.map_err(Into::into)),
        },
        Request::Limit { target, rate } => {
            let live = handle.set_speed_limit(target, rate).await;
            match (target, live) {
                (SpeedTarget::Job(id), Ok(()) | Err(SchedulerError::UnknownJob(_))) => {
                    reply(catalogue::set_limit(db, id, rate).await)
                }
                (_, r) => reply(r.map_err(Into::into)),
            }
        }
        Request::ScheduleAll { start_at } => {
            if let Err(e) = handle.schedule_all(start_at).await {
                return Response::failed(e);
            }
            match catalogue::schedule_all(db, start_at).await {
                Ok(count) => Response {
                    count: Some(count),
                    ..Response::ok()
                },
                Err(e) => Response::failed(format!("{:#}", e)),
            }
        }
        Request::List => match handle.list().await {
            Ok(jobs) => Response {
                jobs,
                ..Response::ok()
            },
            Err(e) => Response::failed(e),
        },
    }
}

async fn submit(handle: &SchedulerHandle, db: &ResumeDb, id: JobId) -> Result<()> {
    let job = catalogue::require(db, id).await?;
    match handle.submit_with_id(id, job.job).await {
        Ok(_) | Err(SchedulerError::DuplicateJob(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Sends `req` to a running `mdm run`. `Ok(None)` when nothing is listening.
pub async fn send(socket_path: &Path, req: &Request) -> Result<Option<Response>> {
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Ok(None)
        }
        Err(e) => return Err(e).context("connect control socket"),
    };
    let (read, mut write) = stream.into_split();
    let mut msg = serde_json::to_vec(req)?;
    msg.push(b'\n');
    write.write_all(&msg).await?;

    let mut lines = BufReader::new(read).lines();
    let line = lines
        .next_line()
        .await?
        .context("scheduler closed the control connection")?;
    Ok(Some(serde_json::from_str(&line)?))
}

pub fn socket_path() -> Option<PathBuf> {
    mdm_core::control::default_control_socket_path().ok()
}

/// `send` on the default socket.
pub async fn request(req: &Request) -> Result<Option<Response>> {
    match socket_path() {
        Some(path) => send(&path, req).await,
        None => Ok(None),
    }
}
