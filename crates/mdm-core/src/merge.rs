//! Muxing a separately downloaded video and audio stream with an external encoder.
//!
//! The encoder is a black box behind `Merger`; `CommandMerger` runs the
//! configured program (ffmpeg by default) as a bounded subprocess. Success
//! needs exit status 0 and a non-empty output file.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::MergeConfig;
use crate::control::{StopReason, StopToken};

/// Keep at most this much encoder diagnostic output.
const MAX_DIAGNOSTIC: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("merge input missing: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder exited with {status}: {diagnostic}")]
    Exit { status: String, diagnostic: String },
    #[error("encoder timed out after {}s: {diagnostic}", timeout.as_secs())]
    Timeout {
        timeout: Duration,
        diagnostic: String,
    },
    #[error("encoder reported success but {} is missing or empty", .0.display())]
    EmptyOutput(PathBuf),
    #[error("merge {0}")]
    Stopped(StopReason),
    #[error("merge I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Combines two complete local files into `output` within `timeout`.
/// A cancel on `stop` ends the merge early with `MergeError::Stopped`; the
/// inputs are left in place either way.
pub trait Merger: Send + Sync {
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        timeout: Duration,
        stop: &StopToken,
    ) -> Result<(), MergeError>;
}

/// Runs an external program with `{video}`, `{audio}`, `{output}` substituted into its arguments.
#[derive(Debug, Clone)]
pub struct CommandMerger {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandMerger {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(cfg: &MergeConfig) -> Self {
        Self::new(cfg.program.clone(), cfg.args.clone())
    }

    fn expand_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let video = video.to_string_lossy();
        let audio = audio.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{video}", &video)
                    .replace("{audio}", &audio)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

/// Encoder stderr, collected on a helper thread so a full pipe never blocks it.
struct Diagnostic {
    buf: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Diagnostic {
    fn capture(child: &mut Child) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let reader = child.stderr.take().map(|mut pipe| {
            let buf = Arc::clone(&buf);
            std::thread::spawn(move || {
                let mut chunk = [0u8; 4096];
                while let Ok(n) = pipe.read(&mut chunk) {
                    if n == 0 {
                        break;
                    }
                    let mut b = buf.lock().unwrap_or_else(|p| p.into_inner());
                    b.extend_from_slice(&chunk[..n]);
                    if b.len() > 2 * MAX_DIAGNOSTIC {
                        let cut = b.len() - MAX_DIAGNOSTIC;
                        b.drain(..cut);
                    }
                }
            })
        });
        Self { buf, reader }
    }

    /// Output so far, after giving the reader up to `grace` to reach EOF.
    /// A grandchild may keep the pipe open, so the reader is never joined blindly.
    fn finish(self, grace: Duration) -> String {
        if let Some(reader) = self.reader {
            let deadline = Instant::now() + grace;
            while !reader.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        let b = self.buf.lock().unwrap_or_else(|p| p.into_inner());
        tail(String::from_utf8_lossy(&b).into_owned())
    }
}

fn tail(mut s: String) -> String {
    if s.len() > MAX_DIAGNOSTIC {
        let mut cut = s.len() - MAX_DIAGNOSTIC;
        while !s.is_char_boundary(cut) {
            cut += 1;
        }
        s.drain(..cut);
    }
    s.trim().to_string()
}

impl Merger for CommandMerger {
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        timeout: Duration,
        stop: &StopToken,
    ) -> Result<(), MergeError> {
        for input in [video, audio] {
            if !input.is_file() {
                return Err(MergeError::MissingInput(input.to_path_buf()));
            }
        }
        // A stale output from an earlier attempt must not count as success.
        remove_output(output)?;

        let args = self.expand_args(video, audio, output);
        tracing::info!(program = %self.program, ?args, "starting merge");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MergeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let diagnostic = Diagnostic::capture(&mut child);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                tracing::warn!(program = %self.program, ?timeout, "merge timed out, killing");
                kill(&mut child);
                return Err(MergeError::Timeout {
                    timeout,
                    diagnostic: diagnostic.finish(KILL_GRACE),
                });
            }
            // Pause is refused while merging; only a cancel ends the encoder early.
            match stop.wait_timeout(POLL) {
                Some(StopReason::Cancel) => {
                    tracing::info!(program = %self.program, "merge cancelled, killing");
                    kill(&mut child);
                    drop(diagnostic);
                    remove_output(output)?;
                    return Err(MergeError::Stopped(StopReason::Cancel));
                }
                Some(_) => std::thread::sleep(POLL),
                None => {}
            }
        };
        let diagnostic = diagnostic.finish(EXIT_GRACE);

        if !status.success() {
            return Err(MergeError::Exit {
                status: status.to_string(),
                diagnostic,
            });
        }
        match std::fs::metadata(output) {
            Ok(m) if m.len() > 0 => Ok(()),
            _ => Err(MergeError::EmptyOutput(output.to_path_buf())),
        }
    }
}

const POLL: Duration = Duration::from_millis(50);
const EXIT_GRACE: Duration = Duration::from_secs(2);
const KILL_GRACE: Duration = Duration::from_millis(200);

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn remove_output(output: &Path) -> Result<(), MergeError> {
    match std::fs::remove_file(output) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MergeError::Io(e)),
    }
}
