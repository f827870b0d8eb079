use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per segment (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 0.5,
            max_delay_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(self.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// External encoder used to mux a video stream with its companion audio stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Encoder executable (looked up on PATH when not absolute).
    pub program: String,
    /// Argument template; `{video}`, `{audio}` and `{output}` are substituted.
    pub args: Vec<String>,
    /// Kill the encoder after this many seconds.
    pub timeout_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: [
                "-y", "-loglevel", "error", "-i", "{video}", "-i", "{audio}", "-c", "copy",
                "{output}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 600,
        }
    }
}

/// Global configuration loaded from `~/.config/mdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdmConfig {
    /// Maximum number of jobs downloading at the same time.
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent segment connections for one job.
    pub max_connections_per_job: usize,
    /// Maximum total concurrent connections across all jobs.
    pub max_total_connections: usize,
    /// Never plan segments smaller than this many bytes.
    pub min_segment_size: u64,
    /// Aggregate bandwidth cap in bytes per second (None = unlimited).
    pub global_speed_limit: Option<u64>,
    /// Per-job bandwidth cap applied when a submission does not set one.
    pub default_job_speed_limit: Option<u64>,
    /// Receive buffer size handed to libcurl; also the largest chunk a worker writes at once.
    pub buffer_size: usize,
    pub connect_timeout_secs: u64,
    /// A transfer receiving nothing for this long fails as stalled.
    pub stall_timeout_secs: u64,
    /// Hard wall-clock cap for a single range request.
    pub request_timeout_secs: u64,
    /// Persist resume state at least this often while downloading.
    pub checkpoint_interval_ms: u64,
    /// ...or whenever this many new bytes arrived since the last checkpoint.
    pub checkpoint_bytes: u64,
    /// Interval between progress events.
    pub progress_interval_ms: u64,
    /// Scheduled-start check interval.
    pub scheduler_tick_ms: u64,
    /// Keep `.part` files and resume state when a job is cancelled without an explicit choice.
    pub keep_partial_on_cancel: bool,
    /// Optional retry policy; if missing, built-in defaults are used.
    pub retry: Option<RetryConfig>,
    /// Optional encoder settings; if missing, ffmpeg defaults are used.
    pub merge: Option<MergeConfig>,
}

impl Default for MdmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_connections_per_job: 8,
            max_total_connections: 32,
            min_segment_size: 1024 * 1024,
            global_speed_limit: None,
            default_job_speed_limit: None,
            buffer_size: 64 * 1024,
            connect_timeout_secs: 30,
            stall_timeout_secs: 30,
            request_timeout_secs: 3600,
            checkpoint_interval_ms: 1000,
            checkpoint_bytes: 8 * 1024 * 1024,
            progress_interval_ms: 250,
            scheduler_tick_ms: 500,
            keep_partial_on_cancel: false,
            retry: None,
            merge: None,
        }
    }
}

impl MdmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().policy()
    }

    pub fn merge_config(&self) -> MergeConfig {
        self.merge.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: MdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
