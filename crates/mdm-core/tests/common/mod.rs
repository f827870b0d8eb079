#![allow(dead_code)]

pub mod range_server;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mdm_core::config::{MdmConfig, RetryConfig};
use mdm_core::control::{StopReason, StopToken};
use mdm_core::job::JobEnv;
use mdm_core::merge::{MergeError, Merger};
use mdm_core::resume_db::ResumeDb;

/// Deterministic test payload.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Small segments, fast checkpoints and quick retries so tests finish in seconds.
pub fn test_config() -> MdmConfig {
    MdmConfig {
        min_segment_size: 64 * 1024,
        max_connections_per_job: 4,
        connect_timeout_secs: 5,
        stall_timeout_secs: 10,
        checkpoint_interval_ms: 50,
        progress_interval_ms: 50,
        scheduler_tick_ms: 50,
        retry: Some(RetryConfig {
            max_attempts: 2,
            base_delay_secs: 0.01,
            max_delay_secs: 1,
        }),
        ..MdmConfig::default()
    }
}

pub async fn env_with(config: MdmConfig, merger: Arc<dyn Merger>) -> Arc<JobEnv> {
    let db = ResumeDb::open_memory().await.unwrap();
    Arc::new(JobEnv::new(config, db, merger))
}

/// Concatenates the inputs, or fails with an encoder-style error.
pub struct FakeMerger {
    pub fail: bool,
}

impl Merger for FakeMerger {
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _timeout: Duration,
        _stop: &StopToken,
    ) -> Result<(), MergeError> {
        if self.fail {
            return Err(MergeError::Exit {
                status: "exit status: 1".to_string(),
                diagnostic: "unsupported codec".to_string(),
            });
        }
        let mut out = std::fs::read(video)?;
        out.extend(std::fs::read(audio)?);
        std::fs::write(output, out)?;
        Ok(())
    }
}

/// Holds the merge open until cancelled or `hold` runs out, then concatenates.
pub struct SlowMerger {
    pub hold: Duration,
}

impl Merger for SlowMerger {
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        timeout: Duration,
        stop: &StopToken,
    ) -> Result<(), MergeError> {
        if let Some(StopReason::Cancel) = stop.wait_timeout(self.hold) {
            return Err(MergeError::Stopped(StopReason::Cancel));
        }
        FakeMerger { fail: false }.merge(video, audio, output, timeout, stop)
    }
}
