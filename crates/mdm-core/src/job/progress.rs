//! Progress events and speed estimation.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::JobStatus;
use crate::resume_db::JobId;

/// Emitted on every status transition and periodically while downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub bytes_completed: u64,
    pub total_size: Option<u64>,
    /// Bytes per second, smoothed.
    pub current_speed: f64,
    pub eta_secs: Option<f64>,
    pub error_detail: Option<String>,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Weight of the newest sample in the moving average.
const ALPHA: f64 = 0.3;

/// Exponentially smoothed transfer rate.
#[derive(Debug)]
pub(crate) struct SpeedMeter {
    last_at: Instant,
    last_bytes: u64,
    speed: f64,
    primed: bool,
}

impl SpeedMeter {
    pub(crate) fn new(bytes: u64) -> Self {
        Self {
            last_at: Instant::now(),
            last_bytes: bytes,
            speed: 0.0,
            primed: false,
        }
    }

    /// Feed the current byte count; returns the smoothed speed.
    pub(crate) fn sample(&mut self, bytes: u64) -> f64 {
        self.sample_at(bytes, Instant::now())
    }

    fn sample_at(&mut self, bytes: u64, now: Instant) -> f64 {
        let dt = now.saturating_duration_since(self.last_at).as_secs_f64();
        if dt <= 0.0 {
            return self.speed;
        }
        let inst = bytes.saturating_sub(self.last_bytes) as f64 / dt;
        self.speed = if self.primed {
            ALPHA * inst + (1.0 - ALPHA) * self.speed
        } else {
            inst
        };
        self.primed = true;
        self.last_at = now;
        self.last_bytes = bytes;
        self.speed
    }

    pub(crate) fn speed(&self) -> f64 {
        self.speed
    }
}

/// Seconds left at `speed`, when both the total and a positive speed are known.
pub(crate) fn eta_secs(bytes: u64, total: Option<u64>, speed: f64) -> Option<f64> {
    let total = total?;
    let remaining = total.saturating_sub(bytes);
    if remaining == 0 {
        return Some(0.0);
    }
    (speed > 0.0).then(|| remaining as f64 / speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn speed_is_smoothed() {
        let t0 = Instant::now();
        let mut m = SpeedMeter::new(0);
        m.last_at = t0;
        let s1 = m.sample_at(1000, t0 + Duration::from_secs(1));
        assert!((s1 - 1000.0).abs() < 1e-6);
        let s2 = m.sample_at(1000, t0 + Duration::from_secs(2));
        assert!((s2 - 700.0).abs() < 1e-6);
        // A restart (fewer bytes) counts as no progress, not negative speed.
        let s3 = m.sample_at(10, t0 + Duration::from_secs(3));
        assert!(s3 >= 0.0);
    }

    #[test]
    fn eta_needs_total_and_speed() {
        assert_eq!(eta_secs(50, Some(150), 10.0), Some(10.0));
        assert_eq!(eta_secs(150, Some(150), 0.0), Some(0.0));
        assert_eq!(eta_secs(50, None, 10.0), None);
        assert_eq!(eta_secs(50, Some(150), 0.0), None);
    }
}
