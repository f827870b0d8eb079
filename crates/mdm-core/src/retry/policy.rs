//! Backoff decisions for segment attempts.

use std::time::Duration;

/// What went wrong with a segment attempt, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect or transfer timed out, or the transfer stalled.
    Timeout,
    /// 429 / 503: the server wants fewer or slower requests.
    Throttled,
    /// Reset, refused, DNS failure, short body.
    Connection,
    /// Any other 5xx.
    Server(u16),
    /// Retrying the same request cannot help (4xx, range ignored, disk, stop).
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Bounded exponential backoff, built from `[retry]` in `MdmConfig`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per segment, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Throttled attempts wait one step longer than other transient failures.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let step = match kind {
            ErrorKind::Throttled => attempt.saturating_add(1),
            _ => attempt,
        };
        RetryDecision::RetryAfter(self.delay(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let p = policy();
        let delays: Vec<u128> = (1..=6).map(|a| p.delay(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(p.delay(u32::MAX), p.max_delay);
    }

    #[test]
    fn fatal_is_never_retried() {
        assert_eq!(policy().decide(1, ErrorKind::Fatal), RetryDecision::NoRetry);
    }

    #[test]
    fn throttled_waits_longer() {
        let p = policy();
        assert_eq!(
            p.decide(1, ErrorKind::Server(502)),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            p.decide(1, ErrorKind::Throttled),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
    }

    #[test]
    fn last_attempt_gives_up() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..policy()
        };
        assert!(matches!(
            p.decide(2, ErrorKind::Timeout),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(3, ErrorKind::Connection), RetryDecision::NoRetry);
    }
}
