//! Retry loop: run an attempt until success or the policy says stop.

use std::time::Duration;

use super::classify;
use super::error::SegmentError;
use super::policy::{RetryDecision, RetryPolicy};
use crate::control::StopToken;

/// Runs `attempt_fn(attempt)` (attempt is 1-based) until it succeeds or the
/// retry policy says to stop. Before each retry `on_retry(attempt, &err, delay)`
/// is called, then the loop sleeps on `stop`, so pause/cancel cuts the backoff short.
///
/// `progress` reads the bytes received so far. A failed attempt that moved it
/// forward starts a fresh failure streak, so a slow transfer cut off by the
/// request timeout keeps going instead of using up the budget.
pub fn run_with_retry<F, R, P>(
    policy: &RetryPolicy,
    stop: &StopToken,
    progress: P,
    mut on_retry: R,
    mut attempt_fn: F,
) -> Result<(), SegmentError>
where
    F: FnMut(u32) -> Result<(), SegmentError>,
    R: FnMut(u32, &SegmentError, Duration),
    P: Fn() -> u64,
{
    let mut attempt = 1u32;
    // Consecutive failed attempts that received nothing new.
    let mut streak = 0u32;
    loop {
        if let Some(reason) = stop.reason() {
            return Err(SegmentError::Stopped(reason));
        }
        let before = progress();
        let e = match attempt_fn(attempt) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if let (SegmentError::Curl(_), Some(reason)) = (&e, stop.reason()) {
            // Aborted from our own callback.
            return Err(SegmentError::Stopped(reason));
        }
        streak = if progress() > before { 1 } else { streak + 1 };
        match policy.decide(streak, classify::classify(&e)) {
            RetryDecision::NoRetry => return Err(e),
            RetryDecision::RetryAfter(d) => {
                on_retry(attempt, &e, d);
                if let Some(reason) = stop.wait_timeout(d) {
                    return Err(SegmentError::Stopped(reason));
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StopReason;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut retries = Vec::new();
        let r = run_with_retry(
            &fast(4),
            &StopToken::new(),
            || 0,
            |a, _, _| retries.push(a),
            |a| {
                if a < 3 {
                    Err(SegmentError::Http(503))
                } else {
                    Ok(())
                }
            },
        );
        assert!(r.is_ok());
        assert_eq!(retries, vec![1, 2]);
    }

    #[test]
    fn exhausts_budget_and_returns_last_error() {
        let mut calls = 0;
        let r = run_with_retry(&fast(3), &StopToken::new(), || 0, |_, _, _| {}, |_| {
            calls += 1;
            Err(SegmentError::PartialTransfer {
                expected: 10,
                received: calls,
            })
        });
        assert_eq!(calls, 3);
        assert!(matches!(
            r,
            Err(SegmentError::PartialTransfer { received: 3, .. })
        ));
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut calls = 0;
        let r = run_with_retry(&fast(5), &StopToken::new(), || 0, |_, _, _| {}, |_| {
            calls += 1;
            Err(SegmentError::Http(404))
        });
        assert_eq!(calls, 1);
        assert!(matches!(r, Err(SegmentError::Http(404))));
    }

    #[test]
    fn stop_during_backoff_returns_stopped() {
        let stop = StopToken::new();
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };
        let s2 = stop.clone();
        let r = run_with_retry(
            &policy,
            &stop,
            || 0,
            |_, _, _| s2.stop(StopReason::Pause),
            |_| Err(SegmentError::Http(500)),
        );
        assert!(matches!(r, Err(SegmentError::Stopped(StopReason::Pause))));
    }

    #[test]
    fn attempts_that_receive_data_do_not_use_up_the_budget() {
        let received = Cell::new(0u64);
        let mut retries = Vec::new();
        let r = run_with_retry(
            &fast(2),
            &StopToken::new(),
            || received.get(),
            |a, _, _| retries.push(a),
            |a| {
                // Five request timeouts, each after some bytes, then done.
                if a <= 5 {
                    received.set(received.get() + 1000);
                    Err(SegmentError::Curl(curl::Error::new(28)))
                } else {
                    Ok(())
                }
            },
        );
        assert!(r.is_ok());
        assert_eq!(retries, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn stalled_attempts_after_progress_still_give_up() {
        let received = Cell::new(0u64);
        let mut calls = 0;
        let r = run_with_retry(&fast(3), &StopToken::new(), || received.get(), |_, _, _| {}, |a| {
            calls += 1;
            if a == 1 {
                received.set(500);
            }
            Err(SegmentError::Curl(curl::Error::new(28)))
        });
        // Attempt 1 progressed, then two stalled attempts use up the budget.
        assert_eq!(calls, 3);
        assert!(matches!(r, Err(SegmentError::Curl(_))));
    }
}
