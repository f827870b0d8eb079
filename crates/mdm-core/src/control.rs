//! Cooperative stop tokens for pause/cancel, and the control socket location.
//!
//! Each running job owns a `StopToken`; its segment workers check it in their
//! transfer callbacks and sleep on it while backing off or waiting for rate
//! allowance, so a pause or cancel wakes them immediately.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Why a job was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Cancel,
    /// Internal: a sibling segment failed fatally.
    Abort,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Pause => "paused",
            StopReason::Cancel => "cancelled",
            StopReason::Abort => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Inner {
    reason: Mutex<Option<StopReason>>,
    cond: Condvar,
    children: Mutex<Vec<StopToken>>,
}

/// Shared stop flag with a condition variable. Clones observe the same flag.
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("reason", &self.reason())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. The first reason wins; later calls are ignored.
    /// Propagates to every child token.
    pub fn stop(&self, reason: StopReason) {
        {
            let mut r = lock(&self.inner.reason);
            if r.is_none() {
                *r = Some(reason);
            }
        }
        self.inner.cond.notify_all();
        for child in lock(&self.inner.children).iter() {
            child.stop(reason);
        }
    }

    pub fn reason(&self) -> Option<StopReason> {
        *lock(&self.inner.reason)
    }

    pub fn is_stopped(&self) -> bool {
        self.reason().is_some()
    }

    /// Token that stops when `self` stops, and can also be stopped on its own.
    pub fn child(&self) -> StopToken {
        let child = StopToken::new();
        let mut children = lock(&self.inner.children);
        if let Some(reason) = self.reason() {
            child.stop(reason);
        }
        children.push(child.clone());
        child
    }

    /// Sleep up to `timeout`. Returns the stop reason if stopped before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let deadline = Instant::now() + timeout;
        let mut r = lock(&self.inner.reason);
        loop {
            if let Some(reason) = *r {
                return Some(reason);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            r = self
                .inner
                .cond
                .wait_timeout(r, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|p| p.into_inner().0);
        }
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    Ok(crate::logging::state_dir()?.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let t = StopToken::new();
        assert!(!t.is_stopped());
        t.stop(StopReason::Pause);
        t.stop(StopReason::Cancel);
        assert_eq!(t.reason(), Some(StopReason::Pause));
    }

    #[test]
    fn wait_times_out_without_stop() {
        let t = StopToken::new();
        let start = Instant::now();
        assert_eq!(t.wait_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_wakes_waiter_early() {
        let t = StopToken::new();
        let t2 = t.clone();
        let h = std::thread::spawn(move || {
            let start = Instant::now();
            let r = t2.wait_timeout(Duration::from_secs(10));
            (r, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        t.stop(StopReason::Cancel);
        let (r, elapsed) = h.join().unwrap();
        assert_eq!(r, Some(StopReason::Cancel));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn parent_stop_reaches_child_but_not_reverse() {
        let parent = StopToken::new();
        let child = parent.child();
        child.stop(StopReason::Abort);
        assert!(!parent.is_stopped());

        let other = parent.child();
        parent.stop(StopReason::Pause);
        assert_eq!(other.reason(), Some(StopReason::Pause));
        assert_eq!(parent.child().reason(), Some(StopReason::Pause));
    }
}
