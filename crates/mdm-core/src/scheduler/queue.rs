//! Pending jobs ordered for admission.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use crate::resume_db::JobId;

/// Admission order: priority (high first), scheduled start (early first),
/// then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    priority: Reverse<i32>,
    start_at: i64,
    seq: u64,
    id: JobId,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    order: BTreeSet<Key>,
    keys: HashMap<JobId, Key>,
    /// Submission sequence per job; a re-queued job keeps its original place among equals.
    seqs: HashMap<JobId, u64>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Add (or re-add) `id`. A job already queued is re-keyed.
    pub fn push(&mut self, id: JobId, priority: i32, start_at: Option<i64>) {
        self.remove(id);
        let seq = match self.seqs.get(&id) {
            Some(&seq) => seq,
            None => {
                self.next_seq += 1;
                self.seqs.insert(id, self.next_seq);
                self.next_seq
            }
        };
        let key = Key {
            priority: Reverse(priority),
            start_at: start_at.unwrap_or(i64::MIN),
            seq,
            id,
        };
        self.order.insert(key);
        self.keys.insert(id, key);
    }

    pub fn remove(&mut self, id: JobId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => self.order.remove(&key),
            None => false,
        }
    }

    /// Drop every trace of `id`, including its submission sequence.
    pub fn forget(&mut self, id: JobId) {
        self.remove(id);
        self.seqs.remove(&id);
    }

    /// Change the start time of a queued job. Returns false if it is not queued.
    pub fn reschedule(&mut self, id: JobId, start_at: Option<i64>) -> bool {
        let Some(key) = self.keys.get(&id).copied() else {
            return false;
        };
        self.push(id, key.priority.0, start_at);
        true
    }

    /// Take the first job in admission order whose start time has arrived.
    pub fn pop_ready(&mut self, now: i64) -> Option<JobId> {
        let key = self.order.iter().find(|k| k.start_at <= now).copied()?;
        self.order.remove(&key);
        self.keys.remove(&key.id);
        Some(key.id)
    }
}
