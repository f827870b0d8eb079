//! Job scheduler.
//!
//! A single tokio task owns the queue and the running set; callers talk to it
//! through a cloneable `SchedulerHandle`. Jobs are admitted in priority order
//! once their start time has arrived, while fewer than `max_concurrent_jobs`
//! run and the global connection budget has room.

mod actor;
mod budget;
mod command;
mod handle;
mod queue;
mod types;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::job::JobEnv;

pub use budget::{ConnectionBudget, ConnectionSlots};
pub use handle::SchedulerHandle;
pub use queue::JobQueue;
pub use types::{JobSnapshot, SchedulerError, SpeedTarget};

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Spawn the scheduler actor on the current tokio runtime.
pub fn start(env: Arc<JobEnv>) -> SchedulerHandle {
    let (commands_tx, commands_rx) = mpsc::channel(64);
    let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let (job_tx, job_rx) = mpsc::unbounded_channel();
    let actor = actor::Actor::new(env, job_tx, events_tx.clone());
    tokio::spawn(actor.run(commands_rx, job_rx));
    SchedulerHandle {
        commands: commands_tx,
        events: events_tx,
    }
}

#[cfg(test)]
mod tests;
