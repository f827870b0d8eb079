//! Messages from `SchedulerHandle` to the actor.

use tokio::sync::oneshot;

use super::types::{JobSnapshot, SchedulerError, SpeedTarget};
use crate::resume_db::{JobId, NewJob};

type Reply<T> = oneshot::Sender<Result<T, SchedulerError>>;

pub(super) enum Command {
    Submit {
        id: Option<JobId>,
        job: NewJob,
        reply: Reply<JobId>,
    },
    SubmitPlaylist {
        jobs: Vec<NewJob>,
        reply: Reply<Vec<JobId>>,
    },
    Pause {
        id: JobId,
        reply: Reply<()>,
    },
    Resume {
        id: JobId,
        reply: Reply<()>,
    },
    Cancel {
        id: JobId,
        keep_partial: bool,
        reply: Reply<()>,
    },
    SetSpeedLimit {
        target: SpeedTarget,
        rate: Option<u64>,
        reply: Reply<()>,
    },
    ScheduleAll {
        start_at: i64,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        id: JobId,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
    List {
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
