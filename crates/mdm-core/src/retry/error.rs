//! Segment download error type for retry classification.

use crate::control::StopReason;
use crate::storage::StorageError;

/// Error returned by a single segment attempt. Classified for retry before
/// being surfaced to the job as a `DownloadError`.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Curl reported an error (timeout, stall, connection, DNS).
    #[error("{0}")]
    Curl(#[source] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0} ({})", crate::human::http_reason(*.0))]
    Http(u32),
    /// A ranged request was answered with something other than the requested range.
    #[error("server ignored range request (status {status}, content-range {content_range:?})")]
    RangeIgnored {
        status: u32,
        content_range: Option<String>,
    },
    /// Transfer ended before the segment was complete (e.g. server closed early).
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Disk/storage write failed. Not retried.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    /// Stopped by pause/cancel or a failing sibling.
    #[error("stopped: {0}")]
    Stopped(StopReason),
}
