//! Job-level error taxonomy.

use crate::control::StopReason;
use crate::merge::MergeError;
use crate::retry::SegmentError;
use crate::storage::StorageError;

/// Why a job attempt ended without completing.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Timeout, reset, DNS, HTTP status, or short body, after retries.
    #[error("network error on segment {segment}: {source}")]
    Network {
        segment: usize,
        #[source]
        source: SegmentError,
    },
    /// Server ignored range requests even in single-stream mode.
    #[error("server does not honour range requests: {0}")]
    RangeUnsupported(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Final size differs from the declared size.
    #[error("size mismatch for {path}: expected {expected} bytes, have {actual}")]
    Integrity {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// User-initiated; never reported as a failure.
    #[error("cancelled")]
    Cancelled,
    /// Persistence or task plumbing failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DownloadError {
    /// Short machine-friendly kind for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::Network { .. } => "network",
            DownloadError::RangeUnsupported(_) => "range_unsupported",
            DownloadError::Storage(_) => "storage",
            DownloadError::Integrity { .. } => "integrity",
            DownloadError::Merge(_) => "merge",
            DownloadError::Cancelled => "cancelled",
            DownloadError::Internal(_) => "internal",
        }
    }

    /// Map a worker error for `segment` into the job taxonomy.
    pub fn from_segment(segment: usize, e: SegmentError) -> Self {
        match e {
            SegmentError::Storage(s) => DownloadError::Storage(s),
            SegmentError::RangeIgnored { .. } => DownloadError::RangeUnsupported(e.to_string()),
            SegmentError::Stopped(StopReason::Cancel) => DownloadError::Cancelled,
            source => DownloadError::Network { segment, source },
        }
    }
}

impl From<anyhow::Error> for DownloadError {
    fn from(e: anyhow::Error) -> Self {
        DownloadError::Internal(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn segment_errors_map_to_kinds() {
        let net = DownloadError::from_segment(2, SegmentError::Http(503));
        assert_eq!(net.kind(), "network");
        assert!(net.to_string().contains("segment 2"));

        let disk = DownloadError::from_segment(
            0,
            SegmentError::Storage(StorageError::DiskFull {
                path: PathBuf::from("/tmp/x"),
            }),
        );
        assert_eq!(disk.kind(), "storage");

        let range = DownloadError::from_segment(
            1,
            SegmentError::RangeIgnored {
                status: 200,
                content_range: None,
            },
        );
        assert_eq!(range.kind(), "range_unsupported");

        let cancel = DownloadError::from_segment(0, SegmentError::Stopped(StopReason::Cancel));
        assert!(matches!(cancel, DownloadError::Cancelled));
        assert_eq!(cancel.kind(), "cancelled");
    }
}
