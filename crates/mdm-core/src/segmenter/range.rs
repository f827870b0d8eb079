//! Byte ranges and even splitting.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)`. `end == None` means "until the server stops sending".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive), if bounded.
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn unbounded(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Length in bytes, if bounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|e| e.saturating_sub(self.start))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// HTTP Range header value for the part of this range starting `skip` bytes in:
    /// `bytes=a-b` (inclusive end) or `bytes=a-` when unbounded.
    pub fn header_value(&self, skip: u64) -> String {
        format!("bytes={}", self.curl_range(skip))
    }

    /// Same as `header_value` without the `bytes=` unit (what libcurl's `range` expects).
    pub fn curl_range(&self, skip: u64) -> String {
        let from = self.start + skip;
        match self.end {
            Some(end) if from < end => format!("{}-{}", from, end - 1),
            Some(end) => format!("{}-{}", end.saturating_sub(1), end.saturating_sub(1)),
            None => format!("{}-", from),
        }
    }
}

/// Splits `total_size` bytes into `segment_count` contiguous ranges.
///
/// Ranges are as equal as possible; earlier ranges absorb the remainder bytes.
/// Returns an empty vec if `total_size` is 0 or `segment_count` is 0.
pub fn plan_segments(total_size: u64, segment_count: usize) -> Vec<ByteRange> {
    if total_size == 0 || segment_count == 0 {
        return Vec::new();
    }

    let segment_count = (segment_count as u64).min(total_size);
    let base = total_size / segment_count;
    let remainder = total_size % segment_count;

    let mut out = Vec::with_capacity(segment_count as usize);
    let mut offset = 0u64;

    for i in 0..segment_count {
        let len = base + if i < remainder { 1 } else { 0 };
        let end = (offset + len).min(total_size);
        out.push(ByteRange::bounded(offset, end));
        offset = end;
    }

    out
}
