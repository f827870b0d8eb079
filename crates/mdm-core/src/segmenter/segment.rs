//! Mutable per-segment progress.

use serde::{Deserialize, Serialize};

use super::range::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
}

/// One unit of work: a planned range plus how much of it is safely on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub range: ByteRange,
    /// Bytes written to the destination from `range.start` onward.
    pub received: u64,
    pub status: SegmentStatus,
    /// Failed attempts so far.
    pub retries: u32,
}

impl Segment {
    pub fn new(index: usize, range: ByteRange) -> Self {
        Self {
            index,
            range,
            received: 0,
            status: SegmentStatus::Pending,
            retries: 0,
        }
    }

    /// Absolute file offset of the next byte to fetch.
    pub fn next_offset(&self) -> u64 {
        self.range.start + self.received
    }

    /// Bytes still missing, if the range is bounded.
    pub fn remaining(&self) -> Option<u64> {
        self.range.len().map(|l| l.saturating_sub(self.received))
    }

    /// True when a bounded range has been fully received.
    pub fn is_filled(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// Record newly flushed bytes; bounded segments never grow past their length.
    pub fn set_received(&mut self, received: u64) {
        self.received = match self.range.len() {
            Some(len) => received.min(len),
            None => received,
        };
        if self.is_filled() {
            self.status = SegmentStatus::Completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_is_clamped_and_completes() {
        let mut s = Segment::new(0, ByteRange::bounded(100, 200));
        assert_eq!(s.next_offset(), 100);
        s.set_received(40);
        assert_eq!(s.next_offset(), 140);
        assert_eq!(s.remaining(), Some(60));
        assert_eq!(s.status, SegmentStatus::Pending);
        s.set_received(500);
        assert_eq!(s.received, 100);
        assert_eq!(s.status, SegmentStatus::Completed);
    }

    #[test]
    fn unbounded_never_fills() {
        let mut s = Segment::new(0, ByteRange::unbounded(0));
        s.set_received(1 << 40);
        assert!(!s.is_filled());
        assert_eq!(s.remaining(), None);
    }
}
