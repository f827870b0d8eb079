//! Segment plans: how one stream is split, and how a plan is rebuilt from resume state.

use crate::config::MdmConfig;
use crate::resource::Resource;
use crate::resume_db::ResumeRecord;

use super::range::{plan_segments, ByteRange};
use super::segment::{Segment, SegmentStatus};

/// Ordered, contiguous segments covering one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub total_size: Option<u64>,
    /// One unbounded-or-whole-file segment; used when ranges are unavailable or size unknown.
    pub single_stream: bool,
    /// A partially received stream may continue from its offset (server accepts ranges).
    pub resumable: bool,
    pub segments: Vec<Segment>,
}

impl SegmentPlan {
    fn from_ranges(
        total_size: Option<u64>,
        single_stream: bool,
        resumable: bool,
        ranges: Vec<ByteRange>,
    ) -> Self {
        let segments = ranges
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let mut s = Segment::new(i, r);
                if r.is_empty() {
                    s.status = SegmentStatus::Completed;
                }
                s
            })
            .collect();
        Self {
            total_size,
            single_stream,
            resumable,
            segments,
        }
    }

    pub fn ranges(&self) -> impl Iterator<Item = ByteRange> + '_ {
        self.segments.iter().map(|s| s.range)
    }

    /// Bytes already on disk according to the plan.
    pub fn completed_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.received).sum()
    }

    /// Segments that still need a worker.
    pub fn pending(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.segments
            .iter()
            .filter(|s| s.status != SegmentStatus::Completed)
    }
}

/// Decides segment boundaries for a stream.
#[derive(Debug, Clone, Copy)]
pub struct SegmentPlanner {
    /// Upper bound on segments (one connection each).
    pub max_connections: usize,
    /// Segments are never planned smaller than this.
    pub min_segment_size: u64,
}

impl SegmentPlanner {
    pub fn new(max_connections: usize, min_segment_size: u64) -> Self {
        Self {
            max_connections: max_connections.max(1),
            min_segment_size: min_segment_size.max(1),
        }
    }

    pub fn from_config(cfg: &MdmConfig) -> Self {
        Self::new(cfg.max_connections_per_job, cfg.min_segment_size)
    }

    /// Number of segments for a stream of `total_size` bytes.
    pub fn segment_count(&self, total_size: u64) -> usize {
        let by_floor = (total_size / self.min_segment_size).max(1);
        (self.max_connections as u64).min(by_floor) as usize
    }

    /// Fresh plan for `resource`, ignoring any resume state.
    pub fn plan(&self, resource: &Resource) -> SegmentPlan {
        match resource.total_size {
            Some(total) if resource.supports_range && total > 0 => SegmentPlan::from_ranges(
                Some(total),
                false,
                true,
                plan_segments(total, self.segment_count(total)),
            ),
            total => Self::single_stream(total, resource.supports_range),
        }
    }

    /// One segment covering the whole stream.
    pub fn single_stream(total_size: Option<u64>, resumable: bool) -> SegmentPlan {
        let range = match total_size {
            Some(total) => ByteRange::bounded(0, total),
            None => ByteRange::unbounded(0),
        };
        SegmentPlan::from_ranges(total_size, true, resumable, vec![range])
    }

    /// Plan seeded from `record` when it is valid and matches `resource`; otherwise a fresh plan.
    pub fn plan_with_resume(
        &self,
        resource: &Resource,
        record: Option<&ResumeRecord>,
    ) -> SegmentPlan {
        let Some(record) = record else {
            return self.plan(resource);
        };
        if let Err(reason) = record.validate() {
            tracing::warn!(url = %record.url, %reason, "ignoring invalid resume record");
            return self.plan(resource);
        }
        if record.total_size != resource.total_size {
            tracing::info!(
                url = %record.url,
                recorded = ?record.total_size,
                declared = ?resource.total_size,
                "size changed since last attempt; starting over"
            );
            return self.plan(resource);
        }
        if !record.single_stream && !resource.supports_range {
            return self.plan(resource);
        }

        let resumable = record.resumable && resource.supports_range;
        let ranges: Vec<ByteRange> = record.segments.iter().map(|s| s.range()).collect();
        let mut plan =
            SegmentPlan::from_ranges(record.total_size, record.single_stream, resumable, ranges);
        for (seg, saved) in plan.segments.iter_mut().zip(&record.segments) {
            if resumable || seg.is_filled() {
                seg.set_received(saved.received);
            }
        }
        // A stream without range support that did not finish restarts from zero.
        if !resumable {
            for seg in plan.segments.iter_mut().filter(|s| !s.is_filled()) {
                seg.received = 0;
                seg.status = SegmentStatus::Pending;
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume_db::ResumeRecord;

    const MB: u64 = 1024 * 1024;

    fn ranged(total: u64) -> Resource {
        Resource::new("http://example.com/v.mp4", "/tmp/v.mp4")
            .with_size(total)
            .with_range_support(true)
    }

    #[test]
    fn hundred_megabytes_four_connections_gives_four_equal_segments() {
        let planner = SegmentPlanner::new(4, MB);
        let plan = planner.plan(&ranged(100 * MB));
        assert!(!plan.single_stream);
        assert_eq!(plan.segments.len(), 4);
        for (i, s) in plan.segments.iter().enumerate() {
            assert_eq!(s.range.start, i as u64 * 25 * MB);
            assert_eq!(s.range.len(), Some(25 * MB));
            assert_eq!(s.status, SegmentStatus::Pending);
        }
    }

    #[test]
    fn no_range_support_always_single_segment() {
        let planner = SegmentPlanner::new(16, 1);
        let r = Resource::new("http://example.com/x", "/tmp/x").with_size(100 * MB);
        let plan = planner.plan(&r);
        assert!(plan.single_stream);
        assert!(!plan.resumable);
        assert_eq!(plan.segments.len(), 1);
        assert_eq!(plan.segments[0].range, ByteRange::bounded(0, 100 * MB));
    }

    #[test]
    fn unknown_size_is_single_unbounded() {
        let planner = SegmentPlanner::new(8, MB);
        let r = Resource::new("http://example.com/x", "/tmp/x").with_range_support(true);
        let plan = planner.plan(&r);
        assert!(plan.single_stream);
        assert!(plan.resumable);
        assert_eq!(plan.segments[0].range, ByteRange::unbounded(0));
    }

    #[test]
    fn segment_floor_caps_count() {
        let planner = SegmentPlanner::new(8, MB);
        assert_eq!(planner.segment_count(3 * MB + 5), 3);
        assert_eq!(planner.segment_count(100), 1);
        assert_eq!(planner.segment_count(100 * MB), 8);
        let plan = planner.plan(&ranged(MB / 2));
        assert_eq!(plan.segments.len(), 1);
        assert!(!plan.single_stream);
    }

    #[test]
    fn plans_cover_whole_file() {
        let planner = SegmentPlanner::new(7, 1000);
        for total in [1u64, 999, 1000, 7001, 123_456] {
            let plan = planner.plan(&ranged(total));
            let mut next = 0;
            for r in plan.ranges() {
                assert_eq!(r.start, next);
                next = r.end.unwrap();
            }
            assert_eq!(next, total);
        }
    }

    #[test]
    fn resume_seeds_offsets_and_skips_completed() {
        let planner = SegmentPlanner::new(4, 1);
        let resource = ranged(1000);
        let mut plan = planner.plan(&resource);
        plan.segments[0].set_received(250);
        plan.segments[1].set_received(100);
        let record = ResumeRecord::from_plan(&resource.urls[0], &resource.dest_path, &plan);

        // A different planner config must not change recorded boundaries.
        let other = SegmentPlanner::new(2, 1);
        let resumed = other.plan_with_resume(&resource, Some(&record));
        assert_eq!(resumed.segments.len(), 4);
        assert_eq!(resumed.segments[0].status, SegmentStatus::Completed);
        assert_eq!(resumed.segments[1].received, 100);
        assert_eq!(resumed.segments[1].next_offset(), 350);
        assert_eq!(resumed.completed_bytes(), 350);
        assert_eq!(resumed.pending().count(), 3);
    }

    #[test]
    fn resume_with_changed_size_starts_over() {
        let planner = SegmentPlanner::new(4, 1);
        let mut plan = planner.plan(&ranged(1000));
        plan.segments[0].set_received(250);
        let record = ResumeRecord::from_plan("http://example.com/v.mp4", std::path::Path::new("/tmp/v.mp4"), &plan);
        let resumed = planner.plan_with_resume(&ranged(2000), Some(&record));
        assert_eq!(resumed.completed_bytes(), 0);
        assert_eq!(resumed.total_size, Some(2000));
    }

    #[test]
    fn non_resumable_single_stream_restarts_from_zero() {
        let r = Resource::new("http://example.com/x", "/tmp/x").with_size(500);
        let mut plan = SegmentPlanner::single_stream(Some(500), false);
        plan.segments[0].set_received(200);
        let record = ResumeRecord::from_plan("http://example.com/x", std::path::Path::new("/tmp/x"), &plan);
        let resumed = SegmentPlanner::new(4, 1).plan_with_resume(&r, Some(&record));
        assert!(resumed.single_stream);
        assert_eq!(resumed.completed_bytes(), 0);
    }
}
