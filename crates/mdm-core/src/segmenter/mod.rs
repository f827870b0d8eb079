//! Range math and segment planning.
//!
//! Splits a resource into contiguous byte ranges, tracks per-segment progress,
//! and rebuilds a plan from a persisted resume record.

mod plan;
mod range;
mod segment;

pub use plan::{SegmentPlan, SegmentPlanner};
pub use range::{plan_segments, ByteRange};
pub use segment::{Segment, SegmentStatus};
