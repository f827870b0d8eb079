//! Versioned resume record: the durable form of one stream's segment plan.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::segmenter::{ByteRange, SegmentPlan};

/// Current record layout. Readers accept any version up to this one.
pub const RECORD_VERSION: u32 = 1;

/// Stable key for a stream: SHA-256 hex of URL and destination path.
pub fn resume_key(url: &str, dest_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(dest_path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub start: u64,
    #[serde(default)]
    pub end: Option<u64>,
    pub received: u64,
}

impl SegmentRecord {
    pub fn range(&self) -> ByteRange {
        ByteRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// Unknown fields are ignored on read; missing required fields fail the parse
/// and the record is discarded by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub version: u32,
    pub url: String,
    pub dest_path: PathBuf,
    #[serde(default)]
    pub total_size: Option<u64>,
    pub single_stream: bool,
    #[serde(default)]
    pub resumable: bool,
    pub segments: Vec<SegmentRecord>,
    /// Stream fully downloaded and renamed into place.
    #[serde(default)]
    pub finished: bool,
}

impl ResumeRecord {
    pub fn from_plan(url: &str, dest_path: &Path, plan: &SegmentPlan) -> Self {
        Self {
            version: RECORD_VERSION,
            url: url.to_string(),
            dest_path: dest_path.to_path_buf(),
            total_size: plan.total_size,
            single_stream: plan.single_stream,
            resumable: plan.resumable,
            segments: plan
                .segments
                .iter()
                .map(|s| SegmentRecord {
                    start: s.range.start,
                    end: s.range.end,
                    received: s.received,
                })
                .collect(),
            finished: false,
        }
    }

    pub fn key(&self) -> String {
        resume_key(&self.url, &self.dest_path)
    }

    /// Copy per-segment received counts (by index) into the record.
    pub fn set_received(&mut self, received: &[u64]) {
        for (rec, n) in self.segments.iter_mut().zip(received) {
            rec.received = *n;
        }
    }

    pub fn received_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.received).sum()
    }

    /// Structural checks. A record failing these is never used for resume.
    pub fn validate(&self) -> Result<(), String> {
        if self.version == 0 || self.version > RECORD_VERSION {
            return Err(format!("unsupported record version {}", self.version));
        }
        if self.segments.is_empty() {
            return Err("no segments".to_string());
        }
        if self.single_stream && self.segments.len() != 1 {
            return Err("single-stream record with several segments".to_string());
        }
        let mut next = 0u64;
        let last = self.segments.len() - 1;
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.start != next {
                return Err(format!("segment {} starts at {}, expected {}", i, seg.start, next));
            }
            match seg.end {
                Some(end) => {
                    if end < seg.start {
                        return Err(format!("segment {} ends before it starts", i));
                    }
                    if seg.received > end - seg.start {
                        return Err(format!("segment {} received more than its length", i));
                    }
                    next = end;
                }
                None if i == last => {}
                None => return Err(format!("unbounded segment {} is not last", i)),
            }
        }
        match (self.total_size, self.segments[last].end) {
            (Some(total), Some(end)) if end != total => {
                Err(format!("segments cover {} of {} bytes", end, total))
            }
            (Some(_), None) => Err("unbounded segment with known size".to_string()),
            (None, Some(_)) => Err("bounded segments with unknown size".to_string()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::SegmentPlanner;

    fn record(total: u64, n: usize) -> ResumeRecord {
        let planner = SegmentPlanner::new(n, 1);
        let plan = planner.plan(
            &crate::resource::Resource::new("http://h/f", "/tmp/f")
                .with_size(total)
                .with_range_support(true),
        );
        ResumeRecord::from_plan("http://h/f", Path::new("/tmp/f"), &plan)
    }

    #[test]
    fn key_is_stable_and_distinct() {
        let a = resume_key("http://h/f", Path::new("/tmp/a"));
        assert_eq!(a, resume_key("http://h/f", Path::new("/tmp/a")));
        assert_ne!(a, resume_key("http://h/f", Path::new("/tmp/b")));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn planned_record_validates() {
        assert!(record(1000, 4).validate().is_ok());
    }

    #[test]
    fn gaps_and_overruns_are_rejected() {
        let mut r = record(1000, 4);
        r.segments[2].start += 1;
        assert!(r.validate().is_err());

        let mut r = record(1000, 4);
        r.segments[0].received = 251;
        assert!(r.validate().is_err());

        let mut r = record(1000, 4);
        r.total_size = Some(2000);
        assert!(r.validate().is_err());

        let mut r = record(1000, 4);
        r.segments.clear();
        assert!(r.validate().is_err());

        let mut r = record(1000, 4);
        r.version = RECORD_VERSION + 1;
        assert!(r.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_ignored_and_missing_required_fail() {
        let json = r#"{"version":1,"url":"http://h/f","dest_path":"/tmp/f","total_size":10,
            "single_stream":true,"segments":[{"start":0,"end":10,"received":4}],"etag":"x"}"#;
        let r: ResumeRecord = serde_json::from_str(json).unwrap();
        assert!(r.validate().is_ok());
        assert!(!r.finished);
        assert_eq!(r.received_bytes(), 4);

        let missing = r#"{"version":1,"url":"http://h/f","dest_path":"/tmp/f"}"#;
        assert!(serde_json::from_str::<ResumeRecord>(missing).is_err());
    }

    #[test]
    fn set_received_matches_by_index() {
        let mut r = record(1000, 4);
        r.set_received(&[250, 10]);
        assert_eq!(r.segments[0].received, 250);
        assert_eq!(r.segments[1].received, 10);
        assert_eq!(r.segments[3].received, 0);
        assert_eq!(r.received_bytes(), 260);
    }
}
