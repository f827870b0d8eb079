//! One segment attempt: HTTP GET (ranged when needed) streamed into storage at the segment offset.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::MdmConfig;
use crate::control::StopToken;
use crate::ratelimit::Throttle;
use crate::retry::SegmentError;
use crate::segmenter::ByteRange;
use crate::storage::StorageWriter;

use super::headers::{parse_content_range, ResponseHeaders};

/// libcurl knobs shared by every segment of a job.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub connect_timeout: Duration,
    /// No bytes for this long counts as a failure.
    pub stall_timeout: Duration,
    /// Hard cap on a single request.
    pub request_timeout: Duration,
    pub buffer_size: usize,
}

impl TransferOptions {
    pub fn from_config(cfg: &MdmConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            stall_timeout: Duration::from_secs(cfg.stall_timeout_secs),
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            buffer_size: cfg.buffer_size,
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from_config(&MdmConfig::default())
    }
}

/// What one worker fetches. `received` is the shared per-segment counter the
/// job checkpoints; it only advances after the bytes were written.
pub struct SegmentTask<'a> {
    pub url: &'a str,
    pub range: ByteRange,
    pub single_stream: bool,
    /// The stream may continue from a non-zero offset.
    pub resumable: bool,
    pub received: &'a AtomicU64,
}

/// Validate the status line (and Content-Range for ranged requests) before any byte is written.
fn check_response(
    headers: &ResponseHeaders,
    ranged: bool,
    want_start: u64,
) -> Result<(), SegmentError> {
    let status = headers.status().unwrap_or(0);
    if ranged && (status == 200 || status == 206) {
        let content_range = headers.content_range();
        let start = content_range
            .as_deref()
            .and_then(parse_content_range)
            .map(|(s, _, _)| s);
        if status == 206 && start == Some(want_start) {
            return Ok(());
        }
        return Err(SegmentError::RangeIgnored {
            status,
            content_range,
        });
    }
    if !(200..300).contains(&status) {
        return Err(SegmentError::Http(status));
    }
    Ok(())
}

/// Runs one attempt for `task`. Writes go to `storage` at `range.start + received`;
/// the counter advances after each successful write, so a stop at any point leaves
/// the counter equal to what is on disk.
pub fn fetch_segment(
    task: &SegmentTask<'_>,
    storage: &StorageWriter,
    throttle: &Throttle,
    stop: &StopToken,
    opts: &TransferOptions,
) -> Result<(), SegmentError> {
    let mut skip = task.received.load(Ordering::Acquire);
    if task.single_stream && !task.resumable && skip > 0 {
        // Cannot ask for an offset; refetch from zero.
        task.received.store(0, Ordering::Release);
        skip = 0;
    }
    let expected = task.range.len().map(|l| l.saturating_sub(skip));
    if expected == Some(0) {
        return Ok(());
    }
    let ranged = !task.single_stream || skip > 0;
    let want_start = task.range.start + skip;

    let mut easy = curl::easy::Easy::new();
    easy.url(task.url).map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.useragent(concat!("mdm/", env!("CARGO_PKG_VERSION")))
        .map_err(SegmentError::Curl)?;
    easy.connect_timeout(opts.connect_timeout)
        .map_err(SegmentError::Curl)?;
    // Stall detection: below 1 byte/s for the whole stall window.
    easy.low_speed_limit(1).map_err(SegmentError::Curl)?;
    easy.low_speed_time(opts.stall_timeout)
        .map_err(SegmentError::Curl)?;
    easy.timeout(opts.request_timeout)
        .map_err(SegmentError::Curl)?;
    easy.buffer_size(opts.buffer_size)
        .map_err(SegmentError::Curl)?;
    easy.progress(true).map_err(SegmentError::Curl)?;
    if ranged {
        easy.range(&task.range.curl_range(skip))
            .map_err(SegmentError::Curl)?;
    }

    let headers = RefCell::new(ResponseHeaders::default());
    let failure: RefCell<Option<SegmentError>> = RefCell::new(None);
    let checked = Cell::new(false);
    let written = Cell::new(0u64);
    let filled = Cell::new(false);

    let result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|line| {
                headers.borrow_mut().push(line);
                true
            })
            .map_err(SegmentError::Curl)?;
        transfer
            .write_function(|data| {
                if !checked.get() {
                    checked.set(true);
                    if let Err(e) = check_response(&headers.borrow(), ranged, want_start) {
                        *failure.borrow_mut() = Some(e);
                        return Ok(0);
                    }
                }
                if let Some(reason) = stop.reason() {
                    *failure.borrow_mut() = Some(SegmentError::Stopped(reason));
                    return Ok(0);
                }
                let take = match expected {
                    Some(exp) => (exp - written.get()).min(data.len() as u64) as usize,
                    None => data.len(),
                };
                if let Err(reason) = throttle.acquire(take as u64, stop) {
                    *failure.borrow_mut() = Some(SegmentError::Stopped(reason));
                    return Ok(0);
                }
                if let Err(e) = storage.write_at(want_start + written.get(), &data[..take]) {
                    *failure.borrow_mut() = Some(SegmentError::Storage(e));
                    return Ok(0);
                }
                written.set(written.get() + take as u64);
                task.received.fetch_add(take as u64, Ordering::Release);
                if expected == Some(written.get()) && take < data.len() {
                    // Server sent past the range end; we have everything we asked for.
                    filled.set(true);
                    return Ok(0);
                }
                Ok(data.len())
            })
            .map_err(SegmentError::Curl)?;
        transfer
            .progress_function(|_, _, _, _| !stop.is_stopped())
            .map_err(SegmentError::Curl)?;
        transfer.perform()
    };

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }
    if let Err(e) = result {
        if let Some(reason) = stop.reason() {
            return Err(SegmentError::Stopped(reason));
        }
        if !(e.is_write_error() && filled.get()) {
            return Err(SegmentError::Curl(e));
        }
    }
    if !checked.get() {
        // Empty body: the write callback never ran.
        check_response(&headers.borrow(), ranged, want_start)?;
    }

    let got = written.get();
    match expected {
        Some(exp) if got < exp => Err(SegmentError::PartialTransfer {
            expected: exp,
            received: got,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(lines: &[&str]) -> ResponseHeaders {
        let mut h = ResponseHeaders::default();
        for l in lines {
            h.push(l.as_bytes());
        }
        h
    }

    #[test]
    fn ranged_request_requires_matching_206() {
        let ok = headers(&["HTTP/1.1 206 Partial Content", "Content-Range: bytes 100-199/1000"]);
        assert!(check_response(&ok, true, 100).is_ok());

        let shifted = headers(&["HTTP/1.1 206 Partial Content", "Content-Range: bytes 0-199/1000"]);
        assert!(matches!(
            check_response(&shifted, true, 100),
            Err(SegmentError::RangeIgnored { status: 206, .. })
        ));

        let full = headers(&["HTTP/1.1 200 OK", "Content-Length: 1000"]);
        assert!(matches!(
            check_response(&full, true, 100),
            Err(SegmentError::RangeIgnored { status: 200, .. })
        ));
    }

    #[test]
    fn unranged_accepts_any_2xx() {
        let full = headers(&["HTTP/1.1 200 OK"]);
        assert!(check_response(&full, false, 0).is_ok());
        let missing = headers(&["HTTP/1.1 404 Not Found"]);
        assert!(matches!(
            check_response(&missing, false, 0),
            Err(SegmentError::Http(404))
        ));
        let unsatisfiable = headers(&["HTTP/1.1 416 Range Not Satisfiable"]);
        assert!(matches!(
            check_response(&unsatisfiable, true, 5),
            Err(SegmentError::Http(416))
        ));
    }

    #[test]
    fn filled_segment_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let storage = crate::storage::StorageWriterBuilder::create(&dir.path().join("x.part"))
            .unwrap()
            .build();
        let received = AtomicU64::new(10);
        let task = SegmentTask {
            url: "http://127.0.0.1:9/never",
            range: ByteRange::bounded(0, 10),
            single_stream: false,
            resumable: true,
            received: &received,
        };
        let r = fetch_segment(
            &task,
            &storage,
            &Throttle::unlimited(),
            &StopToken::new(),
            &TransferOptions::default(),
        );
        assert!(r.is_ok());
    }
}
