//! Minimal HTTP/1.1 server with Range GET support for integration tests.
//!
//! Serves a single static body. Can ignore ranges, fail requests starting at
//! given offsets, throttle the body, and counts the body bytes it sent.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// Answer ranged GETs with 200 and the whole body.
    pub ignore_ranges: bool,
    /// Requests whose range starts at one of these offsets get a 503.
    pub fail_offsets: Vec<u64>,
    /// Sleep this long after every 4 KiB of body.
    pub throttle: Option<Duration>,
}

const CHUNK: usize = 4096;

#[derive(Default)]
struct Stats {
    served: AtomicU64,
    requests: AtomicUsize,
    ranges: Mutex<Vec<(u64, Option<u64>)>>,
}

/// Handle to a running server. The server lives until the process exits.
#[derive(Clone)]
pub struct RangeServer {
    pub url: String,
    stats: Arc<Stats>,
}

impl RangeServer {
    /// Body bytes written to clients so far.
    pub fn served(&self) -> u64 {
        self.stats.served.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    /// `(start, end_inclusive)` of every ranged request seen.
    pub fn ranges(&self) -> Vec<(u64, Option<u64>)> {
        self.stats.ranges.lock().unwrap().clone()
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let stats = Arc::new(Stats::default());
    {
        let stats = Arc::clone(&stats);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let body = Arc::clone(&body);
                let opts = Arc::clone(&opts);
                let stats = Arc::clone(&stats);
                thread::spawn(move || handle(stream, &body, &opts, &stats));
            }
        });
    }
    RangeServer {
        url: format!("http://127.0.0.1:{}/media.bin", port),
        stats,
    }
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &RangeServerOptions, stats: &Stats) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    stats.requests.fetch_add(1, Ordering::SeqCst);
    if let Some((start, end)) = range {
        stats.ranges.lock().unwrap().push((start, end));
        if opts.fail_offsets.contains(&start) {
            let _ = stream.write_all(
                b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
    }

    let total = body.len() as u64;
    let (head, slice) = match range.filter(|_| !opts.ignore_ranges) {
        Some((start, end)) => {
            let end_incl = end.unwrap_or(u64::MAX).min(total.saturating_sub(1));
            if start > end_incl || start >= total {
                let head = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n",
                    total
                );
                (head, &body[0..0])
            } else {
                let slice = &body[start as usize..=end_incl as usize];
                let head = format!(
                    "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\n",
                    start,
                    end_incl,
                    total,
                    slice.len()
                );
                (head, slice)
            }
        }
        None => {
            let ranges = if opts.ignore_ranges { "" } else { "Accept-Ranges: bytes\r\n" };
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}",
                total, ranges
            );
            (head, body)
        }
    };
    let head = format!("{}Content-Type: application/octet-stream\r\nConnection: close\r\n\r\n", head);
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    for chunk in slice.chunks(CHUNK) {
        if stream.write_all(chunk).is_err() {
            return;
        }
        stats.served.fetch_add(chunk.len() as u64, Ordering::SeqCst);
        if let Some(d) = opts.throttle {
            thread::sleep(d);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y` or `bytes=X-`).
fn parse_request(request: &str) -> (&str, Option<(u64, Option<u64>)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let value = value.trim().to_ascii_lowercase();
        if let Some((a, b)) = value.strip_prefix("bytes=").and_then(|r| r.split_once('-')) {
            let start = a.trim().parse::<u64>().unwrap_or(0);
            let end = b.trim().parse::<u64>().ok();
            range = Some((start, end));
        }
    }
    (method, range)
}
