//! Response header helpers shared by the segment worker and the probe.

/// Collects header lines of the final response; a new status line (after a
/// redirect or `100 Continue`) starts over.
#[derive(Debug, Default)]
pub(crate) struct ResponseHeaders {
    lines: Vec<String>,
}

impl ResponseHeaders {
    pub(crate) fn push(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw).trim_end().to_string();
        if line.starts_with("HTTP/") {
            self.lines.clear();
        }
        if !line.is_empty() {
            self.lines.push(line);
        }
    }

    pub(crate) fn status(&self) -> Option<u32> {
        parse_http_status(&self.lines)
    }

    pub(crate) fn content_range(&self) -> Option<String> {
        self.get("content-range").map(str::to_string)
    }

    /// First value of header `name` (case-insensitive).
    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        header_value(&self.lines, name)
    }
}

/// Status code from the first `HTTP/x y reason` line.
pub(crate) fn parse_http_status(lines: &[String]) -> Option<u32> {
    let first = lines.first()?;
    if !first.starts_with("HTTP/") {
        return None;
    }
    first.split_whitespace().nth(1)?.parse().ok()
}

pub(crate) fn header_value<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines.iter().find_map(|l| {
        let (n, v) = l.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// Parse `bytes start-end/total` into `(start, end_inclusive, total)`; total is None for `*`.
pub(crate) fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?, total))
}
