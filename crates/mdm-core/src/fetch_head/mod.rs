//! Metadata probe for direct URLs.
//!
//! Sends a GET and aborts at the first body byte, so servers that refuse HEAD
//! still answer. Records the final status, the effective URL, and the headers
//! needed to build a `Resource`.

use anyhow::{bail, Context, Result};
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::headers::ResponseHeaders;
use crate::human::http_reason;
use crate::resource::Resource;
use crate::url_model::derive_file_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub status: u32,
    /// URL after redirects.
    pub effective_url: String,
    pub content_length: Option<u64>,
    /// Server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

impl Probe {
    fn from_headers(status: u32, effective_url: String, headers: &ResponseHeaders) -> Self {
        Self {
            status,
            effective_url,
            content_length: headers
                .get("content-length")
                .and_then(|v| v.parse().ok()),
            accept_ranges: headers
                .get("accept-ranges")
                .map_or(false, |v| v.eq_ignore_ascii_case("bytes")),
            content_type: headers.get("content-type").map(str::to_string),
            content_disposition: headers.get("content-disposition").map(str::to_string),
        }
    }

    /// Suggested local file name.
    pub fn file_name(&self) -> String {
        derive_file_name(&self.effective_url, self.content_disposition.as_deref())
    }

    /// Server answered with a web page rather than a file.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(false, |t| t.to_ascii_lowercase().contains("html"))
    }

    /// Resource for `url` (the URL as given, not the redirect target) saved at `dest`.
    pub fn resource(&self, url: &str, dest: impl Into<PathBuf>) -> Resource {
        let mut r = Resource::new(url, dest).with_range_support(self.accept_ranges);
        r.total_size = self.content_length;
        r
    }
}

/// Probe `url`. Blocking; call from `spawn_blocking` in async code.
pub fn probe(url: &str, connect_timeout: Duration) -> Result<Probe> {
    let headers = RefCell::new(ResponseHeaders::default());
    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.useragent(concat!("mdm/", env!("CARGO_PKG_VERSION")))?;
    easy.connect_timeout(connect_timeout)?;
    easy.timeout(connect_timeout * 2)?;
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|line| {
            headers.borrow_mut().push(line);
            true
        })?;
        // Headers are all we want.
        transfer.write_function(|_| Ok(0))?;
        if let Err(e) = transfer.perform() {
            if !e.is_write_error() {
                return Err(e).with_context(|| format!("probe {} failed", url));
            }
        }
    }

    let status = easy.response_code().context("no response code")?;
    let effective_url = easy
        .effective_url()
        .ok()
        .flatten()
        .unwrap_or(url)
        .to_string();
    if !(200..300).contains(&status) {
        bail!("{} returned HTTP {} ({})", url, status, http_reason(status));
    }
    let probe = Probe::from_headers(status, effective_url, &headers.borrow());
    tracing::debug!(
        url,
        status,
        size = ?probe.content_length,
        ranges = probe.accept_ranges,
        "probed"
    );
    Ok(probe)
}
