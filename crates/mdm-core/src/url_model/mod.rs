//! Destination file names for direct downloads.
//!
//! A name comes from `Content-Disposition` when the server sends one, else
//! from the last URL path segment, and is always sanitized.

mod disposition;

use std::path::{Path, PathBuf};

use crate::human::sanitize_file_name;
use crate::storage::temp_path;

pub use disposition::disposition_file_name;

/// Used when neither the headers nor the URL yield a usable name.
const FALLBACK_NAME: &str = "download.bin";

/// Last non-empty path segment of `url`, percent-decoded.
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let name = disposition::percent_decode(segment);
    (name != "." && name != "..").then_some(name)
}

pub fn derive_file_name(url: &str, content_disposition: Option<&str>) -> String {
    let raw = content_disposition
        .and_then(disposition_file_name)
        .or_else(|| url_file_name(url))
        .unwrap_or_default();
    let clean = sanitize_file_name(&raw);
    let clean = clean.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if clean.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        clean.to_string()
    }
}

/// `dir/name`, or `dir/stem (n).ext` if that file (or its `.part`) already exists.
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    unique_destination_with(dir, name, |_| false)
}

/// Like `unique_destination`, also skipping paths for which `reserved` is true
/// (e.g. names already handed out in the same batch).
pub fn unique_destination_with(
    dir: &Path,
    name: &str,
    reserved: impl Fn(&Path) -> bool,
) -> PathBuf {
    let free = |p: &Path| !p.exists() && !temp_path(p).exists() && !reserved(p);
    let first = dir.join(name);
    if free(&first) {
        return first;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s, format!(".{}", e)),
        _ => (name, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|p| free(p))
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_from_url() {
        assert_eq!(
            derive_file_name("https://cdn.example.com/v/clip%20one.mp4?sig=abc", None),
            "clip one.mp4"
        );
        assert_eq!(derive_file_name("https://example.com/", None), "download.bin");
        assert_eq!(derive_file_name("https://example.com/..", None), "download.bin");
    }

    #[test]
    fn disposition_overrides_url() {
        assert_eq!(
            derive_file_name(
                "https://example.com/get?id=1",
                Some("attachment; filename=\"a:b.mkv\"")
            ),
            "a_b.mkv"
        );
    }

    #[test]
    fn unique_destination_skips_existing_and_partial() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "v.mp4"), dir.path().join("v.mp4"));
        std::fs::write(dir.path().join("v.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("v (1).mp4.part"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "v.mp4"),
            dir.path().join("v (2).mp4")
        );
    }

    #[test]
    fn reserved_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("song.mp3");
        let p = unique_destination_with(dir.path(), "song.mp3", |p| p == taken);
        assert_eq!(p, dir.path().join("song (1).mp3"));
    }
}
