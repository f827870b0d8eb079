//! Resource descriptors handed over by a resolver, or built by the CLI from a URL probe.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Immutable description of what to fetch and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Equivalent mirrors; attempts rotate through them.
    pub urls: Vec<String>,
    /// Declared size in bytes, if the server told us.
    #[serde(default)]
    pub total_size: Option<u64>,
    /// Server honours `Range: bytes=` requests.
    #[serde(default)]
    pub supports_range: bool,
    /// Final location on disk. With a companion this is the merged output.
    pub dest_path: PathBuf,
    /// Second stream (typically audio) muxed with this one once both are complete.
    #[serde(default)]
    pub companion: Option<Box<Resource>>,
}

impl Resource {
    pub fn new(url: impl Into<String>, dest_path: impl Into<PathBuf>) -> Self {
        Self {
            urls: vec![url.into()],
            total_size: None,
            supports_range: false,
            dest_path: dest_path.into(),
            companion: None,
        }
    }

    pub fn with_size(mut self, total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self
    }

    pub fn with_range_support(mut self, supports_range: bool) -> Self {
        self.supports_range = supports_range;
        self
    }

    pub fn with_mirror(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn with_companion(mut self, companion: Resource) -> Self {
        self.companion = Some(Box::new(companion));
        self
    }

    /// First URL; used for logging and resume keys.
    pub fn primary_url(&self) -> &str {
        self.urls.first().map(String::as_str).unwrap_or("")
    }

    /// Mirror to use for the given 1-based attempt number.
    pub fn url_for_attempt(&self, attempt: u32) -> &str {
        if self.urls.is_empty() {
            return "";
        }
        let idx = (attempt.saturating_sub(1) as usize) % self.urls.len();
        &self.urls[idx]
    }

    /// Sum of declared sizes of this stream and its companion; None if any is unknown.
    pub fn combined_size(&self) -> Option<u64> {
        let own = self.total_size?;
        match &self.companion {
            Some(c) => Some(own + c.total_size?),
            None => Some(own),
        }
    }

    /// Where this stream is downloaded before any merge.
    pub fn stream_path(&self) -> PathBuf {
        if self.companion.is_some() {
            video_stream_path(&self.dest_path)
        } else {
            self.dest_path.clone()
        }
    }

    /// Structural checks performed on submission.
    pub fn validate(&self) -> Result<(), String> {
        if self.urls.is_empty() || self.urls.iter().any(|u| u.trim().is_empty()) {
            return Err("resource has no usable URL".to_string());
        }
        if self.dest_path.as_os_str().is_empty() {
            return Err("resource has an empty destination path".to_string());
        }
        if let Some(c) = &self.companion {
            if c.companion.is_some() {
                return Err("companion streams cannot have companions".to_string());
            }
            c.validate()?;
            if c.dest_path == self.dest_path || c.dest_path == self.stream_path() {
                return Err("companion must be written to its own file".to_string());
            }
        }
        Ok(())
    }
}

/// `<dest>.video.tmp`: holding file for the primary stream of a job that will be merged.
pub fn video_stream_path(dest: &Path) -> PathBuf {
    let mut o = dest.as_os_str().to_owned();
    o.push(".video.tmp");
    PathBuf::from(o)
}

/// `<dest>.audio.tmp`: default holding file for a companion audio stream.
pub fn audio_stream_path(dest: &Path) -> PathBuf {
    let mut o = dest.as_os_str().to_owned();
    o.push(".audio.tmp");
    PathBuf::from(o)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_rotate_by_attempt() {
        let r = Resource::new("http://a/x", "/tmp/x").with_mirror("http://b/x");
        assert_eq!(r.url_for_attempt(1), "http://a/x");
        assert_eq!(r.url_for_attempt(2), "http://b/x");
        assert_eq!(r.url_for_attempt(3), "http://a/x");
        assert_eq!(r.primary_url(), "http://a/x");
    }

    #[test]
    fn stream_path_with_companion() {
        let audio = Resource::new("http://a/audio", "/tmp/clip.audio.tmp");
        let r = Resource::new("http://a/video", "/tmp/clip.mp4").with_companion(audio);
        assert_eq!(r.stream_path(), PathBuf::from("/tmp/clip.mp4.video.tmp"));
        assert!(r.validate().is_ok());

        let plain = Resource::new("http://a/video", "/tmp/clip.mp4");
        assert_eq!(plain.stream_path(), PathBuf::from("/tmp/clip.mp4"));
        assert_eq!(
            audio_stream_path(Path::new("/tmp/clip.mp4")),
            PathBuf::from("/tmp/clip.mp4.audio.tmp")
        );
    }

    #[test]
    fn combined_size_requires_both() {
        let audio = Resource::new("http://a/audio", "/tmp/a").with_size(10);
        let r = Resource::new("http://a/video", "/tmp/v")
            .with_size(90)
            .with_companion(audio.clone());
        assert_eq!(r.combined_size(), Some(100));
        let unknown = Resource::new("http://a/video", "/tmp/v").with_companion(audio);
        assert_eq!(unknown.combined_size(), None);
    }

    #[test]
    fn validate_rejects_bad_descriptors() {
        let mut r = Resource::new("", "/tmp/x");
        assert!(r.validate().is_err());
        r.urls = vec!["http://a/x".into()];
        r.dest_path = PathBuf::new();
        assert!(r.validate().is_err());

        let clash = Resource::new("http://a/v", "/tmp/v")
            .with_companion(Resource::new("http://a/a", "/tmp/v"));
        assert!(clash.validate().is_err());
    }

    #[test]
    fn json_tolerates_missing_optional_fields() {
        let r: Resource =
            serde_json::from_str(r#"{"urls":["http://a/x"],"dest_path":"/tmp/x","extra":1}"#)
                .unwrap();
        assert_eq!(r.total_size, None);
        assert!(!r.supports_range);
        assert!(r.companion.is_none());
    }
}
