//! Human-facing formatting: sizes, durations, speed limits, HTTP reason phrases.

/// Formats a byte count with 1024-based units: `512 bytes`, `3 KB`, `1.5 MB`, `2.25 GB`.
/// Zero renders as `---` (unknown / nothing yet).
pub fn format_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1_048_576.0;
    const GB: f64 = 1_073_741_824.0;

    let s = size as f64;
    if size == 0 {
        "---".to_string()
    } else if s < KB {
        format!("{} bytes", size)
    } else if s < MB {
        format!("{:.0} KB", s / KB)
    } else if s < GB {
        format!("{:.1} MB", s / MB)
    } else {
        format!("{:.2} GB", s / GB)
    }
}

/// Formats a duration in seconds: `42 seconds`, `5 minutes`, `1.5 hours`, `2.0 days`.
pub fn format_duration(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "---".to_string();
    }
    if secs <= 60.0 {
        format!("{:.0} seconds", secs)
    } else if secs <= 3600.0 {
        format!("{:.0} minutes", secs / 60.0)
    } else if secs <= 86_400.0 {
        format!("{:.1} hours", secs / 3600.0)
    } else {
        format!("{:.1} days", secs / 86_400.0)
    }
}

/// Parses a speed limit: plain bytes (`65536`), or with a K/M/G suffix (`500K`, `2M`, `1.5G`),
/// 1024-based. `off`, `none`, `unlimited` and `0` mean no limit.
pub fn parse_rate(s: &str) -> Result<Option<u64>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty rate".to_string());
    }
    let lower = s.to_ascii_lowercase();
    if matches!(lower.as_str(), "off" | "none" | "unlimited" | "0") {
        return Ok(None);
    }
    let trimmed = lower.trim_end_matches("/s").trim_end_matches('b');
    let (num, mult) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024.0),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1_048_576.0),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1_073_741_824.0),
        _ => (trimmed, 1.0),
    };
    let value: f64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid rate: {}", s))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid rate: {}", s));
    }
    let bytes = (value * mult).round() as u64;
    Ok(if bytes == 0 { None } else { Some(bytes) })
}

/// Short reason phrase for an HTTP status code, for error details.
pub fn http_reason(code: u32) -> &'static str {
    match code {
        200 => "ok",
        206 => "partial content",
        301 => "moved permanently",
        302 => "found",
        304 => "not modified",
        307 => "temporary redirect",
        308 => "permanent redirect",
        400 => "bad request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not found",
        405 => "method not allowed",
        408 => "request timeout",
        410 => "gone",
        412 => "precondition failed",
        416 => "range not satisfiable",
        429 => "too many requests",
        451 => "unavailable for legal reasons",
        500 => "internal server error",
        501 => "not implemented",
        502 => "bad gateway",
        503 => "service unavailable",
        504 => "gateway timeout",
        507 => "insufficient storage",
        509 => "bandwidth limit exceeded",
        _ => "unexpected status",
    }
}

/// Replaces characters that are unsafe in file names on common desktop filesystems
/// (`\ / : ? < > " | *`) with `_` and caps the name at 100 characters.
pub fn sanitize_file_name(name: &str) -> String {
    const MAX_CHARS: usize = 100;
    name.chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '\\' | '/' | ':' | '?' | '<' | '>' | '"' | '|' | '*' => '_',
            c => c,
        })
        .take(MAX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(format_size(0), "---");
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(3 * 1024), "3 KB");
        assert_eq!(format_size(1_572_864), "1.5 MB");
        assert_eq!(format_size(2_415_919_104), "2.25 GB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(42.0), "42 seconds");
        assert_eq!(format_duration(300.0), "5 minutes");
        assert_eq!(format_duration(5400.0), "1.5 hours");
        assert_eq!(format_duration(172_800.0), "2.0 days");
        assert_eq!(format_duration(f64::INFINITY), "---");
    }

    #[test]
    fn rates() {
        assert_eq!(parse_rate("65536"), Ok(Some(65536)));
        assert_eq!(parse_rate("500K"), Ok(Some(512_000)));
        assert_eq!(parse_rate("2M"), Ok(Some(2_097_152)));
        assert_eq!(parse_rate("1.5g"), Ok(Some(1_610_612_736)));
        assert_eq!(parse_rate("2MB/s"), Ok(Some(2_097_152)));
        assert_eq!(parse_rate("off"), Ok(None));
        assert_eq!(parse_rate("0"), Ok(None));
        assert!(parse_rate("fast").is_err());
        assert!(parse_rate("-1K").is_err());
    }

    #[test]
    fn reasons() {
        assert_eq!(http_reason(416), "range not satisfiable");
        assert_eq!(http_reason(503), "service unavailable");
        assert_eq!(http_reason(999), "unexpected status");
    }

    #[test]
    fn file_names() {
        assert_eq!(sanitize_file_name("a/b:c?.mp4"), "a_b_c_.mp4");
        assert_eq!(sanitize_file_name(&"x".repeat(300)).len(), 100);
    }
}
