//! `Content-Disposition` file names.

/// File name from a `Content-Disposition` value. `filename*` (RFC 5987,
/// UTF-8 only) wins over `filename`.
pub fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').skip(1) {
        let Some((name, v)) = param.split_once('=') else {
            continue;
        };
        let v = v.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let lower = v.to_ascii_lowercase();
                if lower.starts_with("utf-8''") {
                    let decoded = percent_decode(&v["utf-8''".len()..]);
                    if !decoded.is_empty() {
                        return Some(decoded);
                    }
                }
            }
            "filename" => {
                let unquoted = match v.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                    Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
                    None => v.to_string(),
                };
                if !unquoted.is_empty() {
                    plain = Some(unquoted);
                }
            }
            _ => {}
        }
    }
    plain
}

/// Decode `%XX` escapes; malformed escapes are kept as-is.
pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_and_token_forms() {
        assert_eq!(
            disposition_file_name("attachment; filename=\"report.pdf\"").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            disposition_file_name("attachment; filename=clip.mp4").as_deref(),
            Some("clip.mp4")
        );
        assert_eq!(disposition_file_name("inline"), None);
    }

    #[test]
    fn extended_form_wins() {
        let v = "attachment; filename=\"fallback.bin\"; filename*=UTF-8''caf%C3%A9%20clip.mp4";
        assert_eq!(disposition_file_name(v).as_deref(), Some("café clip.mp4"));
    }

    #[test]
    fn malformed_escapes_survive() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
        assert_eq!(percent_decode("a%41"), "aA");
    }
}
