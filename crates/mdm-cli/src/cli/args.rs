//! Value parsers for command arguments.

use mdm_core::human::parse_rate;
use mdm_core::resume_db::unix_timestamp;
use mdm_core::scheduler::SpeedTarget;

/// Bytes per second; `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate(pub Option<u64>);

pub fn parse_rate_arg(s: &str) -> Result<Rate, String> {
    parse_rate(s).map(Rate)
}

/// `global` or a job id.
pub fn parse_target(s: &str) -> Result<SpeedTarget, String> {
    if s.eq_ignore_ascii_case("global") {
        return Ok(SpeedTarget::Global);
    }
    s.parse()
        .map(SpeedTarget::Job)
        .map_err(|_| format!("expected a job id or 'global', got '{}'", s))
}

/// Unix seconds, or `+N[s|m|h]` from now.
pub fn parse_when(s: &str) -> Result<i64, String> {
    parse_when_at(s, unix_timestamp())
}

pub(crate) fn parse_when_at(s: &str, now: i64) -> Result<i64, String> {
    let s = s.trim();
    let Some(rel) = s.strip_prefix('+') else {
        return s
            .parse::<i64>()
            .map_err(|_| format!("invalid time '{}': use unix seconds or +N[s|m|h]", s));
    };
    let (digits, unit) = match rel.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&rel[..i], c.to_ascii_lowercase()),
        _ => (rel, 's'),
    };
    let n: i64 = digits
        .parse()
        .map_err(|_| format!("invalid offset '{}'", s))?;
    let secs = match unit {
        's' => n,
        'm' => n * 60,
        'h' => n * 3600,
        _ => return Err(format!("unknown unit in '{}': use s, m or h", s)),
    };
    Ok(now + secs)
}
