//! Duration strings as written in `fleet.toml` ("500ms", "10s", "1m", "2h").

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration string")]
    Empty,

    #[error("invalid duration: {0:?}")]
    Invalid(String),
}

/// Parse a duration string like "5s", "500ms", "1m", "2h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }

    let invalid = || DurationError::Invalid(s.to_string());
    let (digits, scale_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    let millis = value.checked_mul(scale_ms).ok_or_else(invalid)?;
    Ok(Duration::from_millis(millis))
}
