//! Expiry timestamps and remaining-time strings.

use chrono::{DateTime, TimeDelta, Utc};
use fleet_state::AccessKeyRecord;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

const UNITS: [(i64, &str); 6] = [
    (YEAR, "y"),
    (MONTH, "mo"),
    (DAY, "d"),
    (HOUR, "h"),
    (MINUTE, "m"),
    (1, "s"),
];

/// Most significant non-zero units shown by [`format_duration`].
const MAX_PARTS: usize = 3;

/// When the key stops being valid, if it ever does.
///
/// `expires_at` wins. Otherwise the expiry is `usage_started_at +
/// validity_period`; `None` when either is missing or the sum leaves the
/// representable range.
pub fn compute_expiry(record: &AccessKeyRecord) -> Option<DateTime<Utc>> {
    if let Some(at) = record.expires_at {
        return Some(at);
    }
    let started = record.usage_started_at?;
    let period = record.validity_period()?;
    started.checked_add_signed(period)
}

/// Render `to - from` as e.g. `"3d 4h 12m"`.
///
/// Years are 365 days and months 30. Spans at or below zero render as `"0s"`.
pub fn format_duration(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format_span(to.signed_duration_since(from))
}

/// [`format_duration`] for an already computed span.
pub fn format_span(span: TimeDelta) -> String {
    let mut remaining = span.num_seconds();
    if remaining <= 0 {
        return "0s".to_string();
    }

    let mut parts = Vec::with_capacity(MAX_PARTS);
    for (size, suffix) in UNITS {
        let count = remaining / size;
        if count > 0 {
            parts.push(format!("{count}{suffix}"));
            remaining %= size;
        }
        if parts.len() == MAX_PARTS {
            break;
        }
    }
    parts.join(" ")
}
