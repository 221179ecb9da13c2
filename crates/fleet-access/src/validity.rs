//! Access-key validity evaluation.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;

use fleet_state::AccessKeyRecord;

use crate::time::{compute_expiry, format_span};

/// Whether a key is usable at a given instant. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityState {
    /// A fixed expiry date is set on the key.
    Explicit(DateTime<Utc>),
    /// A validity period is set but the key has not been used yet.
    NotStarted,
    /// No validity period.
    Unlimited,
    /// The computed expiry has passed.
    Expired(DateTime<Utc>),
    /// Time left until the computed expiry.
    Active(TimeDelta),
}

/// Classify `record` at `now`. The first matching rule wins:
///
/// 1. `expires_at` set → `Explicit`
/// 2. period set, never used → `NotStarted`
/// 3. no period → `Unlimited`
/// 4. computed expiry at or before `now` → `Expired`
/// 5. otherwise → `Active(expiry - now)`
///
/// An expiry beyond the timestamp range never arrives and reads as `Unlimited`.
pub fn evaluate(record: &AccessKeyRecord, now: DateTime<Utc>) -> ValidityState {
    if let Some(at) = record.expires_at {
        return ValidityState::Explicit(at);
    }
    if record.usage_started_at.is_none() && record.has_validity_period() {
        return ValidityState::NotStarted;
    }
    if !record.has_validity_period() {
        return ValidityState::Unlimited;
    }

    match compute_expiry(record) {
        Some(expiry) if expiry <= now => ValidityState::Expired(expiry),
        Some(expiry) => ValidityState::Active(expiry - now),
        None => ValidityState::Unlimited,
    }
}

impl ValidityState {
    /// Whether re-evaluating the same record later can yield a different state.
    pub fn is_counting_down(&self) -> bool {
        matches!(self, ValidityState::Active(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValidityState::Explicit(_) => "explicit",
            ValidityState::NotStarted => "not_started",
            ValidityState::Unlimited => "unlimited",
            ValidityState::Expired(_) => "expired",
            ValidityState::Active(_) => "active",
        }
    }

    /// Short status text for display.
    pub fn describe(&self) -> String {
        match self {
            ValidityState::Explicit(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ValidityState::NotStarted => "not started".to_string(),
            ValidityState::Unlimited => "unlimited".to_string(),
            ValidityState::Expired(_) => "expired".to_string(),
            ValidityState::Active(remaining) => format_span(*remaining),
        }
    }
}

/// Serializable form of a [`ValidityState`] for API readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidityView {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
    pub label: String,
}

impl ValidityView {
    pub fn new(record: &AccessKeyRecord, state: ValidityState) -> Self {
        let remaining_secs = match state {
            ValidityState::Active(remaining) => Some(remaining.num_seconds()),
            _ => None,
        };
        Self {
            state: state.name(),
            expires_at: compute_expiry(record),
            remaining_secs,
            label: state.describe(),
        }
    }
}
