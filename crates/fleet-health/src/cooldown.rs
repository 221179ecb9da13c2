//! Alert cooldown gate.

use chrono::{DateTime, TimeDelta, Utc};

use fleet_state::ServerHealthStatus;

/// Whether a failing server should alert at `now`.
///
/// Only unhealthy servers alert. The first alert of an outage
/// (`last_notified_at` unset) always fires; later ones wait until
/// `cooldown` has passed since the last delivered alert.
pub fn should_notify(status: &ServerHealthStatus, cooldown: TimeDelta, now: DateTime<Utc>) -> bool {
    if !status.is_unhealthy() {
        return false;
    }
    match status.last_notified_at {
        None => true,
        Some(last) => now.signed_duration_since(last) >= cooldown,
    }
}
