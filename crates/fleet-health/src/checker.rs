//! Per-server health state transitions.
//!
//! Applies probe results to a [`ServerHealthStatus`] and consults the
//! cooldown gate to decide whether the result warrants an alert.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use fleet_state::{HealthState, MonitorPhase, ServerHealthStatus, ServerId};

use crate::cooldown::should_notify;
use crate::probe::ProbeResult;

/// What recording one probe result did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub previous: HealthState,
    pub current: HealthState,
    /// The cooldown gate authorizes an alert for this failure.
    pub notify: bool,
}

impl ProbeOutcome {
    pub fn recovered(&self) -> bool {
        self.previous == HealthState::Unhealthy && self.current == HealthState::Healthy
    }
}

/// Tracks probe results for a single server.
#[derive(Debug)]
pub struct HealthTracker {
    status: ServerHealthStatus,
    /// Minimum spacing between alerts for one outage.
    cooldown: TimeDelta,
}

impl HealthTracker {
    /// Start tracking a server with no history.
    pub fn new(server_id: ServerId, cooldown: TimeDelta) -> Self {
        Self::resume(ServerHealthStatus::new(server_id), cooldown)
    }

    /// Continue from an existing status, e.g. after a config change.
    ///
    /// A `Probing` phase falls back to the last known health; the caller
    /// calls [`begin_probe`](Self::begin_probe) again if that probe is still
    /// outstanding.
    pub fn resume(mut status: ServerHealthStatus, cooldown: TimeDelta) -> Self {
        if status.phase == MonitorPhase::Probing {
            status.phase = match status.health {
                HealthState::Unknown => MonitorPhase::Idle,
                HealthState::Healthy => MonitorPhase::Healthy,
                HealthState::Unhealthy => MonitorPhase::Unhealthy,
            };
        }
        Self { status, cooldown }
    }

    /// A probe is about to run.
    pub fn begin_probe(&mut self) {
        self.status.phase = MonitorPhase::Probing;
    }

    /// A tick arrived while the previous probe was still outstanding.
    pub fn record_skipped_tick(&mut self) {
        self.status.skipped_ticks += 1;
    }

    /// Record a probe result for the tick at `now`.
    pub fn record(&mut self, result: &ProbeResult, now: DateTime<Utc>) -> ProbeOutcome {
        let previous = self.status.health;
        self.status.last_check_at = Some(now);

        match result {
            ProbeResult::Reachable => {
                self.status.health = HealthState::Healthy;
                self.status.phase = MonitorPhase::Healthy;
                self.status.consecutive_failures = 0;
                self.status.last_notified_at = None;
                self.status.last_failure_reason = None;

                if previous == HealthState::Unhealthy {
                    info!(server_id = self.status.server_id, "server recovered");
                }
                ProbeOutcome {
                    previous,
                    current: HealthState::Healthy,
                    notify: false,
                }
            }
            ProbeResult::Unreachable(reason) => {
                self.status.health = HealthState::Unhealthy;
                self.status.phase = MonitorPhase::Unhealthy;
                self.status.consecutive_failures =
                    self.status.consecutive_failures.saturating_add(1);
                self.status.last_failure_reason = Some(reason.clone());

                if previous != HealthState::Unhealthy {
                    warn!(
                        server_id = self.status.server_id,
                        %reason,
                        "server marked unhealthy"
                    );
                } else {
                    debug!(
                        server_id = self.status.server_id,
                        failures = self.status.consecutive_failures,
                        %reason,
                        "server still unhealthy"
                    );
                }

                ProbeOutcome {
                    previous,
                    current: HealthState::Unhealthy,
                    notify: should_notify(&self.status, self.cooldown, now),
                }
            }
        }
    }

    /// An alert detected at `at` was accepted for delivery.
    ///
    /// Starts the cooldown. Ignored (returns false) if the server has
    /// recovered since, so the next outage still alerts immediately.
    pub fn mark_notified(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.is_unhealthy() {
            return false;
        }
        self.status.last_notified_at = Some(at);
        true
    }

    /// An alert could not be delivered. The cooldown is left untouched.
    pub fn record_delivery_failure(&mut self) {
        self.status.delivery_failures += 1;
    }

    pub fn status(&self) -> &ServerHealthStatus {
        &self.status
    }

    pub fn cooldown(&self) -> TimeDelta {
        self.cooldown
    }
}
