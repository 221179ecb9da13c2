//! Domain types for the fleet state store.
//!
//! Servers, channels, health-check configs and access keys are persisted.
//! `ServerHealthStatus` is serializable for readers but only ever held in
//! memory by the health monitor.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Unique identifier for a relay server.
pub type ServerId = u64;

/// Unique identifier for a notification channel.
pub type ChannelId = u64;

/// Unique identifier for an access key.
pub type AccessKeyId = u64;

/// Channel id submitted by clients to mean "no channel".
pub const NO_CHANNEL: ChannelId = 0;

/// Smallest accepted interval or cooldown, in minutes.
pub const MIN_MINUTES: u32 = 1;

/// Largest accepted interval or cooldown, in minutes.
pub const MAX_MINUTES: u32 = 10_000;

// ── Server ────────────────────────────────────────────────────────

/// A VPN relay server and the management endpoint used to probe it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    /// Public hostname or IP clients connect to.
    pub hostname: String,
    /// Management API base URL (e.g. `https://203.0.113.7:41234/Xk3a`).
    pub api_url: String,
    /// Hex SHA-256 fingerprint of the management API's self-signed certificate.
    pub cert_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Notification channel ──────────────────────────────────────────

/// Transport family of a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Telegram,
    Webhook,
    Email,
}

/// Where alerts for a server are delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationChannel {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    /// Transport-specific destination (chat id, URL, address).
    pub target: String,
}

// ── Health check ──────────────────────────────────────────────────

/// Per-server health-check settings. Read-only to the monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub server_id: ServerId,
    pub interval_minutes: u32,
    pub notification_cooldown_minutes: u32,
    /// `None` disables alerting for this server.
    pub notification_channel_id: Option<ChannelId>,
}

impl HealthCheckConfig {
    /// A config with default 5 minute interval and cooldown, alerting off.
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            interval_minutes: 5,
            notification_cooldown_minutes: 5,
            notification_channel_id: None,
        }
    }

    /// Range-check interval and cooldown.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_minutes(self.interval_minutes, self.notification_cooldown_minutes)
    }
}

/// Client-submitted change to a health check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckUpdate {
    pub interval_minutes: u32,
    pub notification_cooldown_minutes: u32,
    /// [`NO_CHANNEL`] clears the channel.
    #[serde(default)]
    pub notification_channel_id: ChannelId,
}

impl HealthCheckUpdate {
    /// Channel id with the sentinel mapped to `None`.
    pub fn channel(&self) -> Option<ChannelId> {
        (self.notification_channel_id != NO_CHANNEL).then_some(self.notification_channel_id)
    }

    /// Apply to the stored config for `server_id`.
    pub fn apply_to(&self, server_id: ServerId) -> Result<HealthCheckConfig, ConfigError> {
        validate_minutes(self.interval_minutes, self.notification_cooldown_minutes)?;
        Ok(HealthCheckConfig {
            server_id,
            interval_minutes: self.interval_minutes,
            notification_cooldown_minutes: self.notification_cooldown_minutes,
            notification_channel_id: self.channel(),
        })
    }
}

fn validate_minutes(interval: u32, cooldown: u32) -> Result<(), ConfigError> {
    if !(MIN_MINUTES..=MAX_MINUTES).contains(&interval) {
        return Err(ConfigError::Interval {
            value: interval,
            min: MIN_MINUTES,
            max: MAX_MINUTES,
        });
    }
    if !(MIN_MINUTES..=MAX_MINUTES).contains(&cooldown) {
        return Err(ConfigError::Cooldown {
            value: cooldown,
            min: MIN_MINUTES,
            max: MAX_MINUTES,
        });
    }
    Ok(())
}

// ── Access key ────────────────────────────────────────────────────

/// A dynamically issued access credential.
///
/// `expires_at` always wins over an expiry computed from
/// `usage_started_at + validity_period`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessKeyRecord {
    pub id: AccessKeyId,
    pub name: String,
    pub server_id: ServerId,
    pub expires_at: Option<DateTime<Utc>>,
    /// Written once by usage tracking on first observed traffic.
    pub usage_started_at: Option<DateTime<Utc>>,
    pub validity_period_secs: Option<u64>,
}

impl AccessKeyRecord {
    /// A key with no limits set.
    pub fn new(id: AccessKeyId, server_id: ServerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            server_id,
            expires_at: None,
            usage_started_at: None,
            validity_period_secs: None,
        }
    }

    pub fn with_validity_period(mut self, period: TimeDelta) -> Self {
        self.validity_period_secs = Some(period.num_seconds().max(0) as u64);
        self
    }

    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_usage_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.usage_started_at = Some(at);
        self
    }

    /// A zero period counts as unset.
    pub fn has_validity_period(&self) -> bool {
        matches!(self.validity_period_secs, Some(secs) if secs > 0)
    }

    /// The validity period, or `None` if unset, zero or beyond `TimeDelta`'s range.
    pub fn validity_period(&self) -> Option<TimeDelta> {
        let secs = self.validity_period_secs.filter(|secs| *secs > 0)?;
        let secs = i64::try_from(secs).ok()?;
        TimeDelta::try_seconds(secs)
    }
}

// ── Health status ─────────────────────────────────────────────────

/// Health as determined by probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Where a server's monitor task is in its probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    #[default]
    Idle,
    Probing,
    Healthy,
    Unhealthy,
}

/// Per-server health snapshot, owned by the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerHealthStatus {
    pub server_id: ServerId,
    pub phase: MonitorPhase,
    pub health: HealthState,
    pub last_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    /// Ticks dropped because the previous probe was still outstanding.
    pub skipped_ticks: u64,
    pub delivery_failures: u64,
}

impl ServerHealthStatus {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            phase: MonitorPhase::Idle,
            health: HealthState::Unknown,
            last_check_at: None,
            consecutive_failures: 0,
            last_notified_at: None,
            last_failure_reason: None,
            skipped_ticks: 0,
            delivery_failures: 0,
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        self.health == HealthState::Unhealthy
    }
}
