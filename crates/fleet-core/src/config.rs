//! fleet.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub daemon: DaemonConfig,
    pub monitor: MonitorSettings,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/fleet"),
        }
    }
}

/// Health monitor knobs. All values are duration strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Wall-clock length of one interval/cooldown unit.
    pub tick_resolution: String,
    /// Upper bound for a single probe.
    pub probe_timeout: String,
    /// Upper bound for a single notification delivery.
    pub delivery_timeout: String,
    /// How often persisted health-check configs are reconciled.
    pub config_refresh: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_resolution: "1m".to_string(),
            probe_timeout: "10s".to_string(),
            delivery_timeout: "30s".to_string(),
            config_refresh: "1m".to_string(),
        }
    }
}

/// Parsed form of [`MonitorSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    pub tick_resolution: Duration,
    pub probe_timeout: Duration,
    pub delivery_timeout: Duration,
    pub config_refresh: Duration,
}

impl MonitorSettings {
    pub fn timings(&self) -> anyhow::Result<MonitorTimings> {
        let timings = MonitorTimings {
            tick_resolution: parse_duration(&self.tick_resolution)?,
            probe_timeout: parse_duration(&self.probe_timeout)?,
            delivery_timeout: parse_duration(&self.delivery_timeout)?,
            config_refresh: parse_duration(&self.config_refresh)?,
        };
        if timings.tick_resolution.is_zero() {
            anyhow::bail!("monitor.tick_resolution must be greater than zero");
        }
        if timings.probe_timeout.is_zero() {
            anyhow::bail!("monitor.probe_timeout must be greater than zero");
        }
        if timings.delivery_timeout.is_zero() {
            anyhow::bail!("monitor.delivery_timeout must be greater than zero");
        }
        if timings.config_refresh.is_zero() {
            anyhow::bail!("monitor.config_refresh must be greater than zero");
        }
        Ok(timings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
    pub json: bool,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        // Fail at load time rather than when the monitor starts.
        config.monitor.timings()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
