//! fleet-core — configuration shared by the fleet daemon and its subsystems.

pub mod config;
pub mod duration;

pub use config::{DaemonConfig, FleetConfig, LogConfig, MonitorSettings, MonitorTimings};
pub use duration::{DurationError, parse_duration};
