//! Wall-clock seam for the monitor.

use chrono::{DateTime, Utc};

/// Source of the timestamps written into health status and alerts.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
