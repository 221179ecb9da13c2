//! Read seam between persistence and the health monitor.

use crate::error::StateResult;
use crate::types::{HealthCheckConfig, ServerRecord};

/// Supplies the set of servers the health monitor should probe.
pub trait ConfigSource: Send + Sync {
    /// Every server that has a health-check config, paired with it.
    fn monitored_servers(&self) -> StateResult<Vec<(ServerRecord, HealthCheckConfig)>>;
}
