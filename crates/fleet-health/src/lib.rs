//! fleet-health — health checking and alerting for relay servers.
//!
//! Probes each relay's management API on its own interval, tracks
//! failure/recovery transitions and decides when an operator should be
//! alerted. Delivery itself is delegated to a [`NotificationSender`].
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── Per-server background task (one per ServerId)
//!   │   ├── interval ticker, skip-if-busy
//!   │   ├── Prober::probe() under a timeout → ProbeResult
//!   │   ├── HealthTracker (consecutive failures, cooldown gate)
//!   │   └── NotificationSender::send() in a detached task
//!   └── Status board: ServerId → ServerHealthStatus snapshot
//! ```
//!
//! # Alerting
//!
//! The first failure alerts immediately. While the server stays down,
//! further alerts wait for the configured cooldown. A successful probe
//! clears the cooldown so the next outage alerts at once. A failed delivery
//! does not start the cooldown; the next failing tick retries it.

pub mod checker;
pub mod clock;
pub mod cooldown;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod tls;

pub use checker::{HealthTracker, ProbeOutcome};
pub use clock::{Clock, SystemClock};
pub use cooldown::should_notify;
pub use error::{MonitorError, MonitorResult};
pub use monitor::{HealthMonitor, MonitorOptions, ReconcileReport};
pub use notify::{DeliveryError, LogSender, Notification, NotificationSender};
pub use probe::{BoxFuture, HttpProber, ProbeResult, Prober, probe_with_timeout};
