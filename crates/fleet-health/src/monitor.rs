//! Health monitor with one background task per monitored server.
//!
//! The `HealthMonitor` owns an arena of per-server tasks. Each task ticks on
//! its own interval, probes its relay, feeds the result to a
//! [`HealthTracker`] and dispatches alerts when the cooldown allows.
//! Snapshots of every server's status are published to a shared board.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use fleet_state::{ConfigSource, HealthCheckConfig, ServerHealthStatus, ServerId, ServerRecord};

use crate::checker::HealthTracker;
use crate::clock::{Clock, SystemClock};
use crate::error::{MonitorError, MonitorResult};
use crate::notify::{DeliveryError, Notification, NotificationSender};
use crate::probe::{ProbeResult, Prober, probe_with_timeout};

/// Floor for timer periods; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Timing knobs shared by every server task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Length of one configured "minute".
    pub tick_resolution: Duration,
    /// Upper bound for a single probe.
    pub probe_timeout: Duration,
    /// Upper bound for a single alert delivery.
    pub delivery_timeout: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            tick_resolution: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl MonitorOptions {
    pub fn interval(&self, config: &HealthCheckConfig) -> Duration {
        self.tick_resolution.saturating_mul(config.interval_minutes)
    }

    pub fn cooldown(&self, config: &HealthCheckConfig) -> TimeDelta {
        let cooldown = self
            .tick_resolution
            .saturating_mul(config.notification_cooldown_minutes);
        TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX)
    }

    /// Probe timeout for `config`, never more than half its interval.
    pub fn effective_probe_timeout(&self, config: &HealthCheckConfig) -> Duration {
        self.probe_timeout.min(self.interval(config) / 2)
    }
}

/// What a [`HealthMonitor::reconcile`] pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<ServerId>,
    pub restarted: Vec<ServerId>,
    pub stopped: Vec<ServerId>,
    /// Servers whose config failed validation; any running task is kept.
    pub rejected: Vec<ServerId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
            && self.restarted.is_empty()
            && self.stopped.is_empty()
            && self.rejected.is_empty()
    }
}

/// Per-server monitor state.
struct MonitorSlot {
    /// Handle to the background check task.
    handle: JoinHandle<PendingWork>,
    /// Shutdown signal for this monitor.
    shutdown_tx: watch::Sender<bool>,
    /// What the task was started with, for reconciliation.
    server: ServerRecord,
    config: HealthCheckConfig,
}

impl MonitorSlot {
    /// Abort the task. Outstanding probe and delivery results are dropped.
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }

    /// Stop the task and take over the probe and delivery it left
    /// outstanding.
    async fn retire(self) -> PendingWork {
        let _ = self.shutdown_tx.send(true);
        match self.handle.await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(server_id = self.server.id, error = %e, "health loop ended abnormally");
                PendingWork::new()
            }
        }
    }
}

/// A status snapshot tagged with the task generation allowed to write it.
struct BoardEntry {
    generation: u64,
    status: ServerHealthStatus,
}

type StatusBoard = Arc<RwLock<HashMap<ServerId, BoardEntry>>>;

/// Manages health check tasks for all monitored servers.
///
/// Cloning is cheap; clones share the same tasks and status board.
#[derive(Clone)]
pub struct HealthMonitor {
    /// Active monitors: server_id → slot.
    monitors: Arc<RwLock<HashMap<ServerId, MonitorSlot>>>,
    board: StatusBoard,
    generation: Arc<AtomicU64>,
    prober: Arc<dyn Prober>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    options: MonitorOptions,
}

impl HealthMonitor {
    /// Create a monitor reading time from the system clock.
    pub fn new(
        prober: Arc<dyn Prober>,
        sender: Arc<dyn NotificationSender>,
        options: MonitorOptions,
    ) -> Self {
        Self::with_clock(prober, sender, Arc::new(SystemClock), options)
    }

    pub fn with_clock(
        prober: Arc<dyn Prober>,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            monitors: Arc::new(RwLock::new(HashMap::new())),
            board: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            prober,
            sender,
            clock,
            options,
        }
    }

    pub fn options(&self) -> MonitorOptions {
        self.options
    }

    /// Start monitoring `server`, replacing any task already running for it.
    ///
    /// A replaced task's health history (failures, cooldown) carries over,
    /// and so does a probe or delivery it still has outstanding: the new
    /// task waits for that result instead of starting another one.
    pub async fn start_monitor(
        &self,
        server: ServerRecord,
        config: HealthCheckConfig,
    ) -> MonitorResult<()> {
        config.validate()?;
        if server.id != config.server_id {
            return Err(MonitorError::ServerMismatch {
                server: server.id,
                config: config.server_id,
            });
        }

        let server_id = server.id;
        let mut monitors = self.monitors.write().await;
        let (replaced, pending) = match monitors.remove(&server_id) {
            Some(slot) => (true, slot.retire().await),
            None => (false, PendingWork::new()),
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let tracker = {
            let mut board = self.board.write().await;
            let previous = board
                .remove(&server_id)
                .map(|entry| entry.status)
                .unwrap_or_else(|| ServerHealthStatus::new(server_id));
            let mut tracker = HealthTracker::resume(previous, self.options.cooldown(&config));
            if pending.probe_in_flight {
                tracker.begin_probe();
            }
            board.insert(
                server_id,
                BoardEntry {
                    generation,
                    status: tracker.status().clone(),
                },
            );
            tracker
        };

        let interval = self.options.interval(&config);
        let worker = ServerWorker {
            tracker,
            interval,
            probe_timeout: self.options.effective_probe_timeout(&config),
            delivery_timeout: self.options.delivery_timeout,
            server: server.clone(),
            config: config.clone(),
            generation,
            prober: self.prober.clone(),
            sender: self.sender.clone(),
            clock: self.clock.clone(),
            board: self.board.clone(),
            pending,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        monitors.insert(
            server_id,
            MonitorSlot {
                handle,
                shutdown_tx,
                server,
                config,
            },
        );

        info!(
            server_id,
            ?interval,
            replaced,
            "health monitor started"
        );
        Ok(())
    }

    /// Stop monitoring a server and forget its status.
    ///
    /// Idempotent. A probe or delivery already in flight runs to
    /// completion but its result is dropped.
    pub async fn stop_monitor(&self, server_id: ServerId) -> bool {
        let mut monitors = self.monitors.write().await;
        self.board.write().await.remove(&server_id);
        match monitors.remove(&server_id) {
            Some(slot) => {
                slot.stop();
                info!(server_id, "health monitor stopped");
                true
            }
            None => false,
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        let mut board = self.board.write().await;
        for (server_id, slot) in monitors.drain() {
            board.remove(&server_id);
            slot.stop();
            debug!(server_id, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    /// Server ids with an active monitor, ascending.
    pub async fn active_monitors(&self) -> Vec<ServerId> {
        let monitors = self.monitors.read().await;
        let mut ids: Vec<ServerId> = monitors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Check if a server has an active monitor.
    pub async fn is_monitoring(&self, server_id: ServerId) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(&server_id)
    }

    /// Latest status of one monitored server.
    pub async fn status(&self, server_id: ServerId) -> Option<ServerHealthStatus> {
        let board = self.board.read().await;
        board.get(&server_id).map(|entry| entry.status.clone())
    }

    /// Latest status of every monitored server, ordered by id.
    pub async fn statuses(&self) -> Vec<ServerHealthStatus> {
        let board = self.board.read().await;
        let mut statuses: Vec<ServerHealthStatus> =
            board.values().map(|entry| entry.status.clone()).collect();
        statuses.sort_unstable_by_key(|status| status.server_id);
        statuses
    }

    /// Bring the running tasks in line with `source`.
    ///
    /// New servers are started, servers whose record or config changed are
    /// restarted and servers no longer listed are stopped.
    pub async fn reconcile(&self, source: &dyn ConfigSource) -> MonitorResult<ReconcileReport> {
        let desired = source.monitored_servers()?;
        let running: HashMap<ServerId, (ServerRecord, HealthCheckConfig)> = {
            let monitors = self.monitors.read().await;
            monitors
                .iter()
                .map(|(id, slot)| (*id, (slot.server.clone(), slot.config.clone())))
                .collect()
        };

        let mut report = ReconcileReport::default();
        let mut wanted = HashSet::new();

        for (server, config) in desired {
            let server_id = server.id;
            wanted.insert(server_id);

            let restarting = match running.get(&server_id) {
                Some((s, c)) if *s == server && *c == config => continue,
                Some(_) => true,
                None => false,
            };

            match self.start_monitor(server, config).await {
                Ok(()) if restarting => report.restarted.push(server_id),
                Ok(()) => report.started.push(server_id),
                Err(e) => {
                    warn!(server_id, error = %e, "health check config rejected");
                    report.rejected.push(server_id);
                }
            }
        }

        for server_id in running.keys().filter(|id| !wanted.contains(id)) {
            self.stop_monitor(*server_id).await;
            report.stopped.push(*server_id);
        }

        report.started.sort_unstable();
        report.restarted.sort_unstable();
        report.stopped.sort_unstable();
        report.rejected.sort_unstable();
        Ok(report)
    }

    /// Reconcile against `source` every `refresh` until `shutdown` fires,
    /// then stop every monitor.
    pub async fn run(
        &self,
        source: &dyn ConfigSource,
        refresh: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(refresh.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(?refresh, "health monitor running");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile(source).await {
                        Ok(report) if !report.is_empty() => info!(
                            started = report.started.len(),
                            restarted = report.restarted.len(),
                            stopped = report.stopped.len(),
                            rejected = report.rejected.len(),
                            "health checks reconciled"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "health check reconcile failed"),
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }

        self.stop_all().await;
    }
}

// ── Per-server task ────────────────────────────────────────────────

/// A finished probe and the tick time it was started at.
type ProbeReport = (DateTime<Utc>, ProbeResult);

type DeliveryOutcome = (DateTime<Utc>, Result<(), DeliveryError>);

/// Probes and deliveries dispatched to detached tasks, with the channels
/// their results come back on.
///
/// Outlives a single worker: a replaced worker hands it to its successor.
struct PendingWork {
    probe_tx: mpsc::Sender<ProbeReport>,
    probe_rx: mpsc::Receiver<ProbeReport>,
    delivery_tx: mpsc::Sender<DeliveryOutcome>,
    delivery_rx: mpsc::Receiver<DeliveryOutcome>,
    probe_in_flight: bool,
    delivery_in_flight: bool,
}

impl PendingWork {
    fn new() -> Self {
        // At most one probe and one delivery are outstanding.
        let (probe_tx, probe_rx) = mpsc::channel(1);
        let (delivery_tx, delivery_rx) = mpsc::channel(1);
        Self {
            probe_tx,
            probe_rx,
            delivery_tx,
            delivery_rx,
            probe_in_flight: false,
            delivery_in_flight: false,
        }
    }
}

/// The health check loop for a single server.
///
/// Sole writer of this server's status. Probes and deliveries run in
/// detached tasks and report back over channels, so a slow relay or a slow
/// channel never delays the next tick.
struct ServerWorker {
    server: ServerRecord,
    config: HealthCheckConfig,
    generation: u64,
    tracker: HealthTracker,
    interval: Duration,
    probe_timeout: Duration,
    delivery_timeout: Duration,
    prober: Arc<dyn Prober>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    board: StatusBoard,
    pending: PendingWork,
}

impl ServerWorker {
    /// Returns the work still outstanding when the loop ends.
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PendingWork {
        let mut ticker = tokio::time::interval(self.interval.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let server_id = self.server.id;
        debug!(server_id, interval = ?self.interval, "health loop starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                Some(report) = self.pending.probe_rx.recv() => self.on_probe_result(report),
                Some((detected_at, result)) = self.pending.delivery_rx.recv() => {
                    self.on_delivery(detected_at, result);
                }
                _ = shutdown.changed() => {
                    debug!(server_id, "health loop shutting down");
                    break;
                }
            }

            if !self.publish().await {
                debug!(server_id, "health loop superseded");
                break;
            }
        }

        self.pending
    }

    fn on_tick(&mut self) {
        if self.pending.probe_in_flight {
            self.tracker.record_skipped_tick();
            debug!(server_id = self.server.id, "previous probe still running, tick skipped");
            return;
        }

        self.pending.probe_in_flight = true;
        self.tracker.begin_probe();

        let tick_at = self.clock.now();
        let prober = self.prober.clone();
        let server = self.server.clone();
        let timeout = self.probe_timeout;
        let tx = self.pending.probe_tx.clone();
        tokio::spawn(async move {
            let result = probe_with_timeout(prober.as_ref(), &server, timeout).await;
            // The loop may be gone; the result is then discarded.
            let _ = tx.send((tick_at, result)).await;
        });
    }

    /// Results are dated by their tick, so probe latency does not shift
    /// the alert cadence.
    fn on_probe_result(&mut self, (tick_at, result): ProbeReport) {
        self.pending.probe_in_flight = false;
        let outcome = self.tracker.record(&result, tick_at);
        if !outcome.notify {
            return;
        }

        let server_id = self.server.id;
        let Some(channel_id) = self.config.notification_channel_id else {
            debug!(server_id, "no notification channel configured");
            return;
        };
        if self.pending.delivery_in_flight {
            debug!(server_id, "previous alert still being delivered");
            return;
        }
        self.pending.delivery_in_flight = true;

        let status = self.tracker.status();
        let notification = Notification {
            server_id,
            server_name: self.server.name.clone(),
            reason: status.last_failure_reason.clone().unwrap_or_default(),
            consecutive_failures: status.consecutive_failures,
            detected_at: tick_at,
        };
        let sender = self.sender.clone();
        let timeout = self.delivery_timeout;
        let tx = self.pending.delivery_tx.clone();
        tokio::spawn(async move {
            let delivery = sender.send(channel_id, &notification);
            let result = match tokio::time::timeout(timeout, delivery).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(timeout)),
            };
            let _ = tx.send((notification.detected_at, result)).await;
        });
    }

    fn on_delivery(&mut self, detected_at: DateTime<Utc>, result: Result<(), DeliveryError>) {
        self.pending.delivery_in_flight = false;
        let server_id = self.server.id;
        match result {
            Ok(()) => {
                if self.tracker.mark_notified(detected_at) {
                    info!(server_id, "unhealthy alert delivered");
                } else {
                    debug!(server_id, "alert delivered after recovery");
                }
            }
            Err(e) => {
                self.tracker.record_delivery_failure();
                warn!(server_id, error = %e, "alert delivery failed, will retry");
            }
        }
    }

    /// Write the current status to the board. Returns false once this task
    /// no longer owns the entry (stopped or replaced).
    async fn publish(&self) -> bool {
        let mut board = self.board.write().await;
        match board.get_mut(&self.server.id) {
            Some(entry) if entry.generation == self.generation => {
                entry.status = self.tracker.status().clone();
                true
            }
            _ => false,
        }
    }
}
