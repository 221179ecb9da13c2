//! Scheduler integration tests on tokio's paused clock.
//!
//! These drive a real `HealthMonitor` with scripted probes and a recording
//! notification sender:
//! - alert cadence for a continuous outage and after recovery
//! - delivery failures keep the cooldown open
//! - single-flight probing
//! - stop / restart / reconcile lifecycle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use fleet_health::{
    BoxFuture, Clock, DeliveryError, HealthMonitor, MonitorError, MonitorOptions, Notification,
    NotificationSender, ProbeResult, Prober,
};
use fleet_state::{
    ChannelId, HealthCheckConfig, HealthState, MonitorPhase, ServerId, ServerRecord, StateStore,
};

const MINUTE: Duration = Duration::from_secs(60);

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// Wall clock that follows tokio's paused clock, starting at `base()`.
struct TokioClock {
    start: tokio::time::Instant,
}

impl TokioClock {
    fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        base() + TimeDelta::from_std(self.start.elapsed()).unwrap_or(TimeDelta::zero())
    }
}

/// Probe whose answer is flipped by the test.
#[derive(Default)]
struct SwitchProber {
    up: AtomicBool,
    probes: AtomicUsize,
}

impl SwitchProber {
    fn down() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl Prober for SwitchProber {
    fn probe<'a>(&'a self, _server: &'a ServerRecord) -> BoxFuture<'a, ProbeResult> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let result = if self.up.load(Ordering::SeqCst) {
            ProbeResult::Reachable
        } else {
            ProbeResult::unreachable("connect failed: connection refused")
        };
        Box::pin(async move { result })
    }
}

/// Probe that takes `delay` and tracks how many run at once.
struct SlowProber {
    delay: Duration,
    current: AtomicUsize,
    max: AtomicUsize,
}

impl SlowProber {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            current: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
        })
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Prober for SlowProber {
    fn probe<'a>(&'a self, _server: &'a ServerRecord) -> BoxFuture<'a, ProbeResult> {
        Box::pin(async move {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.current);
            tokio::time::sleep(self.delay).await;
            ProbeResult::unreachable("http status 503")
        })
    }
}

/// Down relay whose first probe takes `first_delay`; later probes answer at once.
struct LaggingProber {
    first_delay: Duration,
    probes: AtomicUsize,
}

impl Prober for LaggingProber {
    fn probe<'a>(&'a self, _server: &'a ServerRecord) -> BoxFuture<'a, ProbeResult> {
        let first = self.probes.fetch_add(1, Ordering::SeqCst) == 0;
        let delay = if first { self.first_delay } else { Duration::ZERO };
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            ProbeResult::unreachable("connect failed: connection refused")
        })
    }
}

/// Records every send attempt; the first `fail_first` attempts are rejected.
/// Each attempt takes `delay` to answer.
#[derive(Default)]
struct RecordingSender {
    fail_first: usize,
    delay: Duration,
    attempts: Mutex<Vec<(ChannelId, Notification)>>,
}

impl RecordingSender {
    fn failing(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn attempts(&self) -> Vec<(ChannelId, Notification)> {
        self.attempts.lock().unwrap().clone()
    }

    /// Minutes after `base()` at which each attempt was detected.
    fn attempt_minutes(&self) -> Vec<i64> {
        self.attempts()
            .iter()
            .map(|(_, n)| (n.detected_at - base()).num_minutes())
            .collect()
    }
}

impl NotificationSender for RecordingSender {
    fn send<'a>(
        &'a self,
        channel_id: ChannelId,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        let mut attempts = self.attempts.lock().unwrap();
        attempts.push((channel_id, notification.clone()));
        let result = if attempts.len() <= self.fail_first {
            Err(DeliveryError::Rejected("bot blocked".to_string()))
        } else {
            Ok(())
        };
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

fn server(id: ServerId) -> ServerRecord {
    ServerRecord {
        id,
        name: format!("relay-{id}"),
        hostname: format!("relay-{id}.test"),
        api_url: format!("https://relay-{id}.test/api"),
        cert_sha256: None,
        created_at: base(),
    }
}

fn check(
    id: ServerId,
    interval: u32,
    cooldown: u32,
    channel: Option<ChannelId>,
) -> HealthCheckConfig {
    HealthCheckConfig {
        server_id: id,
        interval_minutes: interval,
        notification_cooldown_minutes: cooldown,
        notification_channel_id: channel,
    }
}

fn monitor(prober: Arc<dyn Prober>, sender: Arc<dyn NotificationSender>) -> HealthMonitor {
    HealthMonitor::with_clock(
        prober,
        sender,
        Arc::new(TokioClock::new()),
        MonitorOptions::default(),
    )
}

/// Sleep until `minutes` (plus a margin) after the test started.
async fn at_minute(start: tokio::time::Instant, minutes: f64) {
    tokio::time::sleep_until(start + MINUTE.mul_f64(minutes)).await;
}

// ── Alert cadence ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn continuous_outage_alerts_once_per_cooldown() {
    let start = tokio::time::Instant::now();
    let sender = RecordingSender::failing(0);
    let monitor = monitor(SwitchProber::down(), sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 10, Some(7))).await.unwrap();
    at_minute(start, 20.5).await;

    assert_eq!(sender.attempt_minutes(), vec![0, 10, 20]);
    let (channel, last) = sender.attempts().pop().unwrap();
    assert_eq!(channel, 7);
    assert_eq!(last.server_name, "relay-1");
    assert_eq!(last.consecutive_failures, 5);
    assert_eq!(last.reason, "connect failed: connection refused");

    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.health, HealthState::Unhealthy);
    assert_eq!(status.phase, MonitorPhase::Unhealthy);
    assert_eq!(status.consecutive_failures, 5);
    assert_eq!(status.last_notified_at, Some(base() + TimeDelta::minutes(20)));
}

#[tokio::test(start_paused = true)]
async fn cadence_ignores_probe_latency() {
    let start = tokio::time::Instant::now();
    let prober = Arc::new(LaggingProber {
        first_delay: Duration::from_secs(9),
        probes: AtomicUsize::new(0),
    });
    let sender = RecordingSender::failing(0);
    let monitor = monitor(prober, sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 10, Some(7))).await.unwrap();
    at_minute(start, 20.5).await;

    let detected: Vec<DateTime<Utc>> = sender
        .attempts()
        .iter()
        .map(|(_, n)| n.detected_at)
        .collect();
    assert_eq!(
        detected,
        vec![
            base(),
            base() + TimeDelta::minutes(10),
            base() + TimeDelta::minutes(20),
        ]
    );
    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.last_check_at, Some(base() + TimeDelta::minutes(20)));
}

#[tokio::test(start_paused = true)]
async fn recovery_resets_cooldown() {
    let start = tokio::time::Instant::now();
    let prober = SwitchProber::down();
    let sender = RecordingSender::failing(0);
    let monitor = monitor(prober.clone(), sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 60, Some(1))).await.unwrap();

    at_minute(start, 2.5).await;
    prober.set_up(true);
    at_minute(start, 7.5).await;
    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.health, HealthState::Healthy);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_notified_at, None);

    prober.set_up(false);
    at_minute(start, 10.5).await;

    // The new outage alerts at once despite the 60 minute cooldown.
    assert_eq!(sender.attempt_minutes(), vec![0, 10]);
    assert_eq!(monitor.status(1).await.unwrap().consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_is_retried_next_tick() {
    let start = tokio::time::Instant::now();
    let sender = RecordingSender::failing(1);
    let monitor = monitor(SwitchProber::down(), sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 60, Some(1))).await.unwrap();
    at_minute(start, 12.5).await;

    // 0: rejected, 5: accepted, 10: inside cooldown.
    assert_eq!(sender.attempt_minutes(), vec![0, 5]);
    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.delivery_failures, 1);
    assert_eq!(status.last_notified_at, Some(base() + TimeDelta::minutes(5)));
}

#[tokio::test(start_paused = true)]
async fn no_channel_means_no_alert() {
    let start = tokio::time::Instant::now();
    let sender = RecordingSender::failing(0);
    let monitor = monitor(SwitchProber::down(), sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 5, None)).await.unwrap();
    at_minute(start, 10.5).await;

    assert!(sender.attempts().is_empty());
    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.last_notified_at, None);
}

// ── Scheduling ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_probes_never_overlap() {
    let start = tokio::time::Instant::now();
    let prober = SlowProber::new(20 * MINUTE);
    let monitor = monitor(prober.clone(), RecordingSender::failing(0));

    monitor.start_monitor(server(1), check(1, 5, 5, None)).await.unwrap();
    at_minute(start, 20.5).await;

    assert_eq!(prober.max.load(Ordering::SeqCst), 1);
    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.consecutive_failures, 5);
    assert_eq!(
        status.last_failure_reason.as_deref(),
        Some("probe timed out after 10s")
    );
}

#[tokio::test(start_paused = true)]
async fn servers_are_probed_independently() {
    let start = tokio::time::Instant::now();
    let fast = SwitchProber::down();
    fast.set_up(true);
    let monitor = monitor(fast.clone(), RecordingSender::failing(0));

    monitor.start_monitor(server(1), check(1, 1, 5, None)).await.unwrap();
    monitor.start_monitor(server(2), check(2, 10, 5, None)).await.unwrap();
    at_minute(start, 9.5).await;

    // Ten probes for server 1 (0..=9) and one for server 2.
    assert_eq!(fast.probes.load(Ordering::SeqCst), 11);
    assert_eq!(monitor.active_monitors().await, vec![1, 2]);
    let statuses = monitor.statuses().await;
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| s.health == HealthState::Healthy));
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_discards_in_flight_probe() {
    let start = tokio::time::Instant::now();
    let prober = SlowProber::new(Duration::from_secs(5));
    let sender = RecordingSender::failing(0);
    let monitor = monitor(prober.clone(), sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 5, Some(1))).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(prober.current.load(Ordering::SeqCst), 1);

    assert!(monitor.stop_monitor(1).await);
    assert!(!monitor.stop_monitor(1).await, "second stop is a no-op");
    at_minute(start, 6.0).await;

    assert!(!monitor.is_monitoring(1).await);
    assert_eq!(monitor.status(1).await, None);
    assert!(sender.attempts().is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let monitor = monitor(SwitchProber::down(), RecordingSender::failing(0));

    let err = monitor.start_monitor(server(1), check(1, 0, 5, None)).await.unwrap_err();
    assert!(matches!(err, MonitorError::InvalidConfig(_)));

    let err = monitor.start_monitor(server(1), check(1, 5, 10_001, None)).await.unwrap_err();
    assert!(matches!(err, MonitorError::InvalidConfig(_)));

    let err = monitor.start_monitor(server(1), check(2, 5, 5, None)).await.unwrap_err();
    assert!(matches!(err, MonitorError::ServerMismatch { server: 1, config: 2 }));

    assert!(!monitor.is_monitoring(1).await);
}

#[tokio::test(start_paused = true)]
async fn restart_keeps_health_history() {
    let start = tokio::time::Instant::now();
    let sender = RecordingSender::failing(0);
    let monitor = monitor(SwitchProber::down(), sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 60, Some(1))).await.unwrap();
    at_minute(start, 1.0).await;
    assert_eq!(monitor.status(1).await.unwrap().consecutive_failures, 1);

    // New interval; the first tick of the new task fires immediately.
    monitor.start_monitor(server(1), check(1, 10, 60, Some(1))).await.unwrap();
    at_minute(start, 1.5).await;

    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.consecutive_failures, 2);
    assert_eq!(status.last_notified_at, Some(base()));
    assert_eq!(sender.attempt_minutes(), vec![0], "cooldown survives restart");
    assert_eq!(monitor.active_monitors().await, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn restart_waits_for_outstanding_probe() {
    let prober = SlowProber::new(Duration::from_secs(8));
    let monitor = monitor(prober.clone(), RecordingSender::failing(0));

    monitor.start_monitor(server(1), check(1, 5, 5, None)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(prober.current.load(Ordering::SeqCst), 1);

    monitor.start_monitor(server(1), check(1, 10, 5, None)).await.unwrap();
    assert_eq!(monitor.status(1).await.unwrap().phase, MonitorPhase::Probing);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(prober.max.load(Ordering::SeqCst), 1);
    assert_eq!(prober.current.load(Ordering::SeqCst), 0);
    let status = monitor.status(1).await.unwrap();
    // The old probe's result lands in the new task; its first tick is skipped.
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.skipped_ticks, 1);
    assert_eq!(status.last_failure_reason.as_deref(), Some("http status 503"));
    monitor.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn restart_waits_for_outstanding_delivery() {
    let sender = RecordingSender::slow(Duration::from_secs(20));
    let monitor = monitor(SwitchProber::down(), sender.clone());

    monitor.start_monitor(server(1), check(1, 5, 60, Some(1))).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sender.attempts().len(), 1);

    // The new task probes at once but the first alert is still on its way.
    monitor.start_monitor(server(1), check(1, 10, 60, Some(1))).await.unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(sender.attempts().len(), 1, "no duplicate alert");
    let status = monitor.status(1).await.unwrap();
    assert_eq!(status.consecutive_failures, 2);
    assert_eq!(status.last_notified_at, Some(base()));
    monitor.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_follows_the_store() {
    let store = StateStore::open_in_memory().unwrap();
    for id in [1, 2] {
        store.put_server(&server(id)).unwrap();
        store.put_health_check(&check(id, 5, 5, None)).unwrap();
    }
    let prober = SwitchProber::down();
    prober.set_up(true);
    let monitor = monitor(prober, RecordingSender::failing(0));

    let report = monitor.reconcile(&store).await.unwrap();
    assert_eq!(report.started, vec![1, 2]);
    assert!(report.restarted.is_empty() && report.stopped.is_empty());

    // Unchanged store: nothing to do.
    assert!(monitor.reconcile(&store).await.unwrap().is_empty());

    store.put_health_check(&check(2, 15, 5, None)).unwrap();
    store.delete_server(1).unwrap();
    store.put_server(&server(3)).unwrap();
    store.put_health_check(&check(3, 5, 5, None)).unwrap();

    let report = monitor.reconcile(&store).await.unwrap();
    assert_eq!(report.started, vec![3]);
    assert_eq!(report.restarted, vec![2]);
    assert_eq!(report.stopped, vec![1]);
    assert_eq!(monitor.active_monitors().await, vec![2, 3]);
    assert_eq!(monitor.status(1).await, None);
}

#[tokio::test(start_paused = true)]
async fn run_reconciles_until_shutdown() {
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    store.put_server(&server(1)).unwrap();
    store.put_health_check(&check(1, 5, 5, None)).unwrap();

    let monitor = monitor(SwitchProber::down(), RecordingSender::failing(0));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let runner = {
        let monitor = monitor.clone();
        let store = store.clone();
        tokio::spawn(async move { monitor.run(store.as_ref(), MINUTE, shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(monitor.is_monitoring(1).await);

    store.put_server(&server(2)).unwrap();
    store.put_health_check(&check(2, 5, 5, None)).unwrap();
    tokio::time::sleep(MINUTE).await;
    assert_eq!(monitor.active_monitors().await, vec![1, 2]);

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap();
    assert!(monitor.active_monitors().await.is_empty());
    assert!(monitor.statuses().await.is_empty());
}
