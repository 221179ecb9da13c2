//! Daemon wiring: state store, health monitor and API server.

use std::net::SocketAddr;
use std::sync::Arc;

use fleet_core::{FleetConfig, MonitorTimings};
use fleet_health::{HealthMonitor, HttpProber, LogSender, MonitorOptions};
use fleet_state::StateStore;
use tokio::sync::watch;
use tracing::{info, warn};

pub fn monitor_options(timings: &MonitorTimings) -> MonitorOptions {
    MonitorOptions {
        tick_resolution: timings.tick_resolution,
        probe_timeout: timings.probe_timeout,
        delivery_timeout: timings.delivery_timeout,
    }
}

pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    info!("fleet daemon starting");
    let timings = config.monitor.timings()?;

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.daemon.data_dir)?;
    let db_path = config.daemon.data_dir.join("fleet.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let prober = HttpProber::new()?;
    let monitor = HealthMonitor::new(
        Arc::new(prober),
        Arc::new(LogSender),
        monitor_options(&timings),
    );
    info!(
        tick_resolution = ?timings.tick_resolution,
        probe_timeout = ?timings.probe_timeout,
        "health monitor initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let monitor_handle = {
        let monitor = monitor.clone();
        let store = store.clone();
        let refresh = timings.config_refresh;
        tokio::spawn(async move {
            monitor.run(&store, refresh, shutdown_rx).await;
        })
    };

    // ── Start API server ───────────────────────────────────────

    let router = fleet_api::build_router(store, monitor);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.daemon.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler, running until killed");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the monitor to stop its server tasks.
    let _ = monitor_handle.await;

    info!("fleet daemon stopped");
    Ok(())
}
