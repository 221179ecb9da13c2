//! fleetd — the relay fleet daemon.
//!
//! Single binary that assembles the fleet subsystems:
//! - State store (redb)
//! - Health monitor (per-server probes and alerts)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleet/fleet.toml
//! fleetd run --port 8080 --data-dir /var/lib/fleet
//! fleetd default-config > fleet.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fleet_core::{FleetConfig, LogConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "VPN relay fleet daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the health monitor and API server.
    Run {
        /// Path to fleet.toml. Built-in defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => FleetConfig::from_file(&path)?,
                None => FleetConfig::default(),
            };
            if let Some(port) = port {
                config.daemon.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.daemon.data_dir = data_dir;
            }

            init_tracing(&config.log)?;
            daemon::run(config).await
        }
        Command::DefaultConfig => {
            print!("{}", FleetConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

/// Initialize tracing. `RUST_LOG` wins over the configured filter.
fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
