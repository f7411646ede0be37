//! Notify Hub - Per-Device Notification Streams
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (wire 50051, HTTP 8080)
//! X_API_KEY=secret notify-hub
//!
//! # Custom ports
//! notify-hub --port 6000 --http-port 6001
//!
//! # With config file
//! notify-hub --config /etc/notify-hub/hub.toml
//!
//! # Verbose logging
//! RUST_LOG=debug notify-hub
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hub_core::{load_config, load_config_from_path, ConfigOverrides};
use hub_daemon::Hub;

/// Notify Hub - per-device notification streams with heartbeat supervision
#[derive(Parser, Debug)]
#[command(name = "notify-hub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "NOTIFY_HUB_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address both listeners bind to
    #[arg(long, value_name = "ADDR")]
    bind_addr: Option<IpAddr>,

    /// Wire service port
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// HTTP bridge port
    #[arg(long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Maximum concurrent wire connections
    #[arg(long, value_name = "N")]
    max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "NOTIFY_HUB_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(addr) = self.bind_addr {
            overrides = overrides.with_bind_addr(addr);
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        if let Some(port) = self.http_port {
            overrides = overrides.with_http_port(port);
        }
        if let Some(max) = self.max_connections {
            overrides = overrides.with_max_connections(max);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("hub_daemon={level},hub_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                info!("Received SIGINT, initiating shutdown");
            }
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Received Ctrl-C, initiating shutdown");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Notify hub starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match args.config.clone() {
        Some(path) => load_config_from_path(Some(path)),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = %config.source(),
        wire_addr = %config.wire_addr(),
        http_addr = %config.http_addr(),
        max_connections = config.max_connections,
        "Configuration resolved"
    );

    let hub = Hub::bind(&config).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Signal handling failed");
        }
        signal_token.cancel();
    });

    match hub.run(shutdown).await {
        Ok(()) => {
            info!("Notify hub stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Notify hub stopped with error");
            Err(e)
        }
    }
}
