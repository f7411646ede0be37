//! Notify Hub Daemon
//!
//! Hosts the core registry behind two listeners:
//!
//! - [`server::WireServer`]: framed TCP protocol devices use to register and
//!   hold a notification stream open
//! - [`http::router`]: authenticated JSON bridge for producers
//!
//! Both share one [`ConnectionRegistry`] and stop together when the shutdown
//! token is cancelled.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod http;
pub mod server;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hub_core::{ConnectionRegistry, HubConfig, NotificationDispatcher, SharedSecret};

pub use http::{router, HttpState};
pub use server::WireServer;

/// Bound listeners plus the state they serve
pub struct Hub {
    registry: ConnectionRegistry,
    dispatcher: NotificationDispatcher,
    secret: SharedSecret,
    max_connections: usize,
    wire_listener: TcpListener,
    http_listener: TcpListener,
}

impl Hub {
    /// Bind both listeners from `config`
    ///
    /// # Errors
    ///
    /// Returns an error if either address cannot be bound.
    pub async fn bind(config: &HubConfig) -> Result<Self> {
        let wire_addr = config.wire_addr();
        let http_addr = config.http_addr();

        let wire_listener = TcpListener::bind(wire_addr)
            .await
            .with_context(|| format!("Failed to bind wire service on {wire_addr}"))?;
        let http_listener = TcpListener::bind(http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP bridge on {http_addr}"))?;

        let secret = SharedSecret::new(config.api_key.clone());
        if !secret.is_configured() {
            warn!("No API key configured (X_API_KEY); every HTTP request will be rejected");
        }

        let registry = ConnectionRegistry::new();
        let dispatcher = NotificationDispatcher::new(registry.clone());

        Ok(Self {
            registry,
            dispatcher,
            secret,
            max_connections: config.max_connections,
            wire_listener,
            http_listener,
        })
    }

    /// The shared registry
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The shared dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Actual wire service address (useful when bound to port 0)
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the socket.
    pub fn wire_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.wire_listener.local_addr()
    }

    /// Actual HTTP bridge address
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the socket.
    pub fn http_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.http_listener.local_addr()
    }

    /// Serve both listeners until `shutdown` is cancelled
    ///
    /// If either listener fails the other is stopped too.
    ///
    /// # Errors
    ///
    /// Returns the first listener error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            registry,
            dispatcher,
            secret,
            max_connections,
            wire_listener,
            http_listener,
        } = self;

        let wire = WireServer::new(registry, max_connections);
        let app = router(HttpState::new(dispatcher, secret));

        let wire_shutdown = shutdown.clone();
        let wire_task = async move {
            let result = wire.run(wire_listener, wire_shutdown.clone()).await;
            wire_shutdown.cancel();
            result
        };

        let http_shutdown = shutdown;
        let http_task = async move {
            if let Ok(addr) = http_listener.local_addr() {
                info!(%addr, "HTTP bridge listening");
            }
            let token = http_shutdown.clone();
            let result = axum::serve(http_listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .context("HTTP bridge failed");
            http_shutdown.cancel();
            info!("HTTP bridge stopped");
            result
        };

        let (wire_result, http_result) = tokio::join!(wire_task, http_task);
        wire_result?;
        http_result?;
        Ok(())
    }
}
