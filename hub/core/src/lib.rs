//! Notify Hub Core - Per-Device Notification Streams
//!
//! This crate holds the transport-independent heart of the hub: a registry of
//! device connections grouped by owning client, stream attachment with
//! per-stream heartbeat supervision, and notification fan-out (targeted and
//! broadcast). The daemon crate wires it to a TCP stream service and an HTTP
//! bridge.
//!
//! # Architecture
//!
//! ```text
//!   HTTP bridge            Wire service (TCP)
//!  (/send, /broadcast)     (register, subscribe, ...)
//!        │                        │
//!        ▼                        ▼
//! ┌──────────────────┐   ┌──────────────────────────┐
//! │ Notification     │──▶│ ConnectionRegistry       │
//! │ Dispatcher       │   │  client ─▶ device ─▶ Conn │
//! └────────┬─────────┘   └────────────┬─────────────┘
//!          │                          │ attach_stream
//!          │ sink.send()              ▼
//!          │                 ┌──────────────────────┐
//!          └────────────────▶│ NotificationSink     │◀── HeartbeatSupervisor
//!                            │ (one per stream)     │    (one per stream)
//!                            └──────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ConnectionRegistry`]: two-tier registry of [`Connection`]s
//! - [`NotificationSink`]: send capability installed on a streaming connection
//! - [`HeartbeatSupervisor`]: liveness task spawned per attached stream
//! - [`NotificationDispatcher`]: targeted and broadcast delivery
//! - [`HubError`]: every failure the core reports
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hub_core::{ChannelSink, ConnectionRegistry, Notification, NotificationDispatcher};
//!
//! let registry = ConnectionRegistry::new();
//! let dispatcher = NotificationDispatcher::new(registry.clone());
//!
//! registry.register("alice", "phone", "push")?;
//! let (sink, mut rx) = ChannelSink::channel(64);
//! let session = registry.attach_stream("alice", "phone", Arc::new(sink))?;
//!
//! dispatcher
//!     .send_to_client(&Notification::new("alice", "Hello", "World", "billing"))
//!     .await?;
//! let delivered = rx.recv().await;
//!
//! registry.end_session(&session);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod messages;
pub mod registry;
pub mod sink;
pub mod test_utils;
pub mod transport;

// Registry exports
pub use connection::{
    unique_id_for, Connection, ConnectionSnapshot, ConnectionState, HeartbeatState, StreamSession,
    UNIQUE_ID_SEPARATOR,
};
pub use registry::{ClientGroup, ConnectionRegistry, RegistryStats};

// Delivery exports
pub use dispatcher::{DispatchCounters, DispatchReport, NotificationDispatcher};
pub use heartbeat::{
    HeartbeatOutcome, HeartbeatSupervisor, HEARTBEAT_INTERVAL, MAX_HEARTBEAT_FAILURES,
};
pub use messages::{MessageKind, Notification, OutboundMessage, HEARTBEAT_SERVICE};
pub use sink::{ChannelSink, NotificationSink, SendError};

// Error exports
pub use error::{HubError, HubResult, NotFoundKind};

// Auth exports
pub use auth::{AuthError, SharedSecret, API_KEY_HEADER};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env,
    ConfigError, ConfigOverrides, ConfigSource, HubConfig, HubToml,
};

// Transport exports
pub use transport::{ClientRequest, ServerFrame, TransportError};
