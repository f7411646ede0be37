//! Wire Protocol Messages
//!
//! Devices send [`ClientRequest`]s; the hub answers each with one
//! [`ServerFrame`]. After a successful `subscribe` the connection turns into a
//! notification stream and only carries `notification` frames from then on.
//!
//! Both enums are internally tagged by `"type"`:
//!
//! ```json
//! {"type":"register","client_id":"alice","device_id":"phone","service_name":"push"}
//! {"type":"ack","success":true,"message":"registered","connection_id":"alice_phone"}
//! ```

use serde::{Deserialize, Serialize};

use crate::messages::OutboundMessage;
use crate::registry::RegistryStats;

/// Request from a device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Register a device for a client
    Register {
        /// Owning client
        client_id: String,
        /// Device within the client
        device_id: String,
        /// Free-form service label
        #[serde(default)]
        service_name: String,
    },

    /// Remove a device
    Unregister {
        /// Owning client
        client_id: String,
        /// Device within the client
        device_id: String,
    },

    /// Turn this connection into the notification stream of a registered device
    Subscribe {
        /// Unique id returned by `register`
        connection_id: String,
    },

    /// Ask for registry counts
    Stats,
}

impl ClientRequest {
    /// Short name for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::Subscribe { .. } => "subscribe",
            Self::Stats => "stats",
        }
    }
}

/// Outcome of a request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the request succeeded
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Unique id of the affected device (empty on failure)
    #[serde(default)]
    pub connection_id: String,
}

impl Ack {
    /// Successful acknowledgement
    #[must_use]
    pub fn ok(message: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            connection_id: connection_id.into(),
        }
    }

    /// Failed acknowledgement
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            connection_id: String::new(),
        }
    }
}

/// Registry counts plus the list of connected clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReply {
    /// Clients with at least one device
    pub client_count: usize,
    /// Registered devices
    pub device_count: usize,
    /// Devices with an attached stream
    pub active_streams: usize,
    /// Client ids
    pub client_ids: Vec<String>,
}

impl StatsReply {
    /// Combine registry counts with a client id list
    #[must_use]
    pub fn new(stats: RegistryStats, mut client_ids: Vec<String>) -> Self {
        client_ids.sort();
        Self {
            client_count: stats.client_count,
            device_count: stats.device_count,
            active_streams: stats.active_streams,
            client_ids,
        }
    }
}

/// Frame sent by the hub
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to register, unregister and subscribe
    Ack(Ack),
    /// Reply to stats
    Stats(StatsReply),
    /// A delivery on a subscribed stream (notification or heartbeat)
    Notification {
        /// The delivery; its own `type` says which kind it is
        payload: OutboundMessage,
    },
}

impl From<OutboundMessage> for ServerFrame {
    fn from(payload: OutboundMessage) -> Self {
        Self::Notification { payload }
    }
}
