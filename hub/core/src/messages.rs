//! Hub Messages
//!
//! [`Notification`] is what producers hand to the dispatcher. It never gets
//! stored: it lives for the duration of one dispatch call. Each delivery to a
//! device is an [`OutboundMessage`], which stamps the receiving device's unique
//! id and distinguishes real notifications from heartbeat probes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service label used for heartbeat probes
pub const HEARTBEAT_SERVICE: &str = "system";

/// A notification to fan out to one client's devices or to everyone
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification identifier
    pub id: String,
    /// Target client (empty for broadcast)
    #[serde(default)]
    pub client_id: String,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Label of the service that produced this notification
    pub service_name: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

impl Notification {
    /// Create a notification targeted at one client, stamped now
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("notif_{}", Uuid::new_v4().simple()),
            client_id: client_id.into(),
            title: title.into(),
            message: message.into(),
            service_name: service_name.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Create a broadcast notification (no target client), stamped now
    #[must_use]
    pub fn broadcast(
        title: impl Into<String>,
        message: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self::new(String::new(), title, message, service_name)
    }

    /// Copy of this notification addressed to a specific client
    #[must_use]
    pub fn for_client(&self, client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            ..self.clone()
        }
    }

    /// Render the per-device delivery for the given connection
    #[must_use]
    pub fn to_outbound(&self, connection_id: &str) -> OutboundMessage {
        OutboundMessage {
            id: self.id.clone(),
            connection_id: connection_id.to_string(),
            title: self.title.clone(),
            message: self.message.clone(),
            service_name: self.service_name.clone(),
            timestamp: self.timestamp,
            kind: MessageKind::Notification,
        }
    }
}

/// What an outbound message carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A real notification
    #[default]
    Notification,
    /// A liveness probe from the heartbeat supervisor
    Heartbeat,
}

/// A single delivery over a device's stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Notification or heartbeat identifier
    pub id: String,
    /// Unique id of the receiving connection
    pub connection_id: String,
    /// Title
    pub title: String,
    /// Body
    pub message: String,
    /// Originating service label
    pub service_name: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// Message kind, serialized as `"type"`
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

impl OutboundMessage {
    /// Build a heartbeat probe for the given connection
    #[must_use]
    pub fn heartbeat(connection_id: &str) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: format!("heartbeat_{now}"),
            connection_id: connection_id.to_string(),
            title: "heartbeat".to_string(),
            message: "ping".to_string(),
            service_name: HEARTBEAT_SERVICE.to_string(),
            timestamp: now,
            kind: MessageKind::Heartbeat,
        }
    }

    /// Whether this is a heartbeat probe
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.kind == MessageKind::Heartbeat
    }
}
