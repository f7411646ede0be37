//! Device Connections
//!
//! A [`Connection`] is the server-side record of one device's session. It is
//! created idle when the device registers and becomes *streaming* while a
//! [`NotificationSink`] is attached.
//!
//! # Field synchronization
//!
//! Connections are shared as `Arc<Connection>` and mutated without holding the
//! registry or group locks, so every field group carries its own primitive:
//!
//! | Field group                          | Primitive           |
//! |--------------------------------------|---------------------|
//! | sink + supervisor token + generation | `RwLock<Option<_>>` |
//! | service name                         | `RwLock<String>`    |
//! | notification count                   | `AtomicU64`         |
//! | last notification time               | `Mutex<Option<_>>`  |
//! | heartbeat bookkeeping                | `Mutex<_>`          |
//!
//! The sink and the supervisor token live in the same slot, and "active" is
//! derived from that slot being occupied, so a connection can never be active
//! without a sink or hold a sink while inactive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::sink::NotificationSink;

/// Separator between client id and device id in a unique id
pub const UNIQUE_ID_SEPARATOR: char = '_';

/// Derive the unique id of a `(client_id, device_id)` pair
///
/// The result is not guaranteed to be unambiguous when either id contains the
/// separator; lookups resolve it against the registry instead of parsing it.
#[must_use]
pub fn unique_id_for(client_id: &str, device_id: &str) -> String {
    format!("{client_id}{UNIQUE_ID_SEPARATOR}{device_id}")
}

/// Allocate a process-wide unique session generation
///
/// Generations never repeat, so a session outliving its connection can't
/// match a later connection registered under the same ids.
fn next_session_generation() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Stream attachment state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered, no stream attached
    Registered,
    /// Stream attached and supervised
    Streaming,
}

/// Heartbeat bookkeeping for a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatState {
    /// When the last heartbeat succeeded (or the stream was attached)
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Heartbeat sends that failed in a row
    pub consecutive_failures: u32,
}

/// The occupied stream slot: sink, supervisor token and session generation
struct StreamSlot {
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
    generation: u64,
}

/// One streaming session on a connection
///
/// Returned by [`ConnectionRegistry::attach_stream`](crate::ConnectionRegistry::attach_stream).
/// The holder hands it back to
/// [`ConnectionRegistry::end_session`](crate::ConnectionRegistry::end_session)
/// when its transport closes.
#[derive(Debug, Clone)]
pub struct StreamSession {
    client_id: String,
    device_id: String,
    generation: u64,
    cancel: CancellationToken,
}

impl StreamSession {
    /// Client this session belongs to
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Device this session belongs to
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Session generation on its connection
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Token that stops this session's heartbeat supervisor
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the session has been stopped (detached, superseded or removed)
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Server-side record of one device's session
pub struct Connection {
    unique_id: String,
    client_id: String,
    device_id: String,
    service_name: RwLock<String>,
    connected_at: DateTime<Utc>,
    connected_instant: Instant,
    stream: RwLock<Option<StreamSlot>>,
    notification_count: AtomicU64,
    last_notification_at: Mutex<Option<DateTime<Utc>>>,
    heartbeat: Mutex<HeartbeatState>,
}

impl Connection {
    /// Create an idle connection
    pub(crate) fn new(client_id: &str, device_id: &str, service_name: &str) -> Self {
        Self {
            unique_id: unique_id_for(client_id, device_id),
            client_id: client_id.to_string(),
            device_id: device_id.to_string(),
            service_name: RwLock::new(service_name.to_string()),
            connected_at: Utc::now(),
            connected_instant: Instant::now(),
            stream: RwLock::new(None),
            notification_count: AtomicU64::new(0),
            last_notification_at: Mutex::new(None),
            heartbeat: Mutex::new(HeartbeatState::default()),
        }
    }

    /// Derived `client_id + "_" + device_id` key
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Owning client
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Device identifier within the client
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Free-form service label supplied at registration
    #[must_use]
    pub fn service_name(&self) -> String {
        self.service_name.read().clone()
    }

    /// Replace the service label, returning whether it changed
    pub(crate) fn refresh_service_name(&self, service_name: &str) -> bool {
        if service_name.is_empty() {
            return false;
        }
        let mut current = self.service_name.write();
        if *current == service_name {
            return false;
        }
        *current = service_name.to_string();
        true
    }

    /// When the device registered
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time since registration
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.connected_instant.elapsed()
    }

    /// Whether a stream is attached
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stream.read().is_some()
    }

    /// Current attachment state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.is_active() {
            ConnectionState::Streaming
        } else {
            ConnectionState::Registered
        }
    }

    /// The attached sink, if streaming
    #[must_use]
    pub fn sink(&self) -> Option<Arc<dyn NotificationSink>> {
        self.stream.read().as_ref().map(|slot| Arc::clone(&slot.sink))
    }

    /// Generation of the attached session, if streaming
    #[must_use]
    pub fn session_generation(&self) -> Option<u64> {
        self.stream.read().as_ref().map(|slot| slot.generation)
    }

    /// Number of notifications successfully delivered
    #[must_use]
    pub fn notification_count(&self) -> u64 {
        self.notification_count.load(Ordering::Relaxed)
    }

    /// When the last notification was delivered
    #[must_use]
    pub fn last_notification_at(&self) -> Option<DateTime<Utc>> {
        *self.last_notification_at.lock()
    }

    /// Copy of the heartbeat bookkeeping
    #[must_use]
    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.lock().clone()
    }

    /// Install a sink, replacing and cancelling any previous session
    ///
    /// Heartbeat bookkeeping restarts from now with zero failures.
    pub(crate) fn install_stream(&self, sink: Arc<dyn NotificationSink>) -> StreamSession {
        let generation = next_session_generation();
        let cancel = CancellationToken::new();

        let previous = {
            let mut slot = self.stream.write();
            slot.replace(StreamSlot {
                sink,
                cancel: cancel.clone(),
                generation,
            })
        };
        if let Some(previous) = previous {
            previous.cancel.cancel();
            tracing::info!(
                connection_id = %self.unique_id,
                superseded_generation = previous.generation,
                generation,
                "Superseded existing stream session"
            );
        }

        {
            let mut heartbeat = self.heartbeat.lock();
            heartbeat.last_heartbeat_at = Some(Utc::now());
            heartbeat.consecutive_failures = 0;
        }

        StreamSession {
            client_id: self.client_id.clone(),
            device_id: self.device_id.clone(),
            generation,
            cancel,
        }
    }

    /// Clear the stream slot and stop its supervisor
    ///
    /// Returns true if a stream was attached.
    pub(crate) fn clear_stream(&self) -> bool {
        let slot = self.stream.write().take();
        match slot {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the stream slot only if it still holds the given session
    pub(crate) fn clear_stream_if(&self, generation: u64) -> bool {
        let slot = {
            let mut guard = self.stream.write();
            if guard.as_ref().is_some_and(|s| s.generation == generation) {
                guard.take()
            } else {
                None
            }
        };
        match slot {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Record a successful notification delivery
    pub(crate) fn record_delivery(&self) {
        self.notification_count.fetch_add(1, Ordering::Relaxed);
        *self.last_notification_at.lock() = Some(Utc::now());
    }

    /// Record a successful heartbeat for session `generation`
    ///
    /// Returns false, recording nothing, if that session is no longer attached.
    pub(crate) fn record_heartbeat_success(&self, generation: u64) -> bool {
        let slot = self.stream.read();
        if slot.as_ref().map(|slot| slot.generation) != Some(generation) {
            return false;
        }
        let mut heartbeat = self.heartbeat.lock();
        heartbeat.consecutive_failures = 0;
        heartbeat.last_heartbeat_at = Some(Utc::now());
        true
    }

    /// Record a failed heartbeat for session `generation`
    ///
    /// Returns the consecutive failure count, or `None` if that session is no
    /// longer attached.
    pub(crate) fn record_heartbeat_failure(&self, generation: u64) -> Option<u32> {
        let slot = self.stream.read();
        if slot.as_ref().map(|slot| slot.generation) != Some(generation) {
            return None;
        }
        let mut heartbeat = self.heartbeat.lock();
        heartbeat.consecutive_failures += 1;
        Some(heartbeat.consecutive_failures)
    }

    /// Serializable point-in-time view
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let heartbeat = self.heartbeat_state();
        ConnectionSnapshot {
            unique_id: self.unique_id.clone(),
            client_id: self.client_id.clone(),
            device_id: self.device_id.clone(),
            service_name: self.service_name(),
            state: self.state(),
            connected_at: self.connected_at,
            uptime_secs: self.uptime().as_secs(),
            notification_count: self.notification_count(),
            last_notification_at: self.last_notification_at(),
            last_heartbeat_at: heartbeat.last_heartbeat_at,
            consecutive_heartbeat_failures: heartbeat.consecutive_failures,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("unique_id", &self.unique_id)
            .field("service_name", &*self.service_name.read())
            .field("state", &self.state())
            .field("notification_count", &self.notification_count())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a connection for stats and introspection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    /// Derived unique id
    pub unique_id: String,
    /// Owning client
    pub client_id: String,
    /// Device id
    pub device_id: String,
    /// Service label
    pub service_name: String,
    /// Attachment state
    pub state: ConnectionState,
    /// Registration time
    pub connected_at: DateTime<Utc>,
    /// Seconds since registration
    pub uptime_secs: u64,
    /// Delivered notifications
    pub notification_count: u64,
    /// Last delivery time
    pub last_notification_at: Option<DateTime<Utc>>,
    /// Last successful heartbeat
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Heartbeat failures in a row
    pub consecutive_heartbeat_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    fn sink() -> Arc<dyn NotificationSink> {
        let (sink, _rx) = ChannelSink::channel(4);
        Arc::new(sink)
    }

    #[test]
    fn test_unique_id_format() {
        assert_eq!(unique_id_for("alice", "phone"), "alice_phone");
        let conn = Connection::new("alice", "phone", "push");
        assert_eq!(conn.unique_id(), "alice_phone");
    }

    #[test]
    fn test_new_connection_is_idle() {
        let conn = Connection::new("alice", "phone", "push");
        assert!(!conn.is_active());
        assert!(conn.sink().is_none());
        assert_eq!(conn.state(), ConnectionState::Registered);
        assert_eq!(conn.notification_count(), 0);
        assert!(conn.last_notification_at().is_none());
    }

    #[test]
    fn test_install_and_clear_stream() {
        let conn = Connection::new("alice", "phone", "push");
        let session = conn.install_stream(sink());
        assert!(conn.is_active());
        assert!(conn.sink().is_some());
        assert_eq!(conn.session_generation(), Some(session.generation()));
        assert!(conn.heartbeat_state().last_heartbeat_at.is_some());

        assert!(conn.clear_stream());
        assert!(!conn.is_active());
        assert!(conn.sink().is_none());
        assert!(session.is_cancelled());

        // Second clear is a no-op
        assert!(!conn.clear_stream());
    }

    #[test]
    fn test_reinstall_cancels_previous_session() {
        let conn = Connection::new("alice", "phone", "push");
        let first = conn.install_stream(sink());
        let second = conn.install_stream(sink());

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(second.generation() > first.generation());

        // Stale session cannot clear the new one
        assert!(!conn.clear_stream_if(first.generation()));
        assert!(conn.is_active());
        assert!(conn.clear_stream_if(second.generation()));
        assert!(!conn.is_active());
    }

    #[test]
    fn test_heartbeat_bookkeeping() {
        let conn = Connection::new("alice", "phone", "push");
        let session = conn.install_stream(sink());
        let generation = session.generation();
        assert_eq!(conn.record_heartbeat_failure(generation), Some(1));
        assert_eq!(conn.record_heartbeat_failure(generation), Some(2));
        assert!(conn.record_heartbeat_success(generation));
        assert_eq!(conn.heartbeat_state().consecutive_failures, 0);

        conn.record_heartbeat_failure(generation);
        conn.install_stream(sink());
        assert_eq!(conn.heartbeat_state().consecutive_failures, 0);
    }

    #[test]
    fn test_heartbeat_ignores_superseded_session() {
        let conn = Connection::new("alice", "phone", "push");
        let old = conn.install_stream(sink());
        let new = conn.install_stream(sink());

        assert_eq!(conn.record_heartbeat_failure(old.generation()), None);
        assert!(!conn.record_heartbeat_success(old.generation()));
        assert_eq!(conn.heartbeat_state().consecutive_failures, 0);

        assert_eq!(conn.record_heartbeat_failure(new.generation()), Some(1));
        conn.clear_stream();
        assert_eq!(conn.record_heartbeat_failure(new.generation()), None);
    }

    #[test]
    fn test_record_delivery() {
        let conn = Connection::new("alice", "phone", "push");
        conn.record_delivery();
        conn.record_delivery();
        assert_eq!(conn.notification_count(), 2);
        assert!(conn.last_notification_at().is_some());
    }

    #[test]
    fn test_refresh_service_name() {
        let conn = Connection::new("alice", "phone", "push");
        assert!(!conn.refresh_service_name(""));
        assert!(!conn.refresh_service_name("push"));
        assert!(conn.refresh_service_name("mail"));
        assert_eq!(conn.service_name(), "mail");
    }

    #[test]
    fn test_snapshot_serializes() {
        let conn = Connection::new("alice", "phone", "push");
        let json = serde_json::to_value(conn.snapshot()).unwrap();
        assert_eq!(json["unique_id"], "alice_phone");
        assert_eq!(json["state"], "registered");
    }
}
