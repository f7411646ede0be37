//! Connection Registry - Per-Client Device Connection Management
//!
//! The `ConnectionRegistry` is the single shared mutable structure of the hub.
//! It lets the wire service, the HTTP bridge, the dispatcher and the heartbeat
//! supervisors:
//!
//! - Register and unregister devices, grouped by owning client
//! - Attach and detach notification streams
//! - Resolve a device by `(client_id, device_id)` or by its unique id
//! - Snapshot a client's devices for fan-out
//!
//! # Architecture
//!
//! ```text
//!                       ConnectionRegistry
//!            ┌────────────────────────────────────────┐
//!            │ RwLock<HashMap<ClientId, ClientGroup>> │  outer lock
//!            └───────────────────┬────────────────────┘
//!                                │
//!             ┌──────────────────┼──────────────────┐
//!             │                  │                  │
//!      ┌──────▼──────┐    ┌──────▼──────┐    ┌──────▼──────┐
//!      │ ClientGroup │    │ ClientGroup │    │ ClientGroup │  inner lock each
//!      │   "alice"   │    │    "bob"    │    │    "c1"     │
//!      └──┬───────┬──┘    └──────┬──────┘    └──────┬──────┘
//!         │       │              │                  │
//!      phone   laptop         tablet             desktop      Arc<Connection>
//! ```
//!
//! # Lock Order
//!
//! Outer (registry) before inner (group) before connection fields. No code
//! path takes the outer lock while holding a group lock, and no lock is held
//! across an `.await`: sends always happen on a cloned `Arc<Connection>`
//! after the guards are dropped.
//!
//! A client group never persists empty. Structural changes (group creation,
//! device insertion or removal, group pruning) take the outer lock
//! exclusively; lookups and snapshots take shared locks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::connection::{
    unique_id_for, Connection, ConnectionSnapshot, StreamSession, UNIQUE_ID_SEPARATOR,
};
use crate::error::{HubError, HubResult, NotFoundKind};
use crate::heartbeat::HeartbeatSupervisor;
use crate::sink::NotificationSink;

/// All devices registered by one client
pub struct ClientGroup {
    client_id: String,
    devices: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ClientGroup {
    fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Owning client id
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Look up one device
    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<Arc<Connection>> {
        self.devices.read().get(device_id).cloned()
    }

    /// Snapshot of every device in the group
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Connection>> {
        self.devices.read().values().cloned().collect()
    }

    /// Number of devices in the group
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }
}

impl fmt::Debug for ClientGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let devices = self.devices.read();
        f.debug_struct("ClientGroup")
            .field("client_id", &self.client_id)
            .field("devices", &devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Aggregate registry counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of clients with at least one device
    pub client_count: usize,
    /// Number of registered devices
    pub device_count: usize,
    /// Number of devices with an attached stream
    pub active_streams: usize,
}

/// Registry of device connections grouped by client
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<RwLock<HashMap<String, Arc<ClientGroup>>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device for a client
    ///
    /// Registration is idempotent by identity: if `(client_id, device_id)` is
    /// already known the existing connection is returned, with its service
    /// label refreshed when a different non-empty one is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if either id is empty.
    pub fn register(
        &self,
        client_id: &str,
        device_id: &str,
        service_name: &str,
    ) -> HubResult<Arc<Connection>> {
        if client_id.is_empty() {
            return Err(HubError::missing("client_id"));
        }
        if device_id.is_empty() {
            return Err(HubError::missing("device_id"));
        }

        let mut clients = self.clients.write();
        let group = Arc::clone(clients.entry(client_id.to_string()).or_insert_with(|| {
            tracing::debug!(client_id, "Client group created");
            Arc::new(ClientGroup::new(client_id))
        }));
        let mut devices = group.devices.write();

        if let Some(existing) = devices.get(device_id) {
            if existing.refresh_service_name(service_name) {
                tracing::info!(
                    connection_id = %existing.unique_id(),
                    service_name,
                    "Device re-registered, service name refreshed"
                );
            } else {
                tracing::info!(
                    connection_id = %existing.unique_id(),
                    "Device already registered"
                );
            }
            return Ok(Arc::clone(existing));
        }

        let connection = Arc::new(Connection::new(client_id, device_id, service_name));
        devices.insert(device_id.to_string(), Arc::clone(&connection));

        tracing::info!(
            connection_id = %connection.unique_id(),
            client_id,
            device_id,
            service_name,
            "Device registered"
        );
        Ok(connection)
    }

    /// Unregister a device
    ///
    /// An attached stream is cleared (and its supervisor cancelled) before the
    /// device is removed, so in-flight sends observe it as inactive. A client
    /// left without devices is pruned.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the device is unknown.
    pub fn unregister(&self, client_id: &str, device_id: &str) -> HubResult<()> {
        match self.remove_where(client_id, device_id, |_| true) {
            Some(connection) => {
                tracing::info!(
                    connection_id = %connection.unique_id(),
                    uptime_secs = connection.uptime().as_secs(),
                    "Device unregistered"
                );
                Ok(())
            }
            None => Err(HubError::not_found(
                NotFoundKind::Device,
                unique_id_for(client_id, device_id),
            )),
        }
    }

    /// Remove a connection only if it is still the registered instance and
    /// still streaming session `generation`
    ///
    /// Used by the heartbeat supervisor so a stale supervisor can't evict a
    /// device that was re-registered or re-attached in the meantime.
    pub(crate) fn evict_session(&self, connection: &Arc<Connection>, generation: u64) -> bool {
        self.remove_where(connection.client_id(), connection.device_id(), |current| {
            Arc::ptr_eq(current, connection) && current.clear_stream_if(generation)
        })
        .is_some()
    }

    fn remove_where<F>(
        &self,
        client_id: &str,
        device_id: &str,
        predicate: F,
    ) -> Option<Arc<Connection>>
    where
        F: FnOnce(&Arc<Connection>) -> bool,
    {
        let mut clients = self.clients.write();
        let group = clients.get(client_id).cloned()?;

        let (removed, now_empty) = {
            let mut devices = group.devices.write();
            let current = devices.get(device_id)?;
            if !predicate(current) {
                return None;
            }
            current.clear_stream();
            let removed = devices.remove(device_id);
            (removed, devices.is_empty())
        };

        if now_empty {
            clients.remove(client_id);
            tracing::debug!(client_id, "Client group removed (no devices left)");
        }
        removed
    }

    /// Look up a device by client and device id
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the device is unknown.
    pub fn lookup(&self, client_id: &str, device_id: &str) -> HubResult<Arc<Connection>> {
        let clients = self.clients.read();
        clients
            .get(client_id)
            .and_then(|group| group.device(device_id))
            .ok_or_else(|| {
                HubError::not_found(NotFoundKind::Device, unique_id_for(client_id, device_id))
            })
    }

    /// Look up a device by its unique id
    ///
    /// Each separator position is tried as the client/device boundary, left to
    /// right, against the registry; the first registered match wins.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no registered device derives this id.
    pub fn lookup_by_unique_id(&self, unique_id: &str) -> HubResult<Arc<Connection>> {
        let clients = self.clients.read();
        for (idx, _) in unique_id.match_indices(UNIQUE_ID_SEPARATOR) {
            let client_id = &unique_id[..idx];
            let device_id = &unique_id[idx + UNIQUE_ID_SEPARATOR.len_utf8()..];
            if client_id.is_empty() || device_id.is_empty() {
                continue;
            }
            if let Some(connection) = clients.get(client_id).and_then(|g| g.device(device_id)) {
                return Ok(connection);
            }
        }
        Err(HubError::not_found(NotFoundKind::UniqueId, unique_id))
    }

    /// Snapshot of a client's devices
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the client has no devices.
    pub fn devices_of(&self, client_id: &str) -> HubResult<Vec<Arc<Connection>>> {
        let clients = self.clients.read();
        clients
            .get(client_id)
            .map(|group| group.devices())
            .ok_or_else(|| HubError::not_found(NotFoundKind::Client, client_id))
    }

    /// Ids of every client with at least one device
    #[must_use]
    pub fn client_ids(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    /// Whether a client has any devices
    #[must_use]
    pub fn contains_client(&self, client_id: &str) -> bool {
        self.clients.read().contains_key(client_id)
    }

    /// Aggregate counts
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let clients = self.clients.read();
        let mut stats = RegistryStats {
            client_count: clients.len(),
            ..RegistryStats::default()
        };
        for group in clients.values() {
            let devices = group.devices.read();
            stats.device_count += devices.len();
            stats.active_streams += devices.values().filter(|c| c.is_active()).count();
        }
        stats
    }

    /// Point-in-time view of every registered device
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let clients = self.clients.read();
        clients
            .values()
            .flat_map(|group| group.devices())
            .map(|connection| connection.snapshot())
            .collect()
    }

    /// Attach a notification stream to a registered device
    ///
    /// Installs the sink, resets heartbeat bookkeeping and spawns a heartbeat
    /// supervisor for the new session. A session already attached to the
    /// device is cancelled first (its supervisor stops), then replaced.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if the device is unknown.
    pub fn attach_stream(
        &self,
        client_id: &str,
        device_id: &str,
        sink: Arc<dyn NotificationSink>,
    ) -> HubResult<StreamSession> {
        let connection = self.lookup(client_id, device_id)?;
        let session = connection.install_stream(sink);

        HeartbeatSupervisor::new(self.clone(), Arc::clone(&connection), &session).spawn();

        tracing::info!(
            connection_id = %connection.unique_id(),
            generation = session.generation(),
            "Stream attached"
        );
        Ok(session)
    }

    /// Detach whatever stream is attached to a device
    ///
    /// No-op if the device is unknown or idle.
    pub fn detach_stream(&self, client_id: &str, device_id: &str) {
        if let Ok(connection) = self.lookup(client_id, device_id) {
            if connection.clear_stream() {
                tracing::info!(
                    connection_id = %connection.unique_id(),
                    "Stream detached"
                );
            }
        }
    }

    /// Detach a stream only if `session` is still the device's current one
    ///
    /// Returns true if the session was detached. Called by transports when
    /// their connection closes; a superseded session leaves its replacement
    /// untouched. The session's supervisor is cancelled either way.
    pub fn end_session(&self, session: &StreamSession) -> bool {
        session.cancellation_token().cancel();
        let Ok(connection) = self.lookup(session.client_id(), session.device_id()) else {
            return false;
        };
        let detached = connection.clear_stream_if(session.generation());
        if detached {
            tracing::info!(
                connection_id = %connection.unique_id(),
                generation = session.generation(),
                uptime_secs = connection.uptime().as_secs(),
                "Stream session ended"
            );
        }
        detached
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConnectionRegistry")
            .field("client_count", &stats.client_count)
            .field("device_count", &stats.device_count)
            .field("active_streams", &stats.active_streams)
            .finish()
    }
}
