//! Heartbeat Supervision for Attached Streams
//!
//! Every attached stream gets its own supervisor task. The supervisor probes
//! the device with a heartbeat message once per [`HEARTBEAT_INTERVAL`] and
//! evicts the device from the registry after [`MAX_HEARTBEAT_FAILURES`]
//! consecutive failed sends.
//!
//! # Protocol
//!
//! 1. The first probe goes out one full interval after attachment
//! 2. On each tick the supervisor checks its session is still the one attached;
//!    if not (detached, superseded, unregistered) it exits quietly
//! 3. A successful send resets the failure count and stamps `last_heartbeat_at`
//! 4. A failed send bumps the failure count; at the threshold the device is
//!    removed from the registry, if it is still the same registered instance
//!    streaming the same session
//! 5. A send that completes after the session was replaced records nothing
//!
//! Firing the session's cancellation token stops the supervisor immediately,
//! including while a probe is in flight.
//!
//! # Usage
//!
//! Supervisors are spawned by
//! [`ConnectionRegistry::attach_stream`](crate::ConnectionRegistry::attach_stream);
//! nothing else needs to start them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::connection::{Connection, StreamSession};
use crate::messages::OutboundMessage;
use crate::registry::ConnectionRegistry;

/// Period between heartbeat probes
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive failed probes before a device is evicted
pub const MAX_HEARTBEAT_FAILURES: u32 = 2;

/// Why a supervisor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The session's cancellation token fired
    Cancelled,
    /// The session was no longer attached
    Inactive,
    /// The device failed too many probes and was removed
    Evicted,
}

/// Liveness task for one streaming session
pub struct HeartbeatSupervisor {
    registry: ConnectionRegistry,
    connection: Arc<Connection>,
    generation: u64,
    cancel: CancellationToken,
    interval: Duration,
}

impl HeartbeatSupervisor {
    /// Create a supervisor for a session on `connection`
    #[must_use]
    pub fn new(
        registry: ConnectionRegistry,
        connection: Arc<Connection>,
        session: &StreamSession,
    ) -> Self {
        Self {
            registry,
            connection,
            generation: session.generation(),
            cancel: session.cancellation_token().clone(),
            interval: HEARTBEAT_INTERVAL,
        }
    }

    /// Override the probe period
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the supervisor onto the current runtime
    pub fn spawn(self) -> JoinHandle<HeartbeatOutcome> {
        let span = tracing::info_span!(
            "heartbeat",
            connection_id = %self.connection.unique_id(),
            generation = self.generation
        );
        tokio::spawn(self.run().instrument(span))
    }

    /// Run until cancelled, superseded or evicted
    pub async fn run(self) -> HeartbeatOutcome {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            interval_secs = self.interval.as_secs(),
            max_failures = MAX_HEARTBEAT_FAILURES,
            "Heartbeat supervisor started"
        );

        let outcome = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break HeartbeatOutcome::Cancelled,
                _ = ticker.tick() => {
                    if let Some(outcome) = self.beat().await {
                        break outcome;
                    }
                }
            }
        };

        tracing::debug!(?outcome, "Heartbeat supervisor stopped");
        outcome
    }

    /// One probe; `Some` means the supervisor should stop
    async fn beat(&self) -> Option<HeartbeatOutcome> {
        if self.connection.session_generation() != Some(self.generation) {
            return Some(HeartbeatOutcome::Inactive);
        }
        let Some(sink) = self.connection.sink() else {
            return Some(HeartbeatOutcome::Inactive);
        };

        let probe = OutboundMessage::heartbeat(self.connection.unique_id());
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Some(HeartbeatOutcome::Cancelled),
            result = sink.send(probe) => result,
        };

        match result {
            Ok(()) => {
                if !self.connection.record_heartbeat_success(self.generation) {
                    return Some(HeartbeatOutcome::Inactive);
                }
                tracing::trace!("Heartbeat delivered");
                None
            }
            Err(e) => {
                let Some(failures) = self.connection.record_heartbeat_failure(self.generation)
                else {
                    return Some(HeartbeatOutcome::Inactive);
                };
                tracing::warn!(
                    error = %e,
                    failures,
                    max_failures = MAX_HEARTBEAT_FAILURES,
                    "Heartbeat failed"
                );
                if failures < MAX_HEARTBEAT_FAILURES {
                    return None;
                }
                if !self.registry.evict_session(&self.connection, self.generation) {
                    return Some(HeartbeatOutcome::Inactive);
                }
                tracing::warn!(
                    client_id = %self.connection.client_id(),
                    device_id = %self.connection.device_id(),
                    "Device evicted after consecutive heartbeat failures"
                );
                Some(HeartbeatOutcome::Evicted)
            }
        }
    }
}

impl std::fmt::Debug for HeartbeatSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatSupervisor")
            .field("connection_id", &self.connection.unique_id())
            .field("generation", &self.generation)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
