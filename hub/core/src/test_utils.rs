//! Test Utilities
//!
//! Provides an in-memory [`NotificationSink`] that records everything it is
//! asked to send and can be switched into a failing mode, so the registry,
//! dispatcher and heartbeat supervisor can be exercised without a transport.
//!
//! # Usage
//!
//! ```ignore
//! use hub_core::test_utils::RecordingSink;
//!
//! let sink = RecordingSink::new();
//! registry.attach_stream("alice", "phone", sink.clone())?;
//!
//! // Simulate a dead transport for heartbeat eviction tests
//! sink.set_failing(true);
//!
//! assert_eq!(sink.notification_count(), 1);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::messages::OutboundMessage;
use crate::sink::{NotificationSink, SendError};

/// Sink that records sent messages and can simulate transport failure
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingSink {
    /// Create a working sink
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a sink whose sends always fail
    #[must_use]
    pub fn failing() -> Arc<Self> {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    /// Switch failure simulation on or off
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every successfully sent message, in order
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Number of send attempts, failed ones included
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of delivered notifications (heartbeats excluded)
    #[must_use]
    pub fn notification_count(&self) -> usize {
        self.sent.lock().iter().filter(|m| !m.is_heartbeat()).count()
    }

    /// Number of delivered heartbeats
    #[must_use]
    pub fn heartbeat_count(&self) -> usize {
        self.sent.lock().iter().filter(|m| m.is_heartbeat()).count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SendError::Transport("simulated failure".to_string()));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}
