//! Outbound Send Capability
//!
//! A [`Connection`](crate::Connection) never knows what transport it streams
//! over. It holds an `Arc<dyn NotificationSink>` while streaming, and both the
//! dispatcher and the heartbeat supervisor call [`NotificationSink::send`] on
//! it directly.
//!
//! The sink may be invoked concurrently by the heartbeat supervisor and by
//! dispatch calls; implementations provide their own serialization if the
//! underlying transport needs it. [`ChannelSink`] does so by funnelling every
//! message through an mpsc queue drained by a single writer task.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::OutboundMessage;

/// Why a send over a device's stream failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The receiving end of the stream is gone
    #[error("stream closed")]
    Closed,

    /// The stream's outbound queue is full (the device isn't draining it)
    #[error("stream queue full")]
    Full,

    /// The transport rejected the message
    #[error("transport error: {0}")]
    Transport(String),
}

/// Capability to push messages to one device's stream
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send one message to the device
    async fn send(&self, message: OutboundMessage) -> Result<(), SendError>;
}

/// Sink backed by a bounded mpsc channel
///
/// The wire service owns the receiving half and writes each message to the
/// socket as a frame. Sends never wait: a full queue is reported as
/// [`SendError::Full`], so a stalled device fails its heartbeats instead of
/// blocking dispatch.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ChannelSink {
    /// Wrap an existing sender
    #[must_use]
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving half
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}
