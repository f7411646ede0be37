//! Wire Service
//!
//! TCP accept loop for device connections:
//! - One handler task per accepted connection
//! - Requests are framed [`ClientRequest`]s, each answered with one [`ServerFrame`]
//! - `subscribe` turns the connection into that device's notification stream
//!   until the socket closes, the session is superseded, or the device is
//!   removed
//! - Shutdown is signalled through a [`CancellationToken`]; handlers finish
//!   before [`WireServer::run`] returns
//!
//! ```text
//!                      WireServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!       peer-1          peer-2          peer-3
//!    (requests)       (stream)        (stream)
//!          │               │               │
//!          └───────────────┴───────────────┘
//!                          │
//!                 ConnectionRegistry
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashSet;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use hub_core::transport::{Ack, FrameReader, FrameWriter, StatsReply};
use hub_core::{
    ChannelSink, ClientRequest, Connection, ConnectionRegistry, OutboundMessage, ServerFrame,
    StreamSession, TransportError,
};

/// Capacity of each stream's outbound queue
pub const STREAM_CHANNEL_CAPACITY: usize = 256;

/// The TCP wire service
pub struct WireServer {
    registry: ConnectionRegistry,
    max_connections: usize,
    /// Ids of peers with a live handler, counted against `max_connections`
    peers: Arc<DashSet<u64>>,
    next_peer_id: AtomicU64,
}

impl WireServer {
    /// Create a server over `registry`
    #[must_use]
    pub fn new(registry: ConnectionRegistry, max_connections: usize) -> Self {
        Self {
            registry,
            max_connections,
            peers: Arc::new(DashSet::new()),
            next_peer_id: AtomicU64::new(1),
        }
    }

    /// Number of live peers
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Accept connections until `shutdown` fires, then drain handlers
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged and skipped.
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Wire service listening");
        }

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection handler panicked");
                        }
                    }
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    if self.peers.len() >= self.max_connections {
                        warn!(%addr, max = self.max_connections, "Connection limit reached, rejecting");
                        drop(stream);
                        continue;
                    }

                    let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
                    self.peers.insert(peer_id);
                    info!(
                        peer_id,
                        %addr,
                        active_connections = self.peers.len(),
                        "New connection accepted"
                    );

                    let handler = PeerHandler {
                        registry: self.registry.clone(),
                        shutdown: shutdown.child_token(),
                    };
                    let peers = Arc::clone(&self.peers);
                    handlers.spawn(
                        async move {
                            handler.handle(stream).await;
                            peers.remove(&peer_id);
                            info!(active_connections = peers.len(), "Connection handler finished");
                        }
                        .instrument(tracing::info_span!("connection", peer_id, %addr)),
                    );
                }
            }
        }

        info!(pending = handlers.len(), "Waiting for connection handlers");
        while handlers.join_next().await.is_some() {}
        info!("Wire service stopped");
        Ok(())
    }
}

/// Drives one accepted connection
struct PeerHandler {
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
}

impl PeerHandler {
    async fn handle(&self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);

        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = reader.next::<ClientRequest>() => next,
            };

            let request = match next {
                Ok(Some(request)) => request,
                Ok(None) => {
                    info!("Client disconnected (EOF)");
                    break;
                }
                Err(e) if !e.is_fatal() => {
                    warn!(error = %e, "Rejected malformed request");
                    let ack = Ack::failed(format!("invalid request: {e}"));
                    if !reply(&mut writer, ServerFrame::Ack(ack)).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Closing connection on transport error");
                    break;
                }
            };

            debug!(request = request.kind(), "Received request");
            if let ClientRequest::Subscribe { connection_id } = request {
                // The connection belongs to the stream from here on
                self.subscribe(&connection_id, reader, writer).await;
                return;
            }

            let frame = self.handle_request(request);
            if !reply(&mut writer, frame).await {
                break;
            }
        }

        let _ = writer.shutdown().await;
    }

    /// Answer a non-streaming request
    fn handle_request(&self, request: ClientRequest) -> ServerFrame {
        let ack = match request {
            ClientRequest::Register {
                client_id,
                device_id,
                service_name,
            } => match self.registry.register(&client_id, &device_id, &service_name) {
                Ok(connection) => Ack::ok("Device registered", connection.unique_id()),
                Err(e) => Ack::failed(e.to_string()),
            },
            ClientRequest::Unregister {
                client_id,
                device_id,
            } => match self.registry.unregister(&client_id, &device_id) {
                Ok(()) => Ack::ok(
                    "Device unregistered",
                    hub_core::unique_id_for(&client_id, &device_id),
                ),
                Err(e) => Ack::failed(e.to_string()),
            },
            ClientRequest::Stats => {
                let reply = StatsReply::new(self.registry.stats(), self.registry.client_ids());
                return ServerFrame::Stats(reply);
            }
            ClientRequest::Subscribe { .. } => Ack::failed("subscribe must be handled as a stream"),
        };
        ServerFrame::Ack(ack)
    }

    /// Attach this connection as a device stream and pump it until it ends
    ///
    /// A refused subscription is acknowledged as failed and the connection is
    /// closed either way.
    async fn subscribe(
        &self,
        connection_id: &str,
        mut reader: FrameReader<OwnedReadHalf>,
        mut writer: FrameWriter<OwnedWriteHalf>,
    ) {
        match self.registry.lookup_by_unique_id(connection_id) {
            Ok(connection) => {
                self.stream(&connection, &mut reader, &mut writer).await;
            }
            Err(e) => {
                warn!(connection_id, error = %e, "Subscribe for unknown connection");
                let _ = writer.send(&ServerFrame::Ack(Ack::failed(e.to_string()))).await;
            }
        }
        let _ = writer.shutdown().await;
    }

    /// Attach, acknowledge, then pump until the stream ends
    async fn stream(
        &self,
        connection: &Connection,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut FrameWriter<OwnedWriteHalf>,
    ) {
        let (sink, rx) = ChannelSink::channel(STREAM_CHANNEL_CAPACITY);
        let session = match self.registry.attach_stream(
            connection.client_id(),
            connection.device_id(),
            Arc::new(sink),
        ) {
            Ok(session) => session,
            Err(e) => {
                let _ = writer.send(&ServerFrame::Ack(Ack::failed(e.to_string()))).await;
                return;
            }
        };

        let ack = Ack::ok("Subscribed", connection.unique_id());
        if let Err(e) = writer.send(&ServerFrame::Ack(ack)).await {
            warn!(error = %e, "Failed to acknowledge subscribe");
            self.registry.end_session(&session);
            return;
        }

        info!(connection_id = %connection.unique_id(), "Streaming notifications");
        let reason = self.pump(&session, reader, writer, rx).await;
        self.registry.end_session(&session);
        info!(connection_id = %connection.unique_id(), reason, "Stream closed");
    }

    /// Forward queued deliveries to the socket until something ends the stream
    async fn pump(
        &self,
        session: &StreamSession,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut FrameWriter<OwnedWriteHalf>,
        mut rx: mpsc::Receiver<OutboundMessage>,
    ) -> &'static str {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return "shutdown",
                () = session.cancellation_token().cancelled() => return "session ended",
                message = rx.recv() => {
                    let Some(message) = message else {
                        return "sink dropped";
                    };
                    if let Err(e) = writer.send(&ServerFrame::from(message)).await {
                        warn!(error = %e, "Write error");
                        return "write error";
                    }
                }
                incoming = reader.next::<ClientRequest>() => {
                    match incoming {
                        Ok(None) => return "peer closed",
                        Ok(Some(request)) => {
                            debug!(request = request.kind(), "Ignoring request on streaming connection");
                        }
                        Err(e) if !e.is_fatal() => debug!(error = %e, "Ignoring malformed frame"),
                        Err(e) => {
                            warn!(error = %e, "Read error");
                            return "read error";
                        }
                    }
                }
            }
        }
    }
}

/// Write a reply; false means the connection is unusable
async fn reply(writer: &mut FrameWriter<OwnedWriteHalf>, frame: ServerFrame) -> bool {
    match writer.send(&frame).await {
        Ok(()) => true,
        Err(TransportError::FrameTooLarge { size, max }) => {
            warn!(size, max, "Reply too large, dropping");
            true
        }
        Err(e) => {
            warn!(error = %e, "Write error");
            false
        }
    }
}
