//! Wire Transport for Device Streams
//!
//! Devices talk to the hub over plain TCP using length-prefixed JSON frames
//! with a CRC32 checksum (see [`frame`]). The message vocabulary lives in
//! [`protocol`]; the accept loop and per-connection handling live in the
//! daemon crate.

pub mod frame;
pub mod protocol;

use thiserror::Error;

pub use frame::{encode, FrameDecoder, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use protocol::{Ack, ClientRequest, ServerFrame, StatsReply};

/// Errors raised while reading or writing frames
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame declared or produced a payload over the limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Payload size in bytes
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Payload bytes did not match the header checksum
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum from the frame header
        expected: u32,
        /// Checksum of the received payload
        actual: u32,
    },

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The peer closed the connection in the middle of a frame
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    Truncated {
        /// Bytes left undecoded
        buffered: usize,
    },
}

impl TransportError {
    /// Whether the stream can't be resynchronized after this error
    ///
    /// Everything except a payload that failed to deserialize is fatal: the
    /// decoder has skipped an undecodable-but-well-framed payload and can keep
    /// going, but a bad header leaves no way to find the next frame.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Serialization(_))
    }
}
