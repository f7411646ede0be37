//! Frame Protocol
//!
//! Length-prefixed JSON with a CRC32 checksum of the payload.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32, BE      | ClientRequest or ServerFrame             |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! Length counts the payload only. The declared length is checked against
//! [`MAX_FRAME_SIZE`] before any payload bytes are buffered.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::TransportError;

/// Maximum payload size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame header size: 4 bytes length + 4 bytes checksum
const HEADER_SIZE: usize = 8;

const READ_CHUNK: usize = 8 * 1024;

/// Encode a message as one frame
///
/// # Errors
///
/// Returns [`TransportError::Serialization`] if JSON encoding fails and
/// [`TransportError::FrameTooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, TransportError> {
    let json = serde_json::to_vec(msg).map_err(|e| TransportError::Serialization(e.to_string()))?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    // Bounded by MAX_FRAME_SIZE above
    #[allow(clippy::cast_possible_truncation)]
    let len = json.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&crc32fast::hash(&json).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Incremental frame parser over an owned byte buffer
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet decoded
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to decode the next frame
    ///
    /// `Ok(None)` means more bytes are needed. A payload that is intact but
    /// doesn't deserialize as `T` is consumed before the error is returned, so
    /// decoding can continue with the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FrameTooLarge`], [`TransportError::ChecksumMismatch`]
    /// or [`TransportError::Serialization`].
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let Some(header) = self.buffer.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        let frame_end = HEADER_SIZE + len;
        let Some(payload) = self.buffer.get(HEADER_SIZE..frame_end) else {
            return Ok(None);
        };

        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(TransportError::ChecksumMismatch { expected, actual });
        }

        let decoded = serde_json::from_slice(payload);
        self.buffer.drain(..frame_end);
        decoded
            .map(Some)
            .map_err(|e| TransportError::Serialization(e.to_string()))
    }
}

/// Reads frames from an async byte stream
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read the next message
    ///
    /// Returns `Ok(None)` on a clean end of stream (no partial frame buffered).
    ///
    /// # Errors
    ///
    /// Returns decoding errors, I/O errors, or [`TransportError::Truncated`] if
    /// the stream ends inside a frame.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(msg) = self.decoder.decode()? {
                return Ok(Some(msg));
            }
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return match self.decoder.buffered() {
                    0 => Ok(None),
                    buffered => Err(TransportError::Truncated { buffered }),
                };
            }
            self.decoder.push(&chunk[..n]);
        }
    }
}

/// Writes frames to an async byte stream
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode, write and flush one message
    ///
    /// # Errors
    ///
    /// Returns encoding or I/O errors.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let frame = encode(msg)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the underlying shutdown.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        content: String,
        number: u32,
    }

    fn probe(content: &str) -> Probe {
        Probe {
            content: content.to_string(),
            number: 7,
        }
    }

    fn raw_frame(payload: &[u8], checksum: u32) -> Vec<u8> {
        let mut buf = (payload.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&checksum.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_header_layout() {
        let encoded = encode(&probe("hello")).unwrap();
        let len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        let checksum = u32::from_be_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);

        assert_eq!(len, encoded.len() - HEADER_SIZE);
        assert_eq!(checksum, crc32fast::hash(&encoded[HEADER_SIZE..]));
    }

    #[test]
    fn test_decode_byte_by_byte() {
        let encoded = encode(&probe("split")).unwrap();
        let mut decoder = FrameDecoder::new();

        for byte in &encoded[..encoded.len() - 1] {
            decoder.push(std::slice::from_ref(byte));
            assert!(decoder.decode::<Probe>().unwrap().is_none());
        }
        decoder.push(&encoded[encoded.len() - 1..]);
        assert_eq!(decoder.decode::<Probe>().unwrap(), Some(probe("split")));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut bytes = encode(&probe("first")).unwrap();
        bytes.extend(encode(&probe("second")).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);

        assert_eq!(decoder.decode::<Probe>().unwrap(), Some(probe("first")));
        assert_eq!(decoder.decode::<Probe>().unwrap(), Some(probe("second")));
        assert_eq!(decoder.decode::<Probe>().unwrap(), None);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let payload = br#"{"content":"x","number":1}"#;
        let mut decoder = FrameDecoder::new();
        decoder.push(&raw_frame(payload, 0xDEAD_BEEF));

        let err = decoder.decode::<Probe>().unwrap_err();
        assert!(matches!(err, TransportError::ChecksumMismatch { expected: 0xDEAD_BEEF, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_oversize_length_rejected_before_payload() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&((MAX_FRAME_SIZE + 1) as u32).to_be_bytes());
        decoder.push(&[0u8; 4]);

        let err = decoder.decode::<Probe>().unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_encode_oversize_rejected() {
        let big = probe(&"x".repeat(MAX_FRAME_SIZE));
        assert!(matches!(
            encode(&big),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_bad_json_is_skipped() {
        let junk = b"not json";
        let mut bytes = raw_frame(junk, crc32fast::hash(junk));
        bytes.extend(encode(&probe("after")).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);

        let err = decoder.decode::<Probe>().unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(decoder.decode::<Probe>().unwrap(), Some(probe("after")));
    }

    #[tokio::test]
    async fn test_reader_writer_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.send(&probe("one")).await.unwrap();
        writer.send(&probe("two")).await.unwrap();
        drop(writer);

        assert_eq!(reader.next::<Probe>().await.unwrap(), Some(probe("one")));
        assert_eq!(reader.next::<Probe>().await.unwrap(), Some(probe("two")));
        assert_eq!(reader.next::<Probe>().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_truncated_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let encoded = encode(&probe("cut")).unwrap();
        client.write_all(&encoded[..5]).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let err = reader.next::<Probe>().await.unwrap_err();
        assert!(matches!(err, TransportError::Truncated { buffered: 5 }));
    }
}
