//! Length-prefixed message framing

use bytes::{Buf, BufMut, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::PeerMessage;
use crate::torrent::TorrentError;

/// Largest frame accepted by default: a 1 MiB block plus the Piece header.
pub const DEFAULT_MAX_MESSAGE_LEN: u32 = 1_048_576 + 13;

/// Length prefix for a frame carrying an id byte and `payload_len` bytes
fn frame_length(payload_len: usize) -> Result<u32, TorrentError> {
    payload_len
        .checked_add(1)
        .and_then(|length| u32::try_from(length).ok())
        .ok_or_else(|| TorrentError::MalformedMessage {
            reason: format!("Payload of {payload_len} bytes cannot be framed"),
        })
}

/// Message serialization utilities for the peer wire protocol.
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes a frame; `None` is the 4 zero byte keep-alive
    ///
    /// # Errors
    /// - `TorrentError::MalformedMessage` - Payload too large for the 32-bit length prefix
    pub fn serialize_message(message: Option<&PeerMessage>) -> Result<Vec<u8>, TorrentError> {
        let Some(message) = message else {
            return Ok(vec![0u8; 4]);
        };

        let payload = message.payload();
        let length = frame_length(payload.len())?;

        let mut buf = Vec::with_capacity(5 + payload.len());
        buf.put_u32(length);
        buf.put_u8(message.id() as u8);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Deserializes one complete frame held in `data`
    ///
    /// # Errors
    /// - `TorrentError::TruncatedStream` - Buffer shorter than the announced length
    /// - `TorrentError::MalformedMessage` - Unknown id or invalid payload layout
    pub fn deserialize_message(data: &[u8]) -> Result<Option<PeerMessage>, TorrentError> {
        if data.len() < 4 {
            return Err(TorrentError::TruncatedStream {
                context: "message length",
            });
        }

        let mut buf = data;
        let length = buf.get_u32() as usize;

        if length == 0 {
            return Ok(None);
        }

        if buf.len() < length {
            return Err(TorrentError::TruncatedStream {
                context: "message body",
            });
        }

        let id = buf.get_u8();
        let payload = Bytes::copy_from_slice(&buf[..length - 1]);
        PeerMessage::from_parts(id, payload).map(Some)
    }

    /// Reads one frame from the stream; `Ok(None)` is a keep-alive
    ///
    /// # Errors
    /// - `TorrentError::TruncatedStream` - Stream ended inside the frame
    /// - `TorrentError::MalformedMessage` - Frame exceeds `max_len`, unknown id or invalid payload
    /// - `TorrentError::Io` - Underlying read failed
    pub async fn read_message<R>(
        reader: &mut R,
        max_len: u32,
    ) -> Result<Option<PeerMessage>, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let length = reader
            .read_u32()
            .await
            .map_err(|e| TorrentError::from_read(e, "message length"))?;

        if length == 0 {
            return Ok(None);
        }

        Self::read_body(reader, length, max_len).await.map(Some)
    }

    /// Reads the `length` bytes following a non-zero length prefix
    pub(crate) async fn read_body<R>(
        reader: &mut R,
        length: u32,
        max_len: u32,
    ) -> Result<PeerMessage, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        if length > max_len {
            return Err(TorrentError::MalformedMessage {
                reason: format!("Frame of {length} bytes exceeds limit of {max_len}"),
            });
        }

        let mut body = vec![0u8; length as usize];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| TorrentError::from_read(e, "message body"))?;

        let mut body = Bytes::from(body);
        let id = body.get_u8();
        PeerMessage::from_parts(id, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length_fits_prefix() {
        assert_eq!(frame_length(0).unwrap(), 1);
        assert_eq!(frame_length(u32::MAX as usize - 1).unwrap(), u32::MAX);
        assert!(matches!(
            frame_length(u32::MAX as usize),
            Err(TorrentError::MalformedMessage { .. })
        ));
        assert!(frame_length(usize::MAX).is_err());
    }
}
