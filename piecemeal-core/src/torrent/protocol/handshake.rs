//! Handshake serialization and deserialization

use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{PeerHandshake, PeerId};
use crate::torrent::{InfoHash, TorrentError};

/// Handshake serialization utilities for the peer wire protocol.
pub struct HandshakeCodec;

impl HandshakeCodec {
    /// Serializes handshake: `[len][identifier][reserved][info hash][peer id]`
    pub fn serialize_handshake(handshake: &PeerHandshake) -> Vec<u8> {
        let mut buf = Vec::with_capacity(49 + handshake.protocol.len());

        // Protocol name length, at most 255 by construction
        buf.push(handshake.protocol.len() as u8);

        // Protocol name
        buf.extend_from_slice(handshake.protocol.as_bytes());

        // Reserved bytes
        buf.extend_from_slice(&handshake.reserved);

        // Info hash
        buf.extend_from_slice(handshake.info_hash.as_bytes());

        // Peer ID
        buf.extend_from_slice(handshake.peer_id.as_bytes());

        buf
    }

    /// Deserializes a complete handshake frame
    ///
    /// # Errors
    /// - `TorrentError::TruncatedStream` - Buffer shorter than the frame it announces
    pub fn deserialize_handshake(data: &[u8]) -> Result<PeerHandshake, TorrentError> {
        let Some((&protocol_len, rest)) = data.split_first() else {
            return Err(TorrentError::TruncatedStream {
                context: "handshake",
            });
        };

        let protocol_len = protocol_len as usize;
        if rest.len() < protocol_len + 48 {
            return Err(TorrentError::TruncatedStream {
                context: "handshake",
            });
        }

        Ok(Self::parse_body(protocol_len, rest))
    }

    /// Reads one handshake frame from the stream
    ///
    /// # Errors
    /// - `TorrentError::TruncatedStream` - Stream ended inside the frame
    /// - `TorrentError::Io` - Underlying read failed
    pub async fn read_handshake<R>(reader: &mut R) -> Result<PeerHandshake, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let protocol_len = reader
            .read_u8()
            .await
            .map_err(|e| TorrentError::from_read(e, "handshake"))? as usize;

        let mut body = vec![0u8; protocol_len + 48];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| TorrentError::from_read(e, "handshake"))?;

        Ok(Self::parse_body(protocol_len, &body))
    }

    /// `body` holds everything after the length byte and is long enough
    fn parse_body(protocol_len: usize, body: &[u8]) -> PeerHandshake {
        let protocol = String::from_utf8_lossy(&body[..protocol_len]).to_string();

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&body[protocol_len..protocol_len + 8]);

        let mut info_hash_bytes = [0u8; 20];
        info_hash_bytes.copy_from_slice(&body[protocol_len + 8..protocol_len + 28]);

        let mut peer_id_bytes = [0u8; 20];
        peer_id_bytes.copy_from_slice(&body[protocol_len + 28..protocol_len + 48]);

        PeerHandshake {
            protocol,
            reserved,
            info_hash: InfoHash::new(info_hash_bytes),
            peer_id: PeerId::new(peer_id_bytes),
        }
    }
}
