//! Core types and enumerations for the peer wire protocol

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::torrent::{InfoHash, PieceIndex, TorrentError};

/// Protocol identifier carried in every handshake.
pub const PROTOCOL_ID: &str = "BitTorrent protocol";

/// Wire size of a handshake with the standard identifier.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// Client prefix stamped on generated peer ids.
pub const DEFAULT_CLIENT_PREFIX: &str = "-PM0001-";

/// Peer identifier.
///
/// 20-byte identifier exchanged in handshakes and used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generate random peer ID for this client.
    pub fn generate() -> Self {
        Self::generate_with_prefix(DEFAULT_CLIENT_PREFIX)
    }

    /// Random peer ID starting with `prefix`, cut to 20 bytes.
    pub fn generate_with_prefix(prefix: &str) -> Self {
        let prefix = &prefix.as_bytes()[..prefix.len().min(20)];
        let mut id = [0u8; 20];
        id[..prefix.len()].copy_from_slice(prefix);
        for byte in &mut id[prefix.len()..] {
            *byte = rand::random();
        }
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Numeric message identifiers, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = TorrentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            _ => {
                return Err(TorrentError::MalformedMessage {
                    reason: format!("Unknown message ID: {value}"),
                });
            }
        })
    }
}

/// Wire protocol messages.
///
/// Every framed message the protocol defines. Keep-alive has no id or
/// payload and is represented as `None` wherever an `Option<PeerMessage>`
/// is read or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Sender will not transmit data to the receiver
    Choke,
    /// Sender is willing to transmit data
    Unchoke,
    /// Sender wants pieces the receiver has
    Interested,
    /// Sender wants nothing from the receiver
    NotInterested,
    /// Sender has completed a piece
    Have {
        /// Index of the completed piece
        piece_index: PieceIndex,
    },
    /// Complete piece availability bitmap, one bit per piece, MSB first
    Bitfield {
        /// Raw bitmap bytes
        bitfield: Bytes,
    },
    /// Request a block of data from a piece
    Request {
        /// Index of the piece to request from
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        /// Number of bytes to request
        length: u32,
    },
    /// A block of piece data
    Piece {
        /// Index of the piece this data belongs to
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        /// The block bytes
        data: Bytes,
    },
    /// Withdraw a previously sent request
    Cancel {
        /// Index of the piece to cancel
        piece_index: PieceIndex,
        /// Byte offset within the piece
        offset: u32,
        /// Number of bytes that were requested
        length: u32,
    },
}

impl PeerMessage {
    pub fn id(&self) -> MessageId {
        match self {
            PeerMessage::Choke => MessageId::Choke,
            PeerMessage::Unchoke => MessageId::Unchoke,
            PeerMessage::Interested => MessageId::Interested,
            PeerMessage::NotInterested => MessageId::NotInterested,
            PeerMessage::Have { .. } => MessageId::Have,
            PeerMessage::Bitfield { .. } => MessageId::Bitfield,
            PeerMessage::Request { .. } => MessageId::Request,
            PeerMessage::Piece { .. } => MessageId::Piece,
            PeerMessage::Cancel { .. } => MessageId::Cancel,
        }
    }

    /// Raw payload bytes following the id byte on the wire.
    pub fn payload(&self) -> Bytes {
        match self {
            PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => Bytes::new(),
            PeerMessage::Have { piece_index } => {
                Bytes::copy_from_slice(&piece_index.as_u32().to_be_bytes())
            }
            PeerMessage::Bitfield { bitfield } => bitfield.clone(),
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            }
            | PeerMessage::Cancel {
                piece_index,
                offset,
                length,
            } => {
                let mut buf = BytesMut::with_capacity(12);
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.put_u32(*length);
                buf.freeze()
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                let mut buf = BytesMut::with_capacity(8 + data.len());
                buf.put_u32(piece_index.as_u32());
                buf.put_u32(*offset);
                buf.extend_from_slice(data);
                buf.freeze()
            }
        }
    }

    /// Builds the typed message from a raw id byte and payload.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MalformedMessage` - Unknown id or payload size does not fit the id
    pub fn from_parts(id: u8, payload: Bytes) -> Result<Self, TorrentError> {
        let id = MessageId::try_from(id)?;
        let mut buf = payload.clone();

        let expect_len = |expected: usize| {
            if payload.len() == expected {
                Ok(())
            } else {
                Err(TorrentError::MalformedMessage {
                    reason: format!(
                        "{id:?} payload must be {expected} bytes, got {}",
                        payload.len()
                    ),
                })
            }
        };

        let message = match id {
            MessageId::Choke => {
                expect_len(0)?;
                PeerMessage::Choke
            }
            MessageId::Unchoke => {
                expect_len(0)?;
                PeerMessage::Unchoke
            }
            MessageId::Interested => {
                expect_len(0)?;
                PeerMessage::Interested
            }
            MessageId::NotInterested => {
                expect_len(0)?;
                PeerMessage::NotInterested
            }
            MessageId::Have => {
                expect_len(4)?;
                PeerMessage::Have {
                    piece_index: PieceIndex::new(buf.get_u32()),
                }
            }
            MessageId::Bitfield => PeerMessage::Bitfield {
                bitfield: payload.clone(),
            },
            MessageId::Request | MessageId::Cancel => {
                expect_len(12)?;
                let piece_index = PieceIndex::new(buf.get_u32());
                let offset = buf.get_u32();
                let length = buf.get_u32();
                if id == MessageId::Request {
                    PeerMessage::Request {
                        piece_index,
                        offset,
                        length,
                    }
                } else {
                    PeerMessage::Cancel {
                        piece_index,
                        offset,
                        length,
                    }
                }
            }
            MessageId::Piece => {
                if payload.len() < 8 {
                    return Err(TorrentError::MalformedMessage {
                        reason: format!(
                            "Piece payload must be at least 8 bytes, got {}",
                            payload.len()
                        ),
                    });
                }
                let piece_index = PieceIndex::new(buf.get_u32());
                let offset = buf.get_u32();
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: buf,
                }
            }
        };

        Ok(message)
    }
}

/// Peer handshake information.
///
/// First frame in each direction. Establishes protocol identity and which
/// content item both ends are talking about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandshake {
    /// Protocol identifier string ("BitTorrent protocol"), at most 255 bytes
    pub(super) protocol: String,
    /// Reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// Info hash of the content being shared
    pub info_hash: InfoHash,
    /// Unique identifier for the peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake with the standard identifier and zeroed reserved bytes.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: PROTOCOL_ID.to_string(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Replaces the protocol identifier.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - Identifier longer than its 1 byte length prefix allows
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Result<Self, TorrentError> {
        let protocol = protocol.into();
        if protocol.len() > u8::MAX as usize {
            return Err(TorrentError::ProtocolError {
                message: format!("Protocol identifier of {} bytes is too long", protocol.len()),
            });
        }
        self.protocol = protocol;
        Ok(self)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Wire form; 68 bytes with the standard identifier.
    pub fn serialize(&self) -> Vec<u8> {
        super::handshake::HandshakeCodec::serialize_handshake(self)
    }

    /// True iff the embedded info hash equals `expected`.
    ///
    /// Identifier and reserved bytes are not inspected.
    pub fn verify(&self, expected: &InfoHash) -> bool {
        self.info_hash == *expected
    }

    pub fn has_standard_protocol(&self) -> bool {
        self.protocol == PROTOCOL_ID
    }
}
