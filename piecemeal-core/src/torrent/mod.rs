//! Peer-to-peer distribution protocol: codec, metadata, wire format and peers

pub mod bencode;
pub mod bitfield;
pub mod creation;
pub mod peer_pool;
pub mod protocol;
pub mod session;
pub mod tracker;

use std::fmt;

pub use bencode::{BencodeError, BencodeValue};
pub use bitfield::Bitfield;
pub use creation::{DEFAULT_PIECE_LENGTH, MAX_PIECE_LENGTH, MetaData, TorrentCreator};
pub use peer_pool::{ConnectionToken, PeerConnection, PeerPool, PeerSnapshot, PeerTransport};
pub use protocol::{MessageId, PeerHandshake, PeerId, PeerMessage, TcpTransport, WireReader};
pub use session::{
    PeerMessageEvent, PeerSession, SessionContext, accept_loop, accept_peer, connect_peer,
};
pub use tracker::{
    AnnounceEvent, AnnounceRequest, InMemoryPeerDirectory, PeerDirectory, PeerRecord,
};

/// SHA-1 hash identifying a unique shared content item.
///
/// 20-byte SHA-1 hash of the canonically encoded info dictionary.
/// Peers only talk to each other when their info hashes match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the string is not 20 bytes of hex
    pub fn from_hex(hex_str: &str) -> Result<Self, TorrentError> {
        let bytes = hex::decode(hex_str).map_err(|e| TorrentError::ProtocolError {
            message: format!("Invalid info hash hex: {e}"),
        })?;
        let hash: [u8; 20] = bytes
            .try_into()
            .map_err(|_| TorrentError::ProtocolError {
                message: "Info hash must be 20 bytes".to_string(),
            })?;
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Zero-based index of a piece within the shared content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during peer protocol operations.
///
/// Covers metadata encoding, handshake validation, message framing
/// and the underlying transport.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("Failed to parse metadata document: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Piece {index} hash mismatch")]
    PieceHashMismatch { index: PieceIndex },

    #[error("Stream ended early while reading {context}")]
    TruncatedStream { context: &'static str },

    #[error("Handshake info hash mismatch: expected {expected}, got {actual}")]
    HandshakeMismatch {
        expected: InfoHash,
        actual: InfoHash,
    },

    #[error("Malformed peer message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Timed out during {operation}")]
    Timeout { operation: &'static str },

    #[error("Connection limit exceeded")]
    ConnectionLimitExceeded,

    #[error("Peer {peer_id} is not connected")]
    PeerNotFound { peer_id: PeerId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TorrentError {
    /// Maps a read error, turning a short read into `TruncatedStream`.
    pub(crate) fn from_read(error: std::io::Error, context: &'static str) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            TorrentError::TruncatedStream { context }
        } else {
            TorrentError::Io(error)
        }
    }
}
