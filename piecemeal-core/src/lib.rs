//! Piecemeal Core - peer-to-peer file distribution building blocks
//!
//! Bencode codec, content metadata and info hashing, the peer wire protocol
//! and a concurrent registry of peer connections.

pub mod config;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::PiecemealConfig;
pub use torrent::{BencodeError, InfoHash, MetaData, PeerId, PeerPool, TorrentError};

/// Core errors that can bubble up from any Piecemeal subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PiecemealError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BencodeError> for PiecemealError {
    fn from(error: BencodeError) -> Self {
        PiecemealError::Torrent(TorrentError::Bencode(error))
    }
}

impl PiecemealError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            PiecemealError::Torrent(e) => match e {
                TorrentError::InvalidTorrentFile { reason } => {
                    format!("Invalid metadata file: {reason}")
                }
                TorrentError::Bencode(_) => "Metadata file is not valid bencode".to_string(),
                TorrentError::HandshakeMismatch { .. } => {
                    "Peer is sharing different content".to_string()
                }
                TorrentError::Timeout { operation } => format!("Peer timed out during {operation}"),
                TorrentError::ConnectionLimitExceeded => {
                    "Too many peer connections".to_string()
                }
                TorrentError::Io(_) => "Network error occurred".to_string(),
                _ => "Peer protocol error occurred".to_string(),
            },
            PiecemealError::Configuration { reason } => format!("Configuration error: {reason}"),
            PiecemealError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PiecemealError::Configuration { .. }
                | PiecemealError::Torrent(TorrentError::InvalidTorrentFile { .. })
                | PiecemealError::Torrent(TorrentError::Bencode(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, PiecemealError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let error = PiecemealError::from(TorrentError::InvalidTorrentFile {
            reason: "missing info".to_string(),
        });
        assert_eq!(error.user_message(), "Invalid metadata file: missing info");
        assert!(error.is_user_error());

        let error = PiecemealError::from(TorrentError::Timeout {
            operation: "handshake read",
        });
        assert_eq!(error.user_message(), "Peer timed out during handshake read");
        assert!(!error.is_user_error());
    }

    #[test]
    fn test_bencode_errors_are_user_errors() {
        let error = PiecemealError::from(BencodeError::TruncatedStream);
        assert!(matches!(
            error,
            PiecemealError::Torrent(TorrentError::Bencode(_))
        ));
        assert!(error.is_user_error());
    }
}
