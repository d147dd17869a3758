//! Centralized configuration for Piecemeal.
//!
//! Every tunable deadline, limit and default lives here so the protocol and
//! registry code never hard-codes them.

use std::time::Duration;

use crate::torrent::DEFAULT_PIECE_LENGTH;
use crate::torrent::PeerId;
use crate::torrent::protocol::{DEFAULT_CLIENT_PREFIX, DEFAULT_MAX_MESSAGE_LEN};

/// Central configuration for all Piecemeal components.
///
/// Groups related settings into sections and supports environment
/// variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct PiecemealConfig {
    pub torrent: TorrentConfig,
    pub network: NetworkConfig,
    pub tracker: TrackerConfig,
}

/// Content and metadata settings.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// Prefix of generated peer ids
    pub client_id: String,
    /// Piece length used when creating metadata
    pub default_piece_length: u32,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_PREFIX.to_string(),
            default_piece_length: DEFAULT_PIECE_LENGTH,
        }
    }
}

impl TorrentConfig {
    /// Fresh random peer id carrying `client_id` as its prefix.
    pub fn generate_peer_id(&self) -> PeerId {
        PeerId::generate_with_prefix(&self.client_id)
    }
}

/// Peer connection deadlines and limits.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// TCP connect deadline for outbound peers
    pub connect_timeout: Duration,
    /// Deadline for each handshake read and write
    pub handshake_timeout: Duration,
    /// Deadline for each message length read, body read and frame write
    pub message_timeout: Duration,
    /// Largest accepted frame length
    pub max_message_len: u32,
    /// Maximum concurrent peer connections
    pub max_peer_connections: usize,
    /// Port the `serve` command listens on
    pub listen_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            message_timeout: Duration::from_secs(180), // Well above the 2 minute keep-alive interval
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_peer_connections: 50,
            listen_port: 6881,
        }
    }
}

/// Peer directory settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long an announced record stays live
    pub peer_ttl: Duration,
    /// Upper bound on records returned per peer list
    pub max_peers_returned: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            peer_ttl: Duration::from_secs(1800), // 30 minutes
            max_peers_returned: 50,
        }
    }
}

impl PiecemealConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept. Timeouts are
    /// given in seconds.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(length) = env_parse::<u32>("PIECEMEAL_PIECE_LENGTH")
            && length > 0
        {
            config.torrent.default_piece_length = length;
        }

        if let Ok(client_id) = std::env::var("PIECEMEAL_CLIENT_ID")
            && !client_id.is_empty()
        {
            config.torrent.client_id = client_id;
        }

        if let Some(seconds) = env_parse::<u64>("PIECEMEAL_HANDSHAKE_TIMEOUT") {
            config.network.handshake_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("PIECEMEAL_MESSAGE_TIMEOUT") {
            config.network.message_timeout = Duration::from_secs(seconds);
        }

        if let Some(count) = env_parse::<usize>("PIECEMEAL_MAX_PEERS") {
            config.network.max_peer_connections = count;
        }

        if let Some(port) = env_parse::<u16>("PIECEMEAL_LISTEN_PORT") {
            config.network.listen_port = port;
        }

        config
    }

    /// Creates a configuration with short deadlines for tests.
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                connect_timeout: Duration::from_secs(2),
                handshake_timeout: Duration::from_secs(2),
                message_timeout: Duration::from_secs(5),
                max_peer_connections: 8,
                listen_port: 0,
                ..NetworkConfig::default()
            },
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", name, value);
            None
        }
    }
}
