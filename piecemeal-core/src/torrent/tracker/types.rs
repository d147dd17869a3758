//! Core types for the peer directory contract

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::torrent::{InfoHash, PeerId, TorrentError};

/// Announce sent by a peer to the directory.
///
/// Carries the peer's address and transfer statistics for one content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRequest {
    /// Content being announced
    pub info_hash: InfoHash,
    /// Announcing peer
    pub peer_id: PeerId,
    /// Address other peers should dial
    pub ip: IpAddr,
    /// TCP port the peer is listening on
    pub port: u16,
    /// Total bytes uploaded to other peers
    pub uploaded: u64,
    /// Total bytes downloaded from other peers
    pub downloaded: u64,
    /// Bytes remaining to download (0 for seeders)
    pub left: u64,
    /// Current client state for this content
    pub event: AnnounceEvent,
}

/// Announce lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnounceEvent {
    /// Peer started sharing this content
    Started,
    /// Peer stopped sharing; its record is dropped
    Stopped,
    /// Peer finished downloading this content
    Completed,
}

/// Stored state of one announced peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub ip: IpAddr,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
    /// Time of the most recent announce
    pub last_seen: DateTime<Utc>,
}

impl PeerRecord {
    pub fn from_request(request: &AnnounceRequest, last_seen: DateTime<Utc>) -> Self {
        Self {
            info_hash: request.info_hash,
            peer_id: request.peer_id,
            ip: request.ip,
            port: request.port,
            uploaded: request.uploaded,
            downloaded: request.downloaded,
            left: request.left,
            event: request.event,
            last_seen,
        }
    }

    /// Address to dial this peer on.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn is_seeder(&self) -> bool {
        self.left == 0
    }
}

/// Storage contract for announced peers.
///
/// Records expire a fixed time after their last announce. Implementations
/// decide how expiry is enforced; expired records are never returned.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Stores or refreshes the announcing peer's record.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the store rejects the record
    async fn announce(&self, request: AnnounceRequest) -> Result<(), TorrentError>;

    /// Returns live records for `info_hash`, excluding `exclude`, bounded in count.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the store cannot be read
    async fn peers(
        &self,
        info_hash: &InfoHash,
        exclude: &PeerId,
    ) -> Result<Vec<PeerRecord>, TorrentError>;

    /// Counts live records for `info_hash`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the store cannot be read
    async fn swarm_size(&self, info_hash: &InfoHash) -> Result<usize, TorrentError>;

    /// Deletes the record for `peer_id`. An absent record is not an error.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the store rejects the deletion
    async fn remove(&self, info_hash: &InfoHash, peer_id: &PeerId) -> Result<(), TorrentError>;
}
