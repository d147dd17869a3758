//! In-process peer directory

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;

use super::types::{AnnounceEvent, AnnounceRequest, PeerDirectory, PeerRecord};
use crate::config::TrackerConfig;
use crate::torrent::{InfoHash, PeerId, TorrentError};

/// Records stay live this long after their last announce.
pub const PEER_TTL: Duration = Duration::from_secs(1800);

/// Upper bound on records returned by one `peers` call.
pub const MAX_PEERS_RETURNED: usize = 50;

type Swarm = HashMap<PeerId, PeerRecord>;

/// Peer directory held in memory, keyed by content then peer.
///
/// Expired records are filtered on read and dropped by [`Self::prune_expired`].
pub struct InMemoryPeerDirectory {
    swarms: RwLock<HashMap<InfoHash, Swarm>>,
    ttl: TimeDelta,
    max_peers: usize,
}

impl InMemoryPeerDirectory {
    pub fn new() -> Self {
        Self::with_limits(PEER_TTL, MAX_PEERS_RETURNED)
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::with_limits(config.peer_ttl, config.max_peers_returned)
    }

    pub fn with_limits(ttl: Duration, max_peers: usize) -> Self {
        Self {
            swarms: RwLock::new(HashMap::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            max_peers,
        }
    }

    fn is_live(&self, record: &PeerRecord, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(record.last_seen) < self.ttl
    }

    /// Drops expired records and empty swarms; returns how many records were dropped.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut swarms = self.swarms.write();
        let mut dropped = 0;

        swarms.retain(|_, swarm| {
            let before = swarm.len();
            swarm.retain(|_, record| self.is_live(record, now));
            dropped += before - swarm.len();
            !swarm.is_empty()
        });

        if dropped > 0 {
            tracing::debug!("Pruned {} expired peer records", dropped);
        }
        dropped
    }
}

impl Default for InMemoryPeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerDirectory for InMemoryPeerDirectory {
    async fn announce(&self, request: AnnounceRequest) -> Result<(), TorrentError> {
        let mut swarms = self.swarms.write();

        if request.event == AnnounceEvent::Stopped {
            if let Some(swarm) = swarms.get_mut(&request.info_hash) {
                swarm.remove(&request.peer_id);
                if swarm.is_empty() {
                    swarms.remove(&request.info_hash);
                }
            }
            tracing::debug!(
                "Peer {} stopped sharing {}",
                request.peer_id,
                request.info_hash
            );
            return Ok(());
        }

        let record = PeerRecord::from_request(&request, Utc::now());
        swarms
            .entry(request.info_hash)
            .or_default()
            .insert(request.peer_id, record);

        tracing::debug!(
            "Stored peer {} for {} ({:?})",
            request.peer_id,
            request.info_hash,
            request.event
        );
        Ok(())
    }

    async fn peers(
        &self,
        info_hash: &InfoHash,
        exclude: &PeerId,
    ) -> Result<Vec<PeerRecord>, TorrentError> {
        let now = Utc::now();
        let swarms = self.swarms.read();

        let Some(swarm) = swarms.get(info_hash) else {
            return Ok(Vec::new());
        };

        Ok(swarm
            .values()
            .filter(|record| record.peer_id != *exclude && self.is_live(record, now))
            .take(self.max_peers)
            .cloned()
            .collect())
    }

    async fn swarm_size(&self, info_hash: &InfoHash) -> Result<usize, TorrentError> {
        let now = Utc::now();
        Ok(self.swarms.read().get(info_hash).map_or(0, |swarm| {
            swarm
                .values()
                .filter(|record| self.is_live(record, now))
                .count()
        }))
    }

    async fn remove(&self, info_hash: &InfoHash, peer_id: &PeerId) -> Result<(), TorrentError> {
        let mut swarms = self.swarms.write();
        if let Some(swarm) = swarms.get_mut(info_hash) {
            swarm.remove(peer_id);
            if swarm.is_empty() {
                swarms.remove(info_hash);
            }
        }
        Ok(())
    }
}
