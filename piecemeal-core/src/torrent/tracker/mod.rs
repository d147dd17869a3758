//! Peer directory: where peers announce themselves and discover each other.
//!
//! The core only defines the storage contract and an in-memory store;
//! HTTP shaping of announce responses lives outside this crate.

pub mod memory;
pub mod types;

// Re-export public API
pub use memory::{InMemoryPeerDirectory, MAX_PEERS_RETURNED, PEER_TTL};
pub use types::{AnnounceEvent, AnnounceRequest, PeerDirectory, PeerRecord};

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::*;
    use crate::config::TrackerConfig;
    use crate::torrent::{InfoHash, PeerId};

    fn request(info_byte: u8, peer_byte: u8, event: AnnounceEvent) -> AnnounceRequest {
        AnnounceRequest {
            info_hash: InfoHash::new([info_byte; 20]),
            peer_id: PeerId::new([peer_byte; 20]),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, peer_byte)),
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 100,
            event,
        }
    }

    #[tokio::test]
    async fn test_announce_then_list_excludes_caller() {
        let directory = InMemoryPeerDirectory::new();
        let info_hash = InfoHash::new([1u8; 20]);

        for peer in 1..=3 {
            directory
                .announce(request(1, peer, AnnounceEvent::Started))
                .await
                .unwrap();
        }
        directory
            .announce(request(2, 9, AnnounceEvent::Started))
            .await
            .unwrap();

        let peers = directory
            .peers(&info_hash, &PeerId::new([2u8; 20]))
            .await
            .unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|p| p.peer_id != PeerId::new([2u8; 20])));
        assert!(peers.iter().all(|p| p.info_hash == info_hash));
        assert_eq!(directory.swarm_size(&info_hash).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_peer_list_is_bounded() {
        let directory = InMemoryPeerDirectory::new();
        for peer in 0..60 {
            directory
                .announce(request(1, peer, AnnounceEvent::Started))
                .await
                .unwrap();
        }

        let peers = directory
            .peers(&InfoHash::new([1u8; 20]), &PeerId::new([0xff; 20]))
            .await
            .unwrap();
        assert_eq!(peers.len(), MAX_PEERS_RETURNED);
    }

    #[tokio::test]
    async fn test_directory_limits_from_config() {
        let config = TrackerConfig {
            peer_ttl: Duration::ZERO,
            max_peers_returned: 2,
        };
        let directory = InMemoryPeerDirectory::from_config(&config);
        let info_hash = InfoHash::new([1u8; 20]);
        for peer in 0..5 {
            directory
                .announce(request(1, peer, AnnounceEvent::Started))
                .await
                .unwrap();
        }

        // Zero ttl means every record is already expired
        let peers = directory
            .peers(&info_hash, &PeerId::new([0xff; 20]))
            .await
            .unwrap();
        assert!(peers.is_empty());

        let config = TrackerConfig {
            max_peers_returned: 2,
            ..TrackerConfig::default()
        };
        let directory = InMemoryPeerDirectory::from_config(&config);
        for peer in 0..5 {
            directory
                .announce(request(1, peer, AnnounceEvent::Started))
                .await
                .unwrap();
        }
        let peers = directory
            .peers(&info_hash, &PeerId::new([0xff; 20]))
            .await
            .unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(directory.swarm_size(&info_hash).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reannounce_refreshes_record() {
        let directory = InMemoryPeerDirectory::new();
        directory
            .announce(request(1, 1, AnnounceEvent::Started))
            .await
            .unwrap();

        let mut completed = request(1, 1, AnnounceEvent::Completed);
        completed.left = 0;
        directory.announce(completed).await.unwrap();

        let info_hash = InfoHash::new([1u8; 20]);
        let peers = directory
            .peers(&info_hash, &PeerId::new([0u8; 20]))
            .await
            .unwrap();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].is_seeder());
        assert_eq!(peers[0].event, AnnounceEvent::Completed);
        assert_eq!(peers[0].address().to_string(), "10.0.0.1:6881");
    }

    #[tokio::test]
    async fn test_stopped_and_remove_drop_records() {
        let directory = InMemoryPeerDirectory::new();
        let info_hash = InfoHash::new([1u8; 20]);
        directory
            .announce(request(1, 1, AnnounceEvent::Started))
            .await
            .unwrap();
        directory
            .announce(request(1, 2, AnnounceEvent::Started))
            .await
            .unwrap();

        directory
            .announce(request(1, 1, AnnounceEvent::Stopped))
            .await
            .unwrap();
        assert_eq!(directory.swarm_size(&info_hash).await.unwrap(), 1);

        directory
            .remove(&info_hash, &PeerId::new([2u8; 20]))
            .await
            .unwrap();
        directory
            .remove(&info_hash, &PeerId::new([2u8; 20]))
            .await
            .unwrap();
        assert_eq!(directory.swarm_size(&info_hash).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_records_are_hidden_and_pruned() {
        let directory = InMemoryPeerDirectory::with_limits(Duration::ZERO, MAX_PEERS_RETURNED);
        let info_hash = InfoHash::new([1u8; 20]);
        directory
            .announce(request(1, 1, AnnounceEvent::Started))
            .await
            .unwrap();

        assert_eq!(directory.swarm_size(&info_hash).await.unwrap(), 0);
        assert!(directory
            .peers(&info_hash, &PeerId::new([0u8; 20]))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(directory.prune_expired(), 1);
        assert_eq!(directory.prune_expired(), 0);
    }

    #[test]
    fn test_peer_record_serializes_for_external_stores() {
        let record = PeerRecord::from_request(
            &request(1, 2, AnnounceEvent::Started),
            chrono::Utc::now(),
        );

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"event\":\"started\""));

        let restored: PeerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
