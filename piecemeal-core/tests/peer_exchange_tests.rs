//! Loopback TCP sessions between two peers sharing the same content.
//!
//! Each test builds metadata in memory, starts a listening peer through the
//! public accept loop and dials it with a second registry.

use std::sync::Arc;
use std::time::Duration;

use piecemeal_core::config::PiecemealConfig;
use piecemeal_core::torrent::{
    Bitfield, MetaData, PeerId, PeerMessage, PeerMessageEvent, PeerPool, PieceIndex,
    SessionContext, TorrentCreator, TorrentError, accept_loop, connect_peer,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn metadata() -> MetaData {
    let content = vec![0xabu8; 40_000];
    TorrentCreator::with_piece_length(16_384)
        .create_from_reader("memory", "shared.bin", content.len() as u64, &content[..])
        .await
        .unwrap()
}

struct Listener {
    context: SessionContext,
    events: mpsc::Receiver<PeerMessageEvent>,
    accepted: mpsc::UnboundedReceiver<PeerId>,
    address: std::net::SocketAddr,
}

async fn start_listener(metadata: &MetaData) -> Listener {
    let config = PiecemealConfig::for_testing();
    let (events_tx, events) = mpsc::channel(16);
    let context = SessionContext::new(
        Arc::new(PeerPool::new()),
        metadata.info_hash(),
        PeerId::generate(),
        metadata.piece_count(),
        config.network,
    )
    .with_events(events_tx);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (accepted_tx, accepted) = mpsc::unbounded_channel();

    tokio::spawn(accept_loop(listener, context.clone(), move |peer_id| {
        let _ = accepted_tx.send(peer_id);
    }));

    Listener {
        context,
        events,
        accepted,
        address,
    }
}

fn dialer_context(metadata: &MetaData) -> SessionContext {
    SessionContext::new(
        Arc::new(PeerPool::new()),
        metadata.info_hash(),
        PeerId::generate(),
        metadata.piece_count(),
        PiecemealConfig::for_testing().network,
    )
}

#[tokio::test]
async fn test_peers_handshake_and_register() {
    let metadata = metadata().await;
    let mut listener = start_listener(&metadata).await;
    let dialer = dialer_context(&metadata);

    let (remote_id, _session) = connect_peer(&dialer, listener.address).await.unwrap();
    assert_eq!(remote_id, listener.context.our_peer_id);
    assert!(dialer.pool.contains(&remote_id).await);

    let accepted = timeout(WAIT, listener.accepted.recv()).await.unwrap().unwrap();
    assert_eq!(accepted, dialer.our_peer_id);
    assert!(listener.context.pool.contains(&accepted).await);

    let snapshot = dialer.pool.snapshot(&remote_id).await.unwrap();
    assert!(snapshot.am_choking);
    assert!(snapshot.is_choking);
    assert_eq!(snapshot.bitfield.count_ones(), 0);
}

#[tokio::test]
async fn test_bitfield_and_have_reach_remote_registry() {
    let metadata = metadata().await;
    let mut listener = start_listener(&metadata).await;
    let dialer = dialer_context(&metadata);

    let (remote_id, _session) = connect_peer(&dialer, listener.address).await.unwrap();
    let dialer_id = timeout(WAIT, listener.accepted.recv()).await.unwrap().unwrap();

    let mut advertised = Bitfield::new(metadata.piece_count());
    advertised.set_piece(PieceIndex::new(0)).unwrap();
    dialer
        .pool
        .send_message(
            &remote_id,
            Some(&PeerMessage::Bitfield {
                bitfield: advertised.to_bytes(),
            }),
        )
        .await
        .unwrap();
    dialer
        .pool
        .send_message(
            &remote_id,
            Some(&PeerMessage::Have {
                piece_index: PieceIndex::new(2),
            }),
        )
        .await
        .unwrap();

    let first = timeout(WAIT, listener.events.recv()).await.unwrap().unwrap();
    assert_eq!(first.peer_id, dialer_id);
    assert!(matches!(first.message, PeerMessage::Bitfield { .. }));
    let second = timeout(WAIT, listener.events.recv()).await.unwrap().unwrap();
    assert_eq!(
        second.message,
        PeerMessage::Have {
            piece_index: PieceIndex::new(2)
        }
    );

    let snapshot = listener.context.pool.snapshot(&dialer_id).await.unwrap();
    assert!(snapshot.bitfield.has_piece(PieceIndex::new(0)));
    assert!(!snapshot.bitfield.has_piece(PieceIndex::new(1)));
    assert!(snapshot.bitfield.has_piece(PieceIndex::new(2)));
    assert_eq!(
        listener
            .context
            .pool
            .peers_with_piece(PieceIndex::new(2))
            .await,
        vec![dialer_id]
    );
}

#[tokio::test]
async fn test_removal_closes_connection_on_both_sides() {
    let metadata = metadata().await;
    let mut listener = start_listener(&metadata).await;
    let dialer = dialer_context(&metadata);

    let (remote_id, session) = connect_peer(&dialer, listener.address).await.unwrap();
    let dialer_id = timeout(WAIT, listener.accepted.recv()).await.unwrap().unwrap();

    assert!(dialer.pool.remove_connection(&remote_id).await);
    let reason = timeout(WAIT, session).await.unwrap().unwrap();
    assert!(matches!(reason, TorrentError::Io(_)));

    // The listener sees the stream end and drops its entry
    timeout(WAIT, async {
        while listener.context.pool.contains(&dialer_id).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_foreign_content_is_rejected() {
    let metadata = metadata().await;
    let mut listener = start_listener(&metadata).await;

    let other = TorrentCreator::with_piece_length(16_384)
        .create_from_reader("memory", "other.bin", 3, &b"xyz"[..])
        .await
        .unwrap();
    let dialer = dialer_context(&other);

    let result = connect_peer(&dialer, listener.address).await;
    assert!(result.is_err());
    assert!(dialer.pool.is_empty().await);
    assert!(listener.context.pool.is_empty().await);
    assert!(
        timeout(Duration::from_millis(200), listener.accepted.recv())
            .await
            .is_err()
    );
}
