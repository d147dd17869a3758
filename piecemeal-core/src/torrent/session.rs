//! Per-peer session flows: dial or accept, register, then read until closed

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::bitfield::Bitfield;
use super::peer_pool::{ConnectionToken, PeerPool};
use super::protocol::{
    PeerHandshake, PeerId, PeerMessage, WireReader, dial, handshake_inbound, split_tcp,
};
use super::{InfoHash, TorrentError};
use crate::config::NetworkConfig;

/// Message received from a registered peer
#[derive(Debug, Clone)]
pub struct PeerMessageEvent {
    /// Peer that sent the message
    pub peer_id: PeerId,
    /// The decoded wire message
    pub message: PeerMessage,
    /// When this message was received
    pub received_at: Instant,
}

/// Everything a session flow needs, shared by all flows for one content item.
#[derive(Clone)]
pub struct SessionContext {
    pub pool: Arc<PeerPool>,
    pub info_hash: InfoHash,
    pub our_peer_id: PeerId,
    pub piece_count: usize,
    pub config: NetworkConfig,
    events: Option<mpsc::Sender<PeerMessageEvent>>,
}

impl SessionContext {
    pub fn new(
        pool: Arc<PeerPool>,
        info_hash: InfoHash,
        our_peer_id: PeerId,
        piece_count: usize,
        config: NetworkConfig,
    ) -> Self {
        Self {
            pool,
            info_hash,
            our_peer_id,
            piece_count,
            config,
            events: None,
        }
    }

    /// Forwards every received non keep-alive message to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<PeerMessageEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handshake(&self) -> PeerHandshake {
        PeerHandshake::new(self.info_hash, self.our_peer_id)
    }

    async fn ensure_capacity(&self) -> Result<(), TorrentError> {
        if self.pool.len().await >= self.config.max_peer_connections {
            return Err(TorrentError::ConnectionLimitExceeded);
        }
        Ok(())
    }

    fn reject_self(&self, theirs: &PeerHandshake) -> Result<(), TorrentError> {
        if theirs.peer_id == self.our_peer_id {
            return Err(TorrentError::ProtocolError {
                message: "Connected to ourselves".to_string(),
            });
        }
        Ok(())
    }

    /// Registers a handshaken stream and spawns its session flow.
    ///
    /// The connection limit is checked again under the registry lock, since
    /// other flows may have registered while this one was handshaking.
    async fn register(
        &self,
        peer_id: PeerId,
        stream: TcpStream,
    ) -> Result<JoinHandle<TorrentError>, TorrentError> {
        let (reader, transport) = split_tcp(stream, &self.config);
        let token = self
            .pool
            .try_add_connection(
                peer_id,
                Bitfield::new(self.piece_count),
                true,
                true,
                Box::new(transport),
                self.config.max_peer_connections,
            )
            .await?;

        let session = PeerSession::new(peer_id, token, reader, self.clone());
        Ok(tokio::spawn(session.run()))
    }
}

/// Session flow for one registered peer.
///
/// Owns the read half. Each message is recorded in the registry before it
/// is forwarded; any read failure removes the entry and ends the flow.
/// Registry access goes through `token`, so once the entry is replaced this
/// flow can neither update nor remove it.
pub struct PeerSession<R> {
    peer_id: PeerId,
    token: ConnectionToken,
    reader: WireReader<R>,
    context: SessionContext,
}

impl<R> PeerSession<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(
        peer_id: PeerId,
        token: ConnectionToken,
        reader: WireReader<R>,
        context: SessionContext,
    ) -> Self {
        Self {
            peer_id,
            token,
            reader,
            context,
        }
    }

    /// Reads messages until the connection fails or is closed.
    ///
    /// Returns the error that ended the flow. A message the registry entry
    /// rejects, such as a Have past the last piece, ends it too.
    pub async fn run(mut self) -> TorrentError {
        tracing::info!("Session started with peer {}", self.peer_id);

        let reason = loop {
            let message = match self.reader.next_message().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::trace!("Keep-alive from {}", self.peer_id);
                    continue;
                }
                Err(e) => break e,
            };

            if let Err(e) = self
                .context
                .pool
                .record_received_for(&self.peer_id, self.token, &message)
                .await
            {
                break e;
            }

            self.forward(message).await;
        };

        self.context
            .pool
            .remove_connection_if(&self.peer_id, self.token)
            .await;
        tracing::info!("Session with peer {} ended: {}", self.peer_id, reason);
        reason
    }

    async fn forward(&mut self, message: PeerMessage) {
        let Some(events) = &self.context.events else {
            return;
        };

        let event = PeerMessageEvent {
            peer_id: self.peer_id,
            message,
            received_at: Instant::now(),
        };
        if events.send(event).await.is_err() {
            tracing::debug!("Event receiver dropped, no longer forwarding");
            self.context.events = None;
        }
    }
}

/// Dials `address`, handshakes, registers the peer and spawns its session.
///
/// # Errors
///
/// - `TorrentError::ConnectionLimitExceeded` - Registry already at capacity
/// - `TorrentError::ProtocolError` - Remote is ourselves or speaks another protocol
/// - See [`dial`] for connect and handshake failures
pub async fn connect_peer(
    context: &SessionContext,
    address: SocketAddr,
) -> Result<(PeerId, JoinHandle<TorrentError>), TorrentError> {
    context.ensure_capacity().await?;

    let (theirs, stream) = dial(address, &context.handshake(), &context.config).await?;
    context.reject_self(&theirs)?;

    tracing::debug!("Handshake with {} at {} complete", theirs.peer_id, address);
    let session = context.register(theirs.peer_id, stream).await?;
    Ok((theirs.peer_id, session))
}

/// Handshakes an inbound stream, registers the peer and spawns its session.
///
/// # Errors
///
/// - `TorrentError::ConnectionLimitExceeded` - Registry already at capacity
/// - See [`handshake_inbound`] for handshake failures
pub async fn accept_peer(
    context: &SessionContext,
    mut stream: TcpStream,
) -> Result<(PeerId, JoinHandle<TorrentError>), TorrentError> {
    context.ensure_capacity().await?;

    let theirs = handshake_inbound(
        &mut stream,
        &context.handshake(),
        context.config.handshake_timeout,
    )
    .await?;
    context.reject_self(&theirs)?;

    tracing::debug!("Accepted handshake from {}", theirs.peer_id);
    let session = context.register(theirs.peer_id, stream).await?;
    Ok((theirs.peer_id, session))
}

/// Accepts inbound peers forever, handshaking each on its own task.
///
/// `on_accept` runs after a peer is registered, for example to send our
/// bitfield. Individual handshake failures are logged and skipped.
///
/// # Errors
///
/// - `TorrentError::Io` - The listener itself failed
pub async fn accept_loop<F>(
    listener: TcpListener,
    context: SessionContext,
    on_accept: F,
) -> Result<(), TorrentError>
where
    F: Fn(PeerId) + Send + Sync + Clone + 'static,
{
    loop {
        let (stream, address) = listener.accept().await?;
        let context = context.clone();
        let on_accept = on_accept.clone();

        tokio::spawn(async move {
            match accept_peer(&context, stream).await {
                Ok((peer_id, _session)) => on_accept(peer_id),
                Err(e) => tracing::warn!("Rejected inbound peer {}: {}", address, e),
            }
        });
    }
}
