//! Registry of active peer connections shared by every session flow

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::bitfield::Bitfield;
use super::protocol::{MessageCodec, PeerId, PeerMessage};
use super::{PieceIndex, TorrentError};

/// Outbound half of a peer connection.
///
/// The registry entry owns its transport exclusively; closing it is the
/// only way to cancel the session flow reading from the same connection.
#[async_trait]
pub trait PeerTransport: Send {
    /// Writes one complete serialized frame.
    async fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Closes the connection. Calling it again has no effect.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Identifies one registration of a peer id.
///
/// Every insert gets a fresh token, so a flow holding the token of a
/// replaced entry can no longer touch the entry that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionToken(u64);

/// Per-session state held in the registry.
pub struct PeerConnection {
    token: ConnectionToken,
    transport: Box<dyn PeerTransport>,
    /// Pieces the remote peer has advertised
    pub bitfield: Bitfield,
    /// We refuse to send data to the remote peer
    pub am_choking: bool,
    /// The remote peer refuses to send data to us
    pub is_choking: bool,
}

impl PeerConnection {
    fn new(
        token: ConnectionToken,
        bitfield: Bitfield,
        am_choking: bool,
        is_choking: bool,
        transport: Box<dyn PeerTransport>,
    ) -> Self {
        Self {
            token,
            transport,
            bitfield,
            am_choking,
            is_choking,
        }
    }

    pub fn token(&self) -> ConnectionToken {
        self.token
    }

    /// Updates recorded state for a message received from the peer.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MalformedMessage` - Have or Bitfield does not fit the piece count;
    ///   recorded state is left unchanged
    pub fn apply_received(&mut self, message: &PeerMessage) -> Result<(), TorrentError> {
        match message {
            PeerMessage::Choke => self.is_choking = true,
            PeerMessage::Unchoke => self.is_choking = false,
            PeerMessage::Have { piece_index } => self.bitfield.set_piece(*piece_index)?,
            PeerMessage::Bitfield { bitfield } => {
                self.bitfield = Bitfield::from_payload(bitfield, self.bitfield.piece_count())?;
            }
            PeerMessage::Interested
            | PeerMessage::NotInterested
            | PeerMessage::Request { .. }
            | PeerMessage::Piece { .. }
            | PeerMessage::Cancel { .. } => {}
        }
        Ok(())
    }

    /// Updates recorded state for a message we sent to the peer.
    pub fn apply_sent(&mut self, message: &PeerMessage) {
        match message {
            PeerMessage::Choke => self.am_choking = true,
            PeerMessage::Unchoke => self.am_choking = false,
            _ => {}
        }
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            bitfield: self.bitfield.clone(),
            am_choking: self.am_choking,
            is_choking: self.is_choking,
        }
    }

    async fn send_frame(&mut self, frame: &[u8], message: Option<&PeerMessage>) -> io::Result<()> {
        self.transport.send(frame).await?;
        if let Some(message) = message {
            self.apply_sent(message);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.transport.close();
    }
}

/// Consistent copy of one entry's state taken under the registry lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub bitfield: Bitfield,
    pub am_choking: bool,
    pub is_choking: bool,
}

/// Registry mapping peer id to its live connection.
///
/// One lock guards the whole map. Every operation, including traversals,
/// holds it for its full duration, and per-entry state is only touched
/// under it.
#[derive(Default)]
pub struct PeerPool {
    connections: Mutex<HashMap<PeerId, PeerConnection>>,
    next_token: AtomicU64,
}

impl PeerPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_token(&self) -> ConnectionToken {
        ConnectionToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a connection, closing any entry it replaces.
    ///
    /// Returns the token identifying this registration.
    pub async fn add_connection(
        &self,
        peer_id: PeerId,
        bitfield: Bitfield,
        am_choking: bool,
        is_choking: bool,
        transport: Box<dyn PeerTransport>,
    ) -> ConnectionToken {
        let mut connections = self.connections.lock().await;
        self.insert_locked(
            &mut connections,
            peer_id,
            PeerConnection::new(self.issue_token(), bitfield, am_choking, is_choking, transport),
        )
    }

    /// Registers a connection unless that would take the registry past `limit` entries.
    ///
    /// The count is checked under the same lock as the insert. Replacing an
    /// existing id does not grow the registry and is always allowed. A
    /// rejected transport is closed.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ConnectionLimitExceeded` - `limit` entries already registered
    pub async fn try_add_connection(
        &self,
        peer_id: PeerId,
        bitfield: Bitfield,
        am_choking: bool,
        is_choking: bool,
        mut transport: Box<dyn PeerTransport>,
        limit: usize,
    ) -> Result<ConnectionToken, TorrentError> {
        let mut connections = self.connections.lock().await;
        if !connections.contains_key(&peer_id) && connections.len() >= limit {
            transport.close();
            tracing::debug!("Refusing {}: {} connections active", peer_id, connections.len());
            return Err(TorrentError::ConnectionLimitExceeded);
        }
        Ok(self.insert_locked(
            &mut connections,
            peer_id,
            PeerConnection::new(self.issue_token(), bitfield, am_choking, is_choking, transport),
        ))
    }

    fn insert_locked(
        &self,
        connections: &mut HashMap<PeerId, PeerConnection>,
        peer_id: PeerId,
        connection: PeerConnection,
    ) -> ConnectionToken {
        let token = connection.token;
        if let Some(mut previous) = connections.insert(peer_id, connection) {
            tracing::warn!("Replacing existing connection for peer {}", peer_id);
            previous.close();
        }
        tracing::debug!(
            "Connection added: {} ({} active)",
            peer_id,
            connections.len()
        );
        token
    }

    /// Closes and removes the entry for `peer_id`. Unknown ids are a no-op.
    ///
    /// Returns whether an entry was removed.
    pub async fn remove_connection(&self, peer_id: &PeerId) -> bool {
        let mut connections = self.connections.lock().await;
        Self::remove_locked(&mut connections, peer_id)
    }

    /// Like [`remove_connection`](Self::remove_connection), but only while the
    /// entry is still the registration identified by `token`.
    pub async fn remove_connection_if(&self, peer_id: &PeerId, token: ConnectionToken) -> bool {
        let mut connections = self.connections.lock().await;
        let current = connections
            .get(peer_id)
            .is_some_and(|connection| connection.token == token);
        current && Self::remove_locked(&mut connections, peer_id)
    }

    fn remove_locked(connections: &mut HashMap<PeerId, PeerConnection>, peer_id: &PeerId) -> bool {
        match connections.remove(peer_id) {
            Some(mut connection) => {
                connection.close();
                tracing::debug!(
                    "Connection removed: {} ({} active)",
                    peer_id,
                    connections.len()
                );
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, peer_id: &PeerId) -> bool {
        self.connections.lock().await.contains_key(peer_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub async fn peer_ids(&self) -> Vec<PeerId> {
        self.connections.lock().await.keys().copied().collect()
    }

    pub async fn snapshot(&self, peer_id: &PeerId) -> Option<PeerSnapshot> {
        self.connections
            .lock()
            .await
            .get(peer_id)
            .map(PeerConnection::snapshot)
    }

    /// Records a message received from `peer_id`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerNotFound` - No entry for `peer_id`
    /// - `TorrentError::MalformedMessage` - See [`PeerConnection::apply_received`]
    pub async fn record_received(
        &self,
        peer_id: &PeerId,
        message: &PeerMessage,
    ) -> Result<(), TorrentError> {
        self.connections
            .lock()
            .await
            .get_mut(peer_id)
            .ok_or(TorrentError::PeerNotFound { peer_id: *peer_id })?
            .apply_received(message)
    }

    /// Records a message for the registration identified by `token`.
    ///
    /// An entry with a different token counts as absent.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerNotFound` - No entry for `peer_id` with this token
    /// - `TorrentError::MalformedMessage` - See [`PeerConnection::apply_received`]
    pub async fn record_received_for(
        &self,
        peer_id: &PeerId,
        token: ConnectionToken,
        message: &PeerMessage,
    ) -> Result<(), TorrentError> {
        self.connections
            .lock()
            .await
            .get_mut(peer_id)
            .filter(|connection| connection.token == token)
            .ok_or(TorrentError::PeerNotFound { peer_id: *peer_id })?
            .apply_received(message)
    }

    /// Sends a frame to one peer; `None` sends a keep-alive.
    ///
    /// A failed write closes and removes the entry before the error is returned.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerNotFound` - No entry for `peer_id`
    /// - `TorrentError::MalformedMessage` - Message too large to frame
    /// - `TorrentError::Io` - Write failed
    pub async fn send_message(
        &self,
        peer_id: &PeerId,
        message: Option<&PeerMessage>,
    ) -> Result<(), TorrentError> {
        let frame = MessageCodec::serialize_message(message)?;

        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(peer_id)
            .ok_or(TorrentError::PeerNotFound { peer_id: *peer_id })?;

        if let Err(e) = connection.send_frame(&frame, message).await {
            Self::remove_locked(&mut connections, peer_id);
            tracing::debug!("Send to {} failed, connection removed: {}", peer_id, e);
            return Err(TorrentError::Io(e));
        }
        Ok(())
    }

    /// Sends `message` to every registered peer.
    ///
    /// Peers whose write fails are closed and removed; they are returned with
    /// their errors.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MalformedMessage` - Message too large to frame; nothing is sent
    pub async fn broadcast(
        &self,
        message: &PeerMessage,
    ) -> Result<Vec<(PeerId, TorrentError)>, TorrentError> {
        let frame = MessageCodec::serialize_message(Some(message))?;

        let mut connections = self.connections.lock().await;
        let mut failed = Vec::new();

        for (peer_id, connection) in connections.iter_mut() {
            if let Err(e) = connection.send_frame(&frame, Some(message)).await {
                connection.close();
                failed.push((*peer_id, TorrentError::Io(e)));
            }
        }
        for (peer_id, _) in &failed {
            connections.remove(peer_id);
        }

        if !failed.is_empty() {
            tracing::debug!(
                "Broadcast of {:?} dropped {} peers",
                message.id(),
                failed.len()
            );
        }
        Ok(failed)
    }

    /// Peers that have advertised `index`.
    pub async fn peers_with_piece(&self, index: PieceIndex) -> Vec<PeerId> {
        self.connections
            .lock()
            .await
            .iter()
            .filter(|(_, connection)| connection.bitfield.has_piece(index))
            .map(|(peer_id, _)| *peer_id)
            .collect()
    }

    /// Closes and removes every connection; returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let mut connections = self.connections.lock().await;
        let count = connections.len();
        for (_, mut connection) in connections.drain() {
            connection.close();
        }
        tracing::debug!("Peer pool shut down, {} connections closed", count);
        count
    }
}
