//! Handshake exchange and split transports over async byte streams

use std::future::Future;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;

use super::handshake::HandshakeCodec;
use super::messages::MessageCodec;
use super::types::{PeerHandshake, PeerMessage};
use crate::config::NetworkConfig;
use crate::torrent::peer_pool::PeerTransport;
use crate::torrent::{InfoHash, TorrentError};

/// Write half kept by the registry for a TCP peer.
pub type TcpTransport = StreamTransport<OwnedWriteHalf>;

/// Runs `operation` under `deadline`, mapping expiry to `TorrentError::Timeout`.
async fn within<T, F>(
    deadline: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, TorrentError>
where
    F: Future<Output = Result<T, TorrentError>>,
{
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_| TorrentError::Timeout { operation })?
}

/// Identifier mismatch is fatal; info hash mismatch is reported as such.
fn validate_handshake(theirs: &PeerHandshake, expected: &InfoHash) -> Result<(), TorrentError> {
    if !theirs.has_standard_protocol() {
        return Err(TorrentError::ProtocolError {
            message: format!("Unexpected protocol identifier {:?}", theirs.protocol()),
        });
    }
    if !theirs.verify(expected) {
        return Err(TorrentError::HandshakeMismatch {
            expected: *expected,
            actual: theirs.info_hash,
        });
    }
    Ok(())
}

/// Sends our handshake, then reads and validates the remote one.
///
/// # Errors
/// - `TorrentError::Timeout` - Remote did not answer within `deadline`
/// - `TorrentError::TruncatedStream` - Stream ended inside the handshake
/// - `TorrentError::ProtocolError` - Remote used another protocol identifier
/// - `TorrentError::HandshakeMismatch` - Remote is sharing different content
pub async fn handshake_outbound<S>(
    stream: &mut S,
    ours: &PeerHandshake,
    deadline: Duration,
) -> Result<PeerHandshake, TorrentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    within(deadline, "handshake write", async {
        stream.write_all(&ours.serialize()).await?;
        stream.flush().await?;
        Ok(())
    })
    .await?;

    let theirs = within(deadline, "handshake read", HandshakeCodec::read_handshake(stream)).await?;
    validate_handshake(&theirs, &ours.info_hash)?;
    Ok(theirs)
}

/// Reads and validates the remote handshake, then answers with ours.
///
/// Nothing is sent to a peer whose handshake fails validation.
///
/// # Errors
/// Same as [`handshake_outbound`].
pub async fn handshake_inbound<S>(
    stream: &mut S,
    ours: &PeerHandshake,
    deadline: Duration,
) -> Result<PeerHandshake, TorrentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let theirs = within(deadline, "handshake read", HandshakeCodec::read_handshake(stream)).await?;
    validate_handshake(&theirs, &ours.info_hash)?;

    within(deadline, "handshake write", async {
        stream.write_all(&ours.serialize()).await?;
        stream.flush().await?;
        Ok(())
    })
    .await?;

    Ok(theirs)
}

/// Opens a TCP connection and performs the outbound handshake.
///
/// # Errors
/// - `TorrentError::Timeout` - Connect or handshake exceeded its deadline
/// - `TorrentError::Io` - TCP connection failed
/// - See [`handshake_outbound`] for handshake failures
pub async fn dial(
    address: SocketAddr,
    ours: &PeerHandshake,
    config: &NetworkConfig,
) -> Result<(PeerHandshake, TcpStream), TorrentError> {
    let mut stream = within(config.connect_timeout, "connect", async {
        Ok(TcpStream::connect(address).await?)
    })
    .await?;

    let theirs = handshake_outbound(&mut stream, ours, config.handshake_timeout).await?;
    Ok((theirs, stream))
}

/// Splits a handshaken TCP stream into the session's reader and the registry's transport.
pub fn split_tcp(
    stream: TcpStream,
    config: &NetworkConfig,
) -> (WireReader<OwnedReadHalf>, TcpTransport) {
    let (read_half, write_half) = stream.into_split();
    wire_pair(read_half, write_half, config)
}

/// Pairs a read half and a write half through a shared close signal.
pub fn wire_pair<R, W>(
    reader: R,
    writer: W,
    config: &NetworkConfig,
) -> (WireReader<R>, StreamTransport<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        WireReader {
            reader,
            closed: closed_rx,
            message_timeout: config.message_timeout,
            max_message_len: config.max_message_len,
        },
        StreamTransport {
            writer: Some(writer),
            closed: closed_tx,
            write_timeout: config.message_timeout,
        },
    )
}

/// Read side of a peer connection, owned by the session flow.
///
/// Every length and body read is bounded by the message deadline, and a
/// pending read fails as soon as the paired transport is closed.
pub struct WireReader<R> {
    reader: R,
    closed: watch::Receiver<bool>,
    message_timeout: Duration,
    max_message_len: u32,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    /// Reads the next frame; `Ok(None)` is a keep-alive.
    ///
    /// # Errors
    /// - `TorrentError::Io` - `ConnectionAborted` once the transport is closed, or a read failure
    /// - `TorrentError::Timeout` - No complete length or body within the deadline
    /// - `TorrentError::TruncatedStream` / `MalformedMessage` - Bad frame
    pub async fn next_message(&mut self) -> Result<Option<PeerMessage>, TorrentError> {
        let Self {
            reader,
            closed,
            message_timeout,
            max_message_len,
        } = self;
        let deadline = *message_timeout;
        let max_len = *max_message_len;

        let read = async {
            let length = within(deadline, "message length read", async {
                reader
                    .read_u32()
                    .await
                    .map_err(|e| TorrentError::from_read(e, "message length"))
            })
            .await?;

            if length == 0 {
                return Ok(None);
            }

            within(
                deadline,
                "message body read",
                MessageCodec::read_body(reader, length, max_len),
            )
            .await
            .map(Some)
        };

        tokio::select! {
            biased;
            () = wait_closed(closed) => Err(TorrentError::Io(io::Error::new(
                ErrorKind::ConnectionAborted,
                "transport closed",
            ))),
            result = read => result,
        }
    }
}

/// Resolves once the close flag is raised or the transport is dropped.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

/// Write side of a peer connection, owned by its registry entry.
pub struct StreamTransport<W> {
    writer: Option<W>,
    closed: watch::Sender<bool>,
    write_timeout: Duration,
}

#[async_trait]
impl<W> PeerTransport for StreamTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(io::Error::new(ErrorKind::NotConnected, "transport closed"));
        };

        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(ErrorKind::TimedOut, "peer write timed out")),
        }
    }

    fn close(&mut self) {
        self.closed.send_replace(true);
        // Dropping the write half shuts the stream down in that direction.
        self.writer = None;
    }

    fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}
