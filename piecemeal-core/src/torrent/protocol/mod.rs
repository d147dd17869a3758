//! Peer wire protocol: handshake, message framing and split transports.
//!
//! Fixed binary layouts, independent of the bencode codec. A connection
//! starts with one handshake in each direction followed by length-prefixed
//! messages; a zero length is a keep-alive.

pub mod connection;
pub mod handshake;
pub mod messages;
pub mod types;

// Re-export public API
pub use connection::{
    StreamTransport, TcpTransport, WireReader, dial, handshake_inbound, handshake_outbound,
    split_tcp, wire_pair,
};
pub use handshake::HandshakeCodec;
pub use messages::{DEFAULT_MAX_MESSAGE_LEN, MessageCodec};
pub use types::{
    DEFAULT_CLIENT_PREFIX, HANDSHAKE_LEN, MessageId, PROTOCOL_ID, PeerHandshake, PeerId, PeerMessage,
};
