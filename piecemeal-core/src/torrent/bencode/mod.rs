//! Bencode codec used for metadata serialization and info hash derivation.
//!
//! Decoding reads one value from any byte stream through a pushback reader.
//! Encoding is canonical: dictionary keys are emitted in ascending byte order
//! so that independent implementations hash identical bytes.

pub mod reader;
pub mod value;
pub mod writer;

pub use reader::{BencodeReader, MAX_DEPTH, decode, decode_bytes};
pub use value::{BencodeDict, BencodeValue};
pub use writer::{encode, encode_to};

/// Errors raised by the bencode codec.
#[derive(Debug, thiserror::Error)]
pub enum BencodeError {
    #[error("Malformed bencode: {reason}")]
    MalformedEncoding { reason: String },

    #[error("Bencode stream ended early")]
    TruncatedStream,

    #[error("Unsupported bencode value: {reason}")]
    UnsupportedValue { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BencodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        BencodeError::MalformedEncoding {
            reason: reason.into(),
        }
    }
}
