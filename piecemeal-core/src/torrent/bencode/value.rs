//! Bencode value tree and conversions

use std::collections::BTreeMap;

use super::BencodeError;

/// Dictionary keyed by raw byte strings.
///
/// `BTreeMap` orders keys by lexicographic byte comparison, which is exactly
/// the canonical key order of the encoding.
pub type BencodeDict = BTreeMap<Vec<u8>, BencodeValue>;

/// A decoded bencode value.
///
/// Closed set of the four bencode types. Every consumer matches
/// exhaustively, so there is no "unknown type" state at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Signed 64-bit integer, `i<decimal>e`
    Integer(i64),
    /// Arbitrary bytes, `<len>:<bytes>`
    ByteString(Vec<u8>),
    /// Ordered sequence, `l...e`
    List(Vec<BencodeValue>),
    /// Byte-string keyed mapping, `d...e`
    Dict(BencodeDict),
}

impl BencodeValue {
    /// Creates a byte string value from UTF-8 text.
    pub fn string(text: &str) -> Self {
        BencodeValue::ByteString(text.as_bytes().to_vec())
    }

    /// Builds a dictionary from key/value pairs. Later duplicates win.
    pub fn dict<K>(entries: impl IntoIterator<Item = (K, BencodeValue)>) -> Self
    where
        K: Into<Vec<u8>>,
    {
        BencodeValue::Dict(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the raw bytes of a byte string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::ByteString(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns a byte string value as UTF-8 text, if valid.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BencodeDict> {
        match self {
            BencodeValue::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Looks up a key when the value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict().and_then(|dict| dict.get(key))
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            BencodeValue::Integer(_) => "integer",
            BencodeValue::ByteString(_) => "byte string",
            BencodeValue::List(_) => "list",
            BencodeValue::Dict(_) => "dictionary",
        }
    }
}

impl From<i64> for BencodeValue {
    fn from(value: i64) -> Self {
        BencodeValue::Integer(value)
    }
}

impl From<u32> for BencodeValue {
    fn from(value: u32) -> Self {
        BencodeValue::Integer(i64::from(value))
    }
}

impl TryFrom<u64> for BencodeValue {
    type Error = BencodeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(BencodeValue::Integer)
            .map_err(|_| BencodeError::UnsupportedValue {
                reason: format!("integer {value} does not fit in a signed 64-bit value"),
            })
    }
}

impl From<&str> for BencodeValue {
    fn from(value: &str) -> Self {
        BencodeValue::string(value)
    }
}

impl From<String> for BencodeValue {
    fn from(value: String) -> Self {
        BencodeValue::ByteString(value.into_bytes())
    }
}

impl From<&[u8]> for BencodeValue {
    fn from(value: &[u8]) -> Self {
        BencodeValue::ByteString(value.to_vec())
    }
}

impl From<Vec<u8>> for BencodeValue {
    fn from(value: Vec<u8>) -> Self {
        BencodeValue::ByteString(value)
    }
}

impl From<Vec<BencodeValue>> for BencodeValue {
    fn from(value: Vec<BencodeValue>) -> Self {
        BencodeValue::List(value)
    }
}

impl From<BencodeDict> for BencodeValue {
    fn from(value: BencodeDict) -> Self {
        BencodeValue::Dict(value)
    }
}
