//! Recursive-descent bencode decoder over a pushback reader

use std::io::{ErrorKind, Read};

use super::value::{BencodeDict, BencodeValue};
use super::BencodeError;

/// Maximum container nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

// "-9223372036854775808" is the longest valid integer token.
const MAX_TOKEN_LEN: usize = 20;

/// Streaming bencode decoder.
///
/// Wraps any `Read` with a single byte of pushback that every decode path
/// shares. The decoder never reads past the last byte of the value it
/// returns, so the rest of the stream stays available to the caller.
pub struct BencodeReader<R> {
    inner: R,
    pushback: Option<u8>,
}

impl<R: Read> BencodeReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pushback: None,
        }
    }

    /// Returns the wrapped reader. No byte is ever held back between values.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Decodes exactly one complete value from the stream.
    ///
    /// # Errors
    ///
    /// - `BencodeError::MalformedEncoding` - Syntax violation
    /// - `BencodeError::TruncatedStream` - Stream ended before a value or string payload
    /// - `BencodeError::Io` - Underlying read failed
    pub fn decode(&mut self) -> Result<BencodeValue, BencodeError> {
        self.decode_value(0)
    }

    fn next_byte(&mut self) -> Result<Option<u8>, BencodeError> {
        if let Some(byte) = self.pushback.take() {
            return Ok(Some(byte));
        }

        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BencodeError::Io(e)),
            }
        }
    }

    fn unread(&mut self, byte: u8) {
        debug_assert!(self.pushback.is_none());
        self.pushback = Some(byte);
    }

    fn decode_value(&mut self, depth: usize) -> Result<BencodeValue, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::malformed(format!(
                "nesting deeper than {MAX_DEPTH} levels"
            )));
        }

        let Some(first) = self.next_byte()? else {
            return Err(BencodeError::TruncatedStream);
        };

        match first {
            b'd' => self.decode_dict(depth),
            b'l' => self.decode_list(depth),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'0'..=b'9' => self.decode_string(first).map(BencodeValue::ByteString),
            other => Err(BencodeError::malformed(format!(
                "unexpected byte 0x{other:02x} at start of value"
            ))),
        }
    }

    /// Reads ASCII bytes up to `terminator`, which is consumed.
    fn read_token(
        &mut self,
        terminator: u8,
        mut token: Vec<u8>,
        what: &str,
    ) -> Result<String, BencodeError> {
        loop {
            match self.next_byte()? {
                Some(byte) if byte == terminator => break,
                Some(byte) => {
                    if token.len() >= MAX_TOKEN_LEN {
                        return Err(BencodeError::malformed(format!("{what} is too long")));
                    }
                    token.push(byte);
                }
                None => {
                    return Err(BencodeError::malformed(format!(
                        "missing terminator for {what}"
                    )));
                }
            }
        }

        String::from_utf8(token)
            .map_err(|_| BencodeError::malformed(format!("{what} is not ASCII")))
    }

    fn decode_integer(&mut self) -> Result<i64, BencodeError> {
        let token = self.read_token(b'e', Vec::new(), "integer")?;
        token
            .parse::<i64>()
            .map_err(|_| BencodeError::malformed(format!("invalid integer {token:?}")))
    }

    fn decode_string(&mut self, first_digit: u8) -> Result<Vec<u8>, BencodeError> {
        let token = self.read_token(b':', vec![first_digit], "string length")?;
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BencodeError::malformed(format!(
                "non-numeric string length {token:?}"
            )));
        }
        let length: u64 = token
            .parse()
            .map_err(|_| BencodeError::malformed(format!("string length {token} overflows")))?;

        // Grows with the data actually read, so a bogus length cannot force
        // a huge allocation up front.
        let mut data = Vec::new();
        if let Some(byte) = self.pushback.take() {
            data.push(byte);
        }
        let remaining = length.saturating_sub(data.len() as u64);
        self.inner.by_ref().take(remaining).read_to_end(&mut data)?;

        if (data.len() as u64) < length {
            return Err(BencodeError::TruncatedStream);
        }
        Ok(data)
    }

    fn decode_list(&mut self, depth: usize) -> Result<BencodeValue, BencodeError> {
        let mut items = Vec::new();
        loop {
            match self.next_byte()? {
                Some(b'e') => break,
                Some(byte) => {
                    self.unread(byte);
                    items.push(self.decode_value(depth + 1)?);
                }
                None => return Err(BencodeError::malformed("missing terminator for list")),
            }
        }
        Ok(BencodeValue::List(items))
    }

    fn decode_dict(&mut self, depth: usize) -> Result<BencodeValue, BencodeError> {
        let mut dict = BencodeDict::new();
        loop {
            match self.next_byte()? {
                Some(b'e') => break,
                Some(byte) => {
                    self.unread(byte);
                    let key = match self.decode_value(depth + 1)? {
                        BencodeValue::ByteString(key) => key,
                        other => {
                            return Err(BencodeError::malformed(format!(
                                "dictionary key must be a byte string, found {}",
                                other.type_name()
                            )));
                        }
                    };
                    let value = self.decode_value(depth + 1)?;
                    // Duplicate keys are accepted; the last one wins.
                    dict.insert(key, value);
                }
                None => {
                    return Err(BencodeError::malformed(
                        "missing terminator for dictionary",
                    ));
                }
            }
        }
        Ok(BencodeValue::Dict(dict))
    }
}

/// Decodes one value from `reader`, leaving any following bytes unread.
///
/// # Errors
///
/// See [`BencodeReader::decode`].
pub fn decode<R: Read>(reader: R) -> Result<BencodeValue, BencodeError> {
    BencodeReader::new(reader).decode()
}

/// Decodes a buffer that must hold exactly one value.
///
/// # Errors
///
/// - `BencodeError::MalformedEncoding` - Syntax violation or trailing bytes
/// - `BencodeError::TruncatedStream` - Buffer ends inside the value
pub fn decode_bytes(data: &[u8]) -> Result<BencodeValue, BencodeError> {
    let mut reader = BencodeReader::new(data);
    let value = reader.decode()?;
    let rest = reader.into_inner();
    if !rest.is_empty() {
        return Err(BencodeError::malformed(format!(
            "{} trailing bytes after value",
            rest.len()
        )));
    }
    Ok(value)
}
