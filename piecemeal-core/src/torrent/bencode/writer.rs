//! Canonical bencode encoder

use std::io::Write;

use super::value::BencodeValue;

/// Encodes a value into its canonical byte form.
///
/// Dictionary keys come out in ascending byte order, so logically equal
/// values always produce identical bytes.
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(value, &mut buf);
    buf
}

/// Writes the canonical encoding of `value` to `writer`.
///
/// # Errors
///
/// - `std::io::Error` - If the writer fails
pub fn encode_to<W: Write>(value: &BencodeValue, writer: &mut W) -> std::io::Result<()> {
    writer.write_all(&encode(value))
}

fn write_value(value: &BencodeValue, buf: &mut Vec<u8>) {
    match value {
        BencodeValue::Integer(number) => {
            buf.push(b'i');
            buf.extend_from_slice(number.to_string().as_bytes());
            buf.push(b'e');
        }
        BencodeValue::ByteString(bytes) => write_bytes(bytes, buf),
        BencodeValue::List(items) => {
            buf.push(b'l');
            for item in items {
                write_value(item, buf);
            }
            buf.push(b'e');
        }
        BencodeValue::Dict(dict) => {
            buf.push(b'd');
            // BTreeMap iteration is already in lexicographic byte order
            for (key, item) in dict {
                write_bytes(key, buf);
                write_value(item, buf);
            }
            buf.push(b'e');
        }
    }
}

fn write_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(bytes);
}
