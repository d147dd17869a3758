//! Piece availability bitmap

use bytes::Bytes;

use super::{PieceIndex, TorrentError};

/// Which pieces a peer holds, one bit per piece.
///
/// Bits are stored most-significant-bit first within each byte, matching the
/// Bitfield message payload. The map is sized for a fixed piece count and
/// never grows; indices at or past the count read as missing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitfield {
    bytes: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates an empty bitmap sized for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bytes: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Creates a bitmap with every one of `piece_count` pieces present.
    pub fn full(piece_count: usize) -> Self {
        let mut bitfield = Self::new(piece_count);
        for index in 0..piece_count {
            bitfield.set_bit(index);
        }
        bitfield
    }

    /// Validates a Bitfield message payload for `piece_count` pieces.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MalformedMessage` - Wrong payload length or spare bits set
    pub fn from_payload(payload: &[u8], piece_count: usize) -> Result<Self, TorrentError> {
        let expected = piece_count.div_ceil(8);
        if payload.len() != expected {
            return Err(TorrentError::MalformedMessage {
                reason: format!(
                    "Bitfield of {} bytes for {piece_count} pieces, expected {expected}",
                    payload.len()
                ),
            });
        }

        let spare_bits = expected * 8 - piece_count;
        if let Some(last) = payload.last()
            && spare_bits > 0
            && last & ((1u8 << spare_bits) - 1) != 0
        {
            return Err(TorrentError::MalformedMessage {
                reason: "Bitfield has bits set past the last piece".to_string(),
            });
        }

        Ok(Self {
            bytes: payload.to_vec(),
            piece_count,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn has_piece(&self, index: PieceIndex) -> bool {
        let index = index.as_u32() as usize;
        index < self.piece_count && self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Marks `index` present.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MalformedMessage` - Index is past the last piece
    pub fn set_piece(&mut self, index: PieceIndex) -> Result<(), TorrentError> {
        let position = index.as_u32() as usize;
        if position >= self.piece_count {
            return Err(TorrentError::MalformedMessage {
                reason: format!(
                    "Piece index {index} out of range for {} pieces",
                    self.piece_count
                ),
            });
        }
        self.set_bit(position);
        Ok(())
    }

    fn set_bit(&mut self, index: usize) {
        self.bytes[index / 8] |= 0x80 >> (index % 8);
    }

    /// Number of pieces marked present.
    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload for a Bitfield message.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msb_first_layout() {
        let mut bitfield = Bitfield::new(10);
        assert_eq!(bitfield.as_bytes(), &[0, 0]);

        bitfield.set_piece(PieceIndex::new(0)).unwrap();
        bitfield.set_piece(PieceIndex::new(9)).unwrap();
        assert_eq!(bitfield.as_bytes(), &[0b1000_0000, 0b0100_0000]);
        assert!(bitfield.has_piece(PieceIndex::new(9)));
        assert!(!bitfield.has_piece(PieceIndex::new(8)));
        assert_eq!(bitfield.count_ones(), 2);
    }

    #[test]
    fn test_full_leaves_spare_bits_clear() {
        let bitfield = Bitfield::full(10);
        assert_eq!(bitfield.as_bytes(), &[0xff, 0b1100_0000]);
        assert_eq!(bitfield.count_ones(), 10);
    }

    #[test]
    fn test_out_of_range_index_never_grows_map() {
        let mut bitfield = Bitfield::new(16);
        assert!(!bitfield.has_piece(PieceIndex::new(100)));

        assert!(matches!(
            bitfield.set_piece(PieceIndex::new(u32::MAX)),
            Err(TorrentError::MalformedMessage { .. })
        ));
        assert!(bitfield.set_piece(PieceIndex::new(16)).is_err());
        assert_eq!(bitfield.as_bytes().len(), 2);
        assert_eq!(bitfield.count_ones(), 0);
    }

    #[test]
    fn test_payload_validation() {
        let bitfield = Bitfield::from_payload(&[0xff, 0b1100_0000], 10).unwrap();
        assert_eq!(bitfield, Bitfield::full(10));

        // Too long, too short, and a spare bit set
        assert!(Bitfield::from_payload(&[0; 1024], 10).is_err());
        assert!(Bitfield::from_payload(&[0xff], 10).is_err());
        assert!(matches!(
            Bitfield::from_payload(&[0xff, 0b1110_0000], 10),
            Err(TorrentError::MalformedMessage { .. })
        ));

        assert_eq!(Bitfield::from_payload(&[], 0).unwrap(), Bitfield::new(0));
    }
}
