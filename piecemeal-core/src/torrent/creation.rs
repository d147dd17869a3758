//! Metadata creation from content streams with piece splitting and hashing
//!
//! Splits content into fixed-size pieces, hashes each with SHA-1 and derives
//! the info hash from the canonical encoding of the info dictionary.

use std::io::ErrorKind;
use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::bencode::{self, BencodeError, BencodeValue};
use super::{InfoHash, PieceIndex, TorrentError};

/// Standard piece size (256KB), used when a piece length of zero is requested
pub const DEFAULT_PIECE_LENGTH: u32 = 262_144; // 256 * 1024

/// Largest piece length a creator will hash with (64MB)
pub const MAX_PIECE_LENGTH: u32 = 67_108_864; // 64 * 1024 * 1024

/// Immutable description of one shared file.
///
/// Only produced by [`TorrentCreator`] or [`MetaData::from_bencode`], so every
/// instance carries a complete piece list and a matching info hash. The info
/// dictionary is kept as hashed, including keys this crate does not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    info: BencodeValue,
    name: String,
    source: String,
    total_size: u64,
    piece_length: u32,
    piece_hashes: Vec<[u8; 20]>,
    info_hash: InfoHash,
}

impl MetaData {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locator the content was read from (path or URL).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// SHA-1 of every piece in content order.
    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.piece_hashes
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Size in bytes of the piece at `index`, shorter for the final piece.
    ///
    /// Derived from the recorded total size; returns `None` past the last piece.
    pub fn piece_size(&self, index: PieceIndex) -> Option<u64> {
        let index = u64::from(index.as_u32());
        if index as usize >= self.piece_hashes.len() {
            return None;
        }
        let start = index * u64::from(self.piece_length);
        let end = (start + u64::from(self.piece_length)).min(self.total_size);
        Some(end.saturating_sub(start))
    }

    /// Checks downloaded piece data against its recorded hash.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceHashMismatch` - Unknown index or data does not match
    pub fn verify_piece(&self, index: PieceIndex, data: &[u8]) -> Result<(), TorrentError> {
        let expected = self
            .piece_hashes
            .get(index.as_u32() as usize)
            .ok_or(TorrentError::PieceHashMismatch { index })?;

        if sha1_digest(data) == *expected {
            Ok(())
        } else {
            Err(TorrentError::PieceHashMismatch { index })
        }
    }

    /// Info dictionary whose canonical encoding hashes to [`MetaData::info_hash`].
    pub fn info_dict(&self) -> &BencodeValue {
        &self.info
    }

    /// Encodes the distributable document `{"info": ..., "source": ...}`.
    pub fn to_bencode(&self) -> Vec<u8> {
        let document = BencodeValue::dict([
            ("info", self.info.clone()),
            ("source", BencodeValue::string(&self.source)),
        ]);
        bencode::encode(&document)
    }

    /// Parses a document produced by [`MetaData::to_bencode`].
    ///
    /// The info hash is recomputed from the canonical re-encoding of the
    /// parsed info dictionary.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Bencode` - Document is not valid bencode
    /// - `TorrentError::InvalidTorrentFile` - Required fields missing or invalid, or
    ///   the piece count does not cover `length`
    pub fn from_bencode(data: &[u8]) -> Result<Self, TorrentError> {
        let document = bencode::decode_bytes(data)?;

        let info = document
            .get(b"info")
            .ok_or_else(|| invalid("Missing 'info' field"))?;
        if info.as_dict().is_none() {
            return Err(invalid("Info field must be dictionary"));
        }

        let name = info
            .get(b"name")
            .and_then(BencodeValue::as_str)
            .ok_or_else(|| invalid("Missing or invalid field: \"name\""))?
            .to_string();
        let total_size = info
            .get(b"length")
            .and_then(BencodeValue::as_integer)
            .and_then(|length| u64::try_from(length).ok())
            .ok_or_else(|| invalid("Missing or invalid field: \"length\""))?;
        let piece_length = info
            .get(b"piece length")
            .and_then(BencodeValue::as_integer)
            .and_then(|length| u32::try_from(length).ok())
            .filter(|length| *length > 0)
            .ok_or_else(|| invalid("Missing or invalid field: \"piece length\""))?;
        let pieces = info
            .get(b"pieces")
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| invalid("Missing or invalid field: \"pieces\""))?;

        if !pieces.len().is_multiple_of(20) {
            return Err(invalid("Invalid pieces length"));
        }
        let expected_pieces = total_size.div_ceil(u64::from(piece_length));
        if (pieces.len() / 20) as u64 != expected_pieces {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!(
                    "{} piece hashes for {total_size} bytes in pieces of {piece_length}, expected {expected_pieces}",
                    pieces.len() / 20
                ),
            });
        }

        let piece_hashes = pieces
            .chunks(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let source = document
            .get(b"source")
            .and_then(BencodeValue::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            info_hash: InfoHash::new(sha1_digest(&bencode::encode(info))),
            info: info.clone(),
            name,
            source,
            total_size,
            piece_length,
            piece_hashes,
        })
    }
}

/// Metadata creator for turning content streams into [`MetaData`]
pub struct TorrentCreator {
    piece_length: u32,
}

impl Default for TorrentCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl TorrentCreator {
    /// Creates metadata creator with default piece length (256KB)
    pub fn new() -> Self {
        Self {
            piece_length: DEFAULT_PIECE_LENGTH,
        }
    }

    /// Creates metadata creator with custom piece length
    ///
    /// Zero selects the default; lengths above [`MAX_PIECE_LENGTH`] are capped.
    pub fn with_piece_length(piece_length: u32) -> Self {
        let piece_length = match piece_length {
            0 => DEFAULT_PIECE_LENGTH,
            length if length > MAX_PIECE_LENGTH => {
                tracing::warn!(
                    "Piece length {} exceeds {}, capping",
                    length,
                    MAX_PIECE_LENGTH
                );
                MAX_PIECE_LENGTH
            }
            length => length,
        };
        Self { piece_length }
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Builds metadata by hashing `content` piece by piece.
    ///
    /// `file_size` is recorded as given. A short final piece is hashed over
    /// the bytes actually read.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Io` - Read failed before end of stream
    /// - `TorrentError::Bencode` - `file_size` is not representable in the info dictionary
    pub async fn create_from_reader<R>(
        &self,
        source: &str,
        name: &str,
        file_size: u64,
        mut content: R,
    ) -> Result<MetaData, TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let total = i64::try_from(file_size).map_err(|_| BencodeError::UnsupportedValue {
            reason: format!("file size {file_size} does not fit in a signed 64-bit value"),
        })?;

        let (piece_hashes, bytes_read) = self.calculate_piece_hashes(&mut content).await?;
        if bytes_read != file_size {
            tracing::warn!(
                "Content for {} was {} bytes but {} bytes were declared",
                name,
                bytes_read,
                file_size
            );
        }

        let info = info_dict(name, total, self.piece_length, &piece_hashes);
        let info_hash = InfoHash::new(sha1_digest(&bencode::encode(&info)));

        tracing::debug!(
            "Built metadata for {}: {} pieces of {} bytes, info hash {}",
            name,
            piece_hashes.len(),
            self.piece_length,
            info_hash
        );

        Ok(MetaData {
            info,
            name: name.to_string(),
            source: source.to_string(),
            total_size: file_size,
            piece_length: self.piece_length,
            piece_hashes,
            info_hash,
        })
    }

    /// Builds metadata for a local file, using its path as source locator
    ///
    /// # Errors
    /// - `TorrentError::Io` - File open or read error
    /// - `TorrentError::InvalidTorrentFile` - Path has no usable file name
    pub async fn create_from_file(&self, file_path: &Path) -> Result<MetaData, TorrentError> {
        let file = File::open(file_path).await?;
        let file_size = file.metadata().await?.len();

        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| invalid("Invalid filename"))?
            .to_string();

        self.create_from_reader(
            &file_path.display().to_string(),
            &file_name,
            file_size,
            file,
        )
        .await
    }

    /// Reads the stream in piece-sized chunks, returning hashes and total bytes read
    async fn calculate_piece_hashes<R>(
        &self,
        content: &mut R,
    ) -> Result<(Vec<[u8; 20]>, u64), TorrentError>
    where
        R: AsyncRead + Unpin,
    {
        let mut piece_hashes = Vec::new();
        let mut buffer = vec![0u8; self.piece_length as usize];
        let mut total = 0u64;

        loop {
            let filled = read_chunk(content, &mut buffer).await?;
            if filled > 0 {
                piece_hashes.push(sha1_digest(&buffer[..filled]));
                total += filled as u64;
            }
            if filled < buffer.len() {
                break;
            }
        }

        Ok((piece_hashes, total))
    }
}

/// Builds metadata with an explicit piece length; zero selects 256KB.
///
/// # Errors
///
/// See [`TorrentCreator::create_from_reader`].
pub async fn build_metadata<R>(
    source: &str,
    name: &str,
    file_size: u64,
    piece_length: u32,
    content: R,
) -> Result<MetaData, TorrentError>
where
    R: AsyncRead + Unpin,
{
    TorrentCreator::with_piece_length(piece_length)
        .create_from_reader(source, name, file_size, content)
        .await
}

/// Fills `buffer` unless the stream ends first; returns bytes read.
async fn read_chunk<R>(content: &mut R, buffer: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        match content.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn info_dict(name: &str, length: i64, piece_length: u32, piece_hashes: &[[u8; 20]]) -> BencodeValue {
    BencodeValue::dict([
        ("length", BencodeValue::Integer(length)),
        ("name", BencodeValue::string(name)),
        ("piece length", BencodeValue::from(piece_length)),
        ("pieces", BencodeValue::ByteString(piece_hashes.concat())),
    ])
}

fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let hash = hasher.finalize();

    let mut hash_array = [0u8; 20];
    hash_array.copy_from_slice(&hash[..20]);
    hash_array
}

fn invalid(reason: &str) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    async fn build(content: &[u8], name: &str, piece_length: u32) -> MetaData {
        build_metadata("memory://test", name, content.len() as u64, piece_length, content)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_info_hash_matches_canonical_encoding() {
        let metadata = build(b"abcd", "a.txt", 2).await;

        let mut expected = b"d6:lengthi4e4:name5:a.txt12:piece lengthi2e6:pieces40:".to_vec();
        expected.extend_from_slice(&sha1_digest(b"ab"));
        expected.extend_from_slice(&sha1_digest(b"cd"));
        expected.push(b'e');

        assert_eq!(bencode::encode(metadata.info_dict()), expected);
        assert_eq!(metadata.info_hash().as_bytes(), &sha1_digest(&expected));
    }

    #[tokio::test]
    async fn test_info_hash_is_deterministic() {
        let content = vec![7u8; 10_000];
        let first = build(&content, "movie.mkv", 4096).await;
        let second = build(&content, "movie.mkv", 4096).await;
        assert_eq!(first.info_hash(), second.info_hash());

        let renamed = build(&content, "other.mkv", 4096).await;
        assert_ne!(first.info_hash(), renamed.info_hash());

        let resized = build(&content, "movie.mkv", 2048).await;
        assert_ne!(first.info_hash(), resized.info_hash());
    }

    #[tokio::test]
    async fn test_flipped_byte_changes_one_piece() {
        let content: Vec<u8> = (0..=255u8).cycle().take(4096 * 3).collect();
        let mut flipped = content.clone();
        flipped[4096 + 10] ^= 0xff;

        let original = build(&content, "data.bin", 4096).await;
        let modified = build(&flipped, "data.bin", 4096).await;

        assert_eq!(original.piece_hashes()[0], modified.piece_hashes()[0]);
        assert_ne!(original.piece_hashes()[1], modified.piece_hashes()[1]);
        assert_eq!(original.piece_hashes()[2], modified.piece_hashes()[2]);
        assert_ne!(original.info_hash(), modified.info_hash());
    }

    #[tokio::test]
    async fn test_final_piece_covers_remainder() {
        let content = vec![1u8; 2500];
        let metadata = build(&content, "short.bin", 1024).await;

        assert_eq!(metadata.piece_count(), 3);
        assert_eq!(metadata.piece_hashes()[2], sha1_digest(&content[2048..]));
        assert_eq!(metadata.piece_size(PieceIndex::new(0)), Some(1024));
        assert_eq!(metadata.piece_size(PieceIndex::new(2)), Some(452));
        assert_eq!(metadata.piece_size(PieceIndex::new(3)), None);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_piece() {
        let metadata = build(&vec![9u8; 3072], "exact.bin", 1024).await;
        assert_eq!(metadata.piece_count(), 3);

        let empty = build(b"", "empty.bin", 1024).await;
        assert_eq!(empty.piece_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_piece_length_uses_default() {
        let metadata = build(b"hello", "hello.txt", 0).await;
        assert_eq!(metadata.piece_length(), DEFAULT_PIECE_LENGTH);
        assert_eq!(metadata.piece_count(), 1);
    }

    #[tokio::test]
    async fn test_read_error_aborts_creation() {
        let content = tokio_test::io::Builder::new()
            .read(b"first bytes")
            .read_error(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
            .build();

        let result = build_metadata("memory://broken", "broken.bin", 100, 4, content).await;
        match result {
            Err(TorrentError::Io(e)) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_file_size_rejected() {
        let result = build_metadata("memory://huge", "huge.bin", u64::MAX, 4, &b"abcd"[..]).await;
        assert!(matches!(
            result,
            Err(TorrentError::Bencode(BencodeError::UnsupportedValue { .. }))
        ));
    }

    #[tokio::test]
    async fn test_verify_piece() {
        let metadata = build(b"abcdef", "v.bin", 4).await;

        assert!(metadata.verify_piece(PieceIndex::new(0), b"abcd").is_ok());
        assert!(metadata.verify_piece(PieceIndex::new(1), b"ef").is_ok());
        assert!(matches!(
            metadata.verify_piece(PieceIndex::new(1), b"eX"),
            Err(TorrentError::PieceHashMismatch { .. })
        ));
        assert!(metadata.verify_piece(PieceIndex::new(5), b"").is_err());
    }

    #[tokio::test]
    async fn test_document_round_trip() {
        let metadata = build(&vec![3u8; 5000], "doc.bin", 2048).await;

        let parsed = MetaData::from_bencode(&metadata.to_bencode()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_document_validation() {
        assert!(matches!(
            MetaData::from_bencode(b"d6:source3:abce"),
            Err(TorrentError::InvalidTorrentFile { .. })
        ));
        assert!(matches!(
            MetaData::from_bencode(
                b"d4:infod6:lengthi1e4:name1:a12:piece lengthi1e6:pieces3:abcee"
            ),
            Err(TorrentError::InvalidTorrentFile { .. })
        ));
        assert!(matches!(
            MetaData::from_bencode(b"not bencode"),
            Err(TorrentError::Bencode(_))
        ));
    }

    fn document(info: BencodeValue) -> Vec<u8> {
        bencode::encode(&BencodeValue::dict([("info", info)]))
    }

    #[test]
    fn test_piece_count_must_cover_length() {
        let info = |length: i64, hashes: usize| {
            BencodeValue::dict([
                ("length", BencodeValue::Integer(length)),
                ("name", BencodeValue::string("a")),
                ("piece length", BencodeValue::Integer(1)),
                ("pieces", BencodeValue::ByteString(vec![0u8; 20 * hashes])),
            ])
        };

        assert!(MetaData::from_bencode(&document(info(3, 3))).is_ok());
        for (length, hashes) in [(1, 3), (3, 2), (0, 1)] {
            assert!(matches!(
                MetaData::from_bencode(&document(info(length, hashes))),
                Err(TorrentError::InvalidTorrentFile { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_info_keys_survive_parsing() {
        let info = BencodeValue::dict([
            ("length", BencodeValue::Integer(2)),
            ("name", BencodeValue::string("a")),
            ("piece length", BencodeValue::Integer(2)),
            ("pieces", BencodeValue::ByteString(sha1_digest(b"xy").to_vec())),
            ("private", BencodeValue::Integer(1)),
        ]);
        let expected = InfoHash::new(sha1_digest(&bencode::encode(&info)));

        let metadata = MetaData::from_bencode(&document(info)).unwrap();
        assert_eq!(metadata.info_hash(), expected);
        assert_eq!(
            sha1_digest(&bencode::encode(metadata.info_dict())),
            *expected.as_bytes()
        );
        assert!(metadata.info_dict().get(b"private").is_some());

        let reparsed = MetaData::from_bencode(&metadata.to_bencode()).unwrap();
        assert_eq!(reparsed.info_hash(), expected);
    }

    #[test]
    fn test_piece_length_is_capped() {
        assert_eq!(
            TorrentCreator::with_piece_length(u32::MAX).piece_length(),
            MAX_PIECE_LENGTH
        );
        assert_eq!(
            TorrentCreator::with_piece_length(MAX_PIECE_LENGTH).piece_length(),
            MAX_PIECE_LENGTH
        );
    }

    #[tokio::test]
    async fn test_create_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![5u8; 3000]).unwrap();
        file.flush().unwrap();

        let creator = TorrentCreator::with_piece_length(1000);
        let metadata = creator.create_from_file(file.path()).await.unwrap();

        assert_eq!(metadata.total_size(), 3000);
        assert_eq!(metadata.piece_count(), 3);
        assert_eq!(metadata.source(), file.path().display().to_string());

        let in_memory = build_metadata(
            metadata.source(),
            metadata.name(),
            3000,
            1000,
            &vec![5u8; 3000][..],
        )
        .await
        .unwrap();
        assert_eq!(in_memory.info_hash(), metadata.info_hash());
    }
}
