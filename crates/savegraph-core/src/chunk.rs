//! Save container: header and chunk table.
//!
//! The body of a save is split into chunks that may be stored or
//! zlib-compressed and may appear in any order in the file. Each chunk is
//! decoded and validated on its own (length and xxHash32 checksum), then the
//! body is assembled strictly by declared chunk index.

use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh32::xxh32;

use crate::error::{CorruptKind, ParseError};
use crate::reader::ByteReader;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const SAVE_MAGIC: [u8; 4] = *b"FGSV";

/// Oldest format version this build can read.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Newest format version this build can read.
pub const CURRENT_VERSION: u32 = 3;

/// Marker at the start of every chunk header.
pub const CHUNK_TAG: u32 = 0x9E2A_83C1;

pub const CHECKSUM_SEED: u32 = 0;

/// Bytes in a chunk header before the payload.
pub const CHUNK_HEADER_LEN: usize = 21;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveHeader {
    pub format_version: u32,
    pub build_number: u32,
    pub session_name: String,
    pub play_seconds: u64,
    pub chunk_count: u32,
}

/// Read and validate the header. The version is checked before anything
/// after it is read.
pub fn read_header(reader: &mut ByteReader<'_>) -> Result<SaveHeader, ParseError> {
    let magic_at = reader.offset();
    let magic = reader.read_magic()?;
    if magic != SAVE_MAGIC {
        return Err(ParseError::corrupt(magic_at, CorruptKind::BadMagic(magic)));
    }
    let format_version = reader.read_u32()?;
    if !(MIN_SUPPORTED_VERSION..=CURRENT_VERSION).contains(&format_version) {
        return Err(ParseError::UnsupportedVersion {
            found: format_version,
            min: MIN_SUPPORTED_VERSION,
            max: CURRENT_VERSION,
        });
    }
    let build_number = reader.read_u32()?;
    let session_name = reader.read_string()?;
    let play_seconds = reader.read_u64()?;
    let chunk_count = reader.read_count(CHUNK_HEADER_LEN)? as u32;
    Ok(SaveHeader {
        format_version,
        build_number,
        session_name,
        play_seconds,
        chunk_count,
    })
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Zlib,
}

impl Compression {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Compression::Stored),
            1 => Some(Compression::Zlib),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Compression::Stored => 0,
            Compression::Zlib => 1,
        }
    }
}

/// A chunk as laid out in the file, not yet decoded.
#[derive(Debug, Clone)]
pub struct RawChunk<'a> {
    pub index: u32,
    pub compression: Compression,
    pub uncompressed_len: u32,
    pub checksum: u32,
    pub payload: &'a [u8],
    /// Offset of the payload in the file.
    pub payload_offset: u64,
}

/// Read the chunk table and return the chunks ordered by index.
///
/// Indices must be exactly `0..chunk_count`. The sum of the declared
/// uncompressed sizes is checked against the limit.
pub fn read_chunks<'a>(
    reader: &mut ByteReader<'a>,
    header: &SaveHeader,
) -> Result<Vec<RawChunk<'a>>, ParseError> {
    let count = header.chunk_count;
    let mut slots: Vec<Option<RawChunk<'a>>> = vec![None; count as usize];
    let mut total: u64 = 0;

    for _ in 0..count {
        let header_at = reader.offset();
        let tag = reader.read_u32()?;
        if tag != CHUNK_TAG {
            return Err(ParseError::corrupt(header_at, CorruptKind::BadChunkTag(tag)));
        }
        let index_at = reader.offset();
        let index = reader.read_u32()?;
        let bad_index = ParseError::corrupt(
            index_at,
            CorruptKind::ChunkIndex {
                index,
                chunk_count: count,
            },
        );
        let slot = slots.get_mut(index as usize).ok_or_else(|| bad_index.clone())?;
        if slot.is_some() {
            return Err(bad_index);
        }

        let compression_at = reader.offset();
        let raw_compression = reader.read_u8()?;
        let compression = Compression::from_u8(raw_compression).ok_or_else(|| {
            ParseError::corrupt(
                compression_at,
                CorruptKind::UnknownCompression(raw_compression),
            )
        })?;
        let compressed_len = reader.read_len()?;
        let uncompressed_at = reader.offset();
        let uncompressed_len = reader.read_u32()?;
        total += u64::from(uncompressed_len);
        reader.check_limit(total, uncompressed_at)?;
        let checksum = reader.read_u32()?;
        let payload_offset = reader.offset();
        let payload = reader.read_bytes(compressed_len)?;

        *slot = Some(RawChunk {
            index,
            compression,
            uncompressed_len,
            checksum,
            payload,
            payload_offset,
        });
    }

    // With `count` reads into `count` distinct in-range slots every slot is
    // filled; a gap would already have surfaced as a duplicate.
    Ok(slots.into_iter().flatten().collect())
}

/// Decompress and validate one chunk.
pub fn decode_chunk(chunk: &RawChunk<'_>) -> Result<Vec<u8>, ParseError> {
    let declared = u64::from(chunk.uncompressed_len);
    let data = match chunk.compression {
        Compression::Stored => chunk.payload.to_vec(),
        Compression::Zlib => {
            let mut out = Vec::with_capacity(chunk.uncompressed_len as usize);
            // One byte past the declared size is enough to detect overrun.
            ZlibDecoder::new(chunk.payload)
                .take(declared + 1)
                .read_to_end(&mut out)
                .map_err(|e| {
                    ParseError::corrupt(chunk.payload_offset, CorruptKind::Decompress(e.to_string()))
                })?;
            out
        }
    };
    if data.len() as u64 != declared {
        return Err(ParseError::corrupt(
            chunk.payload_offset,
            CorruptKind::LengthMismatch {
                declared,
                actual: data.len() as u64,
            },
        ));
    }
    let actual = xxh32(&data, CHECKSUM_SEED);
    if actual != chunk.checksum {
        return Err(ParseError::corrupt(
            chunk.payload_offset,
            CorruptKind::ChecksumMismatch {
                expected: chunk.checksum,
                actual,
            },
        ));
    }
    tracing::debug!(
        index = chunk.index,
        compressed = chunk.payload.len(),
        uncompressed = data.len(),
        "decoded chunk"
    );
    Ok(data)
}

#[cfg(any(test, not(feature = "parallel")))]
fn decode_sequential(chunks: &[RawChunk<'_>]) -> Vec<Result<Vec<u8>, ParseError>> {
    chunks.iter().map(decode_chunk).collect()
}

/// Decode on the rayon pool. The output keeps the input order.
#[cfg(feature = "parallel")]
fn decode_parallel(chunks: &[RawChunk<'_>]) -> Vec<Result<Vec<u8>, ParseError>> {
    use rayon::prelude::*;
    chunks.par_iter().map(decode_chunk).collect()
}

/// Decode every chunk and concatenate them in index order.
///
/// With the `parallel` feature chunks are decoded on the rayon pool. Results
/// are collected per chunk, so the reported error is always the first one in
/// index order.
pub fn assemble_body(chunks: &[RawChunk<'_>]) -> Result<Vec<u8>, ParseError> {
    #[cfg(feature = "parallel")]
    let decoded = decode_parallel(chunks);
    #[cfg(not(feature = "parallel"))]
    let decoded = decode_sequential(chunks);

    let total: usize = chunks.iter().map(|c| c.uncompressed_len as usize).sum();
    let mut body = Vec::with_capacity(total);
    for part in decoded {
        body.extend_from_slice(&part?);
    }
    Ok(body)
}

/// Header, assembled body and the number of bytes after the last chunk.
#[derive(Debug, Clone)]
pub struct Container {
    pub header: SaveHeader,
    pub body: Vec<u8>,
    pub trailing_file_bytes: u64,
}

pub fn read_container(bytes: &[u8], limit: u64) -> Result<Container, ParseError> {
    let mut reader = ByteReader::new(bytes, limit);
    let header = read_header(&mut reader)?;
    let chunks = read_chunks(&mut reader, &header)?;
    let body = assemble_body(&chunks)?;
    Ok(Container {
        header,
        body,
        trailing_file_bytes: reader.remaining() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ChunkSpec, SaveWriter};

    const LIMIT: u64 = 1 << 20;

    #[test]
    fn reads_header_fields() {
        let bytes = SaveWriter::new(2).session("Alpha").play_seconds(90).finish();
        let container = read_container(&bytes, LIMIT).unwrap();
        assert_eq!(container.header.format_version, 2);
        assert_eq!(container.header.session_name, "Alpha");
        assert_eq!(container.header.play_seconds, 90);
        assert_eq!(container.trailing_file_bytes, 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = SaveWriter::new(1).finish();
        bytes[0] = b'X';
        assert!(matches!(
            read_container(&bytes, LIMIT),
            Err(ParseError::CorruptSave {
                offset: 0,
                kind: CorruptKind::BadMagic(_)
            })
        ));
    }

    #[test]
    fn rejects_unsupported_version_before_chunks() {
        let mut bytes = SaveWriter::new(1).finish();
        bytes[4..8].copy_from_slice(&9u32.to_le_bytes());
        // Truncate right after the version; the version error must still win.
        bytes.truncate(8);
        assert_eq!(
            read_container(&bytes, LIMIT).unwrap_err(),
            ParseError::UnsupportedVersion {
                found: 9,
                min: MIN_SUPPORTED_VERSION,
                max: CURRENT_VERSION
            }
        );
    }

    #[test]
    fn assembles_chunks_by_index_not_file_order() {
        let body: Vec<u8> = (0u8..=99).collect();
        let bytes = SaveWriter::new(3)
            .raw_body(&body)
            .chunks(vec![
                ChunkSpec::range(2, 60..100, Compression::Zlib),
                ChunkSpec::range(0, 0..30, Compression::Stored),
                ChunkSpec::range(1, 30..60, Compression::Zlib),
            ])
            .finish();
        let container = read_container(&bytes, LIMIT).unwrap();
        assert_eq!(container.body, body);
    }

    #[test]
    fn duplicate_chunk_index_is_corrupt() {
        let body = vec![1u8; 10];
        let bytes = SaveWriter::new(3)
            .raw_body(&body)
            .chunks(vec![
                ChunkSpec::range(0, 0..5, Compression::Stored),
                ChunkSpec::range(0, 5..10, Compression::Stored),
            ])
            .finish();
        assert!(matches!(
            read_container(&bytes, LIMIT),
            Err(ParseError::CorruptSave {
                kind: CorruptKind::ChunkIndex { index: 0, .. },
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_chunk_index_is_corrupt() {
        let body = vec![1u8; 10];
        let bytes = SaveWriter::new(3)
            .raw_body(&body)
            .chunks(vec![
                ChunkSpec::range(0, 0..5, Compression::Stored),
                ChunkSpec::range(2, 5..10, Compression::Stored),
            ])
            .finish();
        assert!(matches!(
            read_container(&bytes, LIMIT),
            Err(ParseError::CorruptSave {
                kind: CorruptKind::ChunkIndex { index: 2, chunk_count: 2 },
                ..
            })
        ));
    }

    #[test]
    fn checksum_mismatch_is_corrupt() {
        let body = vec![7u8; 16];
        let bytes = SaveWriter::new(3)
            .raw_body(&body)
            .chunks(vec![ChunkSpec::range(0, 0..16, Compression::Stored).with_checksum(1)])
            .finish();
        assert!(matches!(
            read_container(&bytes, LIMIT),
            Err(ParseError::CorruptSave {
                kind: CorruptKind::ChecksumMismatch { expected: 1, .. },
                ..
            })
        ));
    }

    #[test]
    fn garbage_zlib_payload_is_corrupt() {
        let chunk = RawChunk {
            index: 0,
            compression: Compression::Zlib,
            uncompressed_len: 4,
            checksum: 0,
            payload: &[0xDE, 0xAD, 0xBE, 0xEF],
            payload_offset: 40,
        };
        assert!(matches!(
            decode_chunk(&chunk),
            Err(ParseError::CorruptSave { offset: 40, .. })
        ));
    }

    #[test]
    fn declared_size_over_limit_is_resource_error() {
        let body = vec![0u8; 64];
        let bytes = SaveWriter::new(3).raw_body(&body).finish();
        assert!(matches!(
            read_container(&bytes, 32),
            Err(ParseError::ResourceLimitExceeded { declared: 64, limit: 32, .. })
        ));
    }

    #[test]
    fn first_error_in_index_order_wins() {
        let body = vec![3u8; 20];
        let bytes = SaveWriter::new(3)
            .raw_body(&body)
            .chunks(vec![
                ChunkSpec::range(1, 10..20, Compression::Stored).with_checksum(11),
                ChunkSpec::range(0, 0..10, Compression::Stored).with_checksum(10),
            ])
            .finish();
        assert!(matches!(
            read_container(&bytes, LIMIT),
            Err(ParseError::CorruptSave {
                kind: CorruptKind::ChecksumMismatch { expected: 10, .. },
                ..
            })
        ));
    }

    /// 64 chunks of 16 bytes, alternating compression, in reverse file order.
    fn many_chunks(bad: &[u32]) -> (Vec<u8>, Vec<u8>) {
        let body: Vec<u8> = (0..1024u32).map(|i| (i * 7 % 251) as u8).collect();
        let specs = (0..64u32)
            .rev()
            .map(|i| {
                let start = i as usize * 16;
                let compression = if i % 2 == 0 {
                    Compression::Zlib
                } else {
                    Compression::Stored
                };
                let spec = ChunkSpec::range(i, start..start + 16, compression);
                if bad.contains(&i) {
                    spec.with_checksum(1000 + i)
                } else {
                    spec
                }
            })
            .collect();
        let bytes = SaveWriter::new(3).raw_body(&body).chunks(specs).finish();
        (body, bytes)
    }

    #[test]
    fn many_chunks_assemble_in_index_order() {
        let (body, bytes) = many_chunks(&[]);
        assert_eq!(read_container(&bytes, LIMIT).unwrap().body, body);
    }

    #[test]
    fn lowest_failing_index_is_reported_among_many() {
        let (_, bytes) = many_chunks(&[63, 40, 5]);
        for _ in 0..8 {
            assert!(matches!(
                read_container(&bytes, LIMIT),
                Err(ParseError::CorruptSave {
                    kind: CorruptKind::ChecksumMismatch { expected: 1005, .. },
                    ..
                })
            ));
        }
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_decode_matches_sequential() {
        for bad in [&[][..], &[7], &[2, 33, 60]] {
            let (_, bytes) = many_chunks(bad);
            let mut reader = ByteReader::new(&bytes, LIMIT);
            let header = read_header(&mut reader).unwrap();
            let chunks = read_chunks(&mut reader, &header).unwrap();
            assert_eq!(decode_parallel(&chunks), decode_sequential(&chunks));
        }
    }

    #[test]
    fn trailing_file_bytes_are_counted() {
        let mut bytes = SaveWriter::new(3).finish();
        bytes.extend_from_slice(&[0xAA; 5]);
        assert_eq!(read_container(&bytes, LIMIT).unwrap().trailing_file_bytes, 5);
    }
}
