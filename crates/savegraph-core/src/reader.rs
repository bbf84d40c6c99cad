//! Bounds-checked little-endian reader.
//!
//! Every length or count read from the stream is checked against the
//! configured limit and against the bytes actually remaining before anything
//! is allocated for it.

use crate::error::{CorruptKind, ParseError};

pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Absolute offset of `data[0]` in the enclosing stream.
    base: u64,
    limit: u64,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], limit: u64) -> Self {
        Self::with_base(data, 0, limit)
    }

    pub fn with_base(data: &'a [u8], base: u64, limit: u64) -> Self {
        Self {
            data,
            pos: 0,
            base,
            limit,
        }
    }

    /// Absolute offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn truncated(&self, needed: u64) -> ParseError {
        self.truncated_at(self.offset(), needed)
    }

    fn truncated_at(&self, at: u64, needed: u64) -> ParseError {
        ParseError::corrupt(
            at,
            CorruptKind::Truncated {
                needed,
                available: self.remaining() as u64,
            },
        )
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let end = self.pos + N;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| self.truncated(N as u64))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ParseError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ParseError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ParseError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    pub fn read_magic(&mut self) -> Result<[u8; 4], ParseError> {
        self.take()
    }

    /// Check a declared size read at `at` against the configured limit.
    pub fn check_limit(&self, declared: u64, at: u64) -> Result<(), ParseError> {
        if declared > self.limit {
            return Err(ParseError::ResourceLimitExceeded {
                declared,
                limit: self.limit,
                offset: at,
            });
        }
        Ok(())
    }

    /// Read a `u32` byte length and check it against the limit and the
    /// remaining input.
    pub fn read_len(&mut self) -> Result<usize, ParseError> {
        let at = self.offset();
        let declared = u64::from(self.read_u32()?);
        self.check_limit(declared, at)?;
        if declared > self.remaining() as u64 {
            return Err(self.truncated_at(at, declared));
        }
        Ok(declared as usize)
    }

    /// Read a `u32` element count. Each element occupies at least
    /// `min_element_size` bytes, which bounds the count by the remaining input.
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize, ParseError> {
        let at = self.offset();
        let declared = u64::from(self.read_u32()?);
        self.check_limit(declared, at)?;
        let needed = declared.saturating_mul(min_element_size.max(1) as u64);
        if needed > self.remaining() as u64 {
            return Err(self.truncated_at(at, needed));
        }
        Ok(declared as usize)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.truncated(len as u64))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, ParseError> {
        let len = self.read_len()?;
        let at = self.offset();
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ParseError::corrupt(at, CorruptKind::InvalidUtf8))
    }

    /// Split off the next `len` bytes as an independent reader.
    pub fn sub_reader(&mut self, len: usize) -> Result<ByteReader<'a>, ParseError> {
        let base = self.offset();
        let bytes = self.read_bytes(len)?;
        Ok(ByteReader::with_base(bytes, base, self.limit))
    }

    /// Consume and return everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_primitives() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&(-3i64).to_le_bytes());
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        let mut r = ByteReader::new(&bytes, 1024);
        assert_eq!(r.read_u32().unwrap(), 7);
        assert_eq!(r.read_i64().unwrap(), -3);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert!(r.is_empty());
    }

    #[test]
    fn truncated_primitive_reports_offset() {
        let mut r = ByteReader::with_base(&[1, 2], 100, 1024);
        let err = r.read_u32().unwrap_err();
        assert_eq!(
            err,
            ParseError::corrupt(
                100,
                CorruptKind::Truncated {
                    needed: 4,
                    available: 2
                }
            )
        );
    }

    #[test]
    fn length_over_limit_is_resource_error() {
        let bytes = 1000u32.to_le_bytes();
        let mut r = ByteReader::new(&bytes, 16);
        assert_eq!(
            r.read_len().unwrap_err(),
            ParseError::ResourceLimitExceeded {
                declared: 1000,
                limit: 16,
                offset: 0
            }
        );
    }

    #[test]
    fn length_over_remaining_is_truncation() {
        let mut bytes = 10u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut r = ByteReader::new(&bytes, 1024);
        assert!(matches!(
            r.read_len().unwrap_err(),
            ParseError::CorruptSave {
                kind: CorruptKind::Truncated { needed: 10, .. },
                ..
            }
        ));
    }

    #[test]
    fn strings_validate_utf8() {
        let mut ok = 2u32.to_le_bytes().to_vec();
        ok.extend_from_slice(b"hi");
        assert_eq!(ByteReader::new(&ok, 64).read_string().unwrap(), "hi");

        let mut bad = 2u32.to_le_bytes().to_vec();
        bad.extend_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            ByteReader::new(&bad, 64).read_string().unwrap_err(),
            ParseError::CorruptSave {
                offset: 4,
                kind: CorruptKind::InvalidUtf8
            }
        ));
    }

    #[test]
    fn count_is_bounded_by_remaining_bytes() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let mut r = ByteReader::new(&bytes, 1024);
        assert!(r.read_count(4).is_err());
        let mut r = ByteReader::new(&bytes, 1024);
        assert_eq!(r.read_count(2).unwrap(), 3);
    }

    #[test]
    fn sub_reader_keeps_absolute_offsets() {
        let bytes = [0u8; 12];
        let mut r = ByteReader::with_base(&bytes, 50, 64);
        r.read_u32().unwrap();
        let mut sub = r.sub_reader(4).unwrap();
        assert_eq!(sub.offset(), 54);
        sub.read_u32().unwrap();
        assert!(sub.is_empty());
        assert_eq!(r.offset(), 58);
        assert_eq!(r.rest().len(), 4);
    }
}
