//! Bounds-checked byte reading shared by the RPC transport and the GBX decoder

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

/// Longest length-prefixed string accepted, large enough for embedded XML blocks
pub const MAX_STRING_LENGTH: u32 = 0x18000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("insufficient data for {wanted} bytes at pos 0x{position:04X} ({available} available)")]
    Truncated {
        wanted: usize,
        position: usize,
        available: usize,
    },

    #[error("invalid string length {length} (0x{length:04X}) at pos 0x{position:04X}")]
    InvalidStringLength { length: u32, position: usize },

    #[error("cannot seek to 0x{offset:04X} in a {len} byte buffer")]
    SeekOutOfBounds { offset: usize, len: usize },
}

/// Byte order applied to multi-byte integer reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the machine we are running on
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

/// Forward-only reader over an in-memory buffer.
///
/// Every read either consumes exactly the requested number of bytes or fails
/// with [`CursorError::Truncated`] and leaves the position untouched. The only
/// way back is an explicit [`ByteCursor::seek`].
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    order: Endianness,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_order(buf, Endianness::Little)
    }

    pub fn with_order(buf: &'a [u8], order: Endianness) -> Self {
        Self { buf, pos: 0, order }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn order(&self) -> Endianness {
        self.order
    }

    /// Moves to an absolute offset. Used to jump to a chunk's declared start.
    pub fn seek(&mut self, offset: usize) -> Result<(), CursorError> {
        if offset > self.buf.len() {
            return Err(CursorError::SeekOutOfBounds {
                offset,
                len: self.buf.len(),
            });
        }
        self.pos = offset;
        Ok(())
    }

    pub fn read(&mut self, n: usize) -> Result<&'a [u8], CursorError> {
        if n > self.remaining() {
            return Err(CursorError::Truncated {
                wanted: n,
                position: self.pos,
                available: self.remaining(),
            });
        }

        let data = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(data)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CursorError> {
        self.read(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.read(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CursorError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        let data = self.read(2)?;
        Ok(match self.order {
            Endianness::Little => LittleEndian::read_u16(data),
            Endianness::Big => BigEndian::read_u16(data),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16, CursorError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        let data = self.read(4)?;
        Ok(match self.order {
            Endianness::Little => LittleEndian::read_u32(data),
            Endianness::Big => BigEndian::read_u32(data),
        })
    }

    pub fn read_i32(&mut self) -> Result<i32, CursorError> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a 4-byte length (top bit ignored) followed by that many bytes.
    ///
    /// A zero length yields an empty string. Lengths above
    /// [`MAX_STRING_LENGTH`] are rejected without consuming anything.
    pub fn read_length_prefixed_string(&mut self) -> Result<String, CursorError> {
        let data = self.read_length_prefixed_bytes()?;
        Ok(String::from_utf8_lossy(data).into_owned())
    }

    /// Same framing as [`ByteCursor::read_length_prefixed_string`], without
    /// any text decoding
    pub fn read_length_prefixed_bytes(&mut self) -> Result<&'a [u8], CursorError> {
        let start = self.pos;
        let length = self.read_u32()? & 0x7FFF_FFFF;

        if length > MAX_STRING_LENGTH {
            self.pos = start;
            return Err(CursorError::InvalidStringLength {
                length,
                position: start,
            });
        }

        match self.read(length as usize) {
            Ok(data) => Ok(data),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }
}

/// Removes every UTF-8 byte order mark from a decoded string
pub fn strip_bom(s: &str) -> String {
    s.replace('\u{FEFF}', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixed(bytes: &[u8]) -> Vec<u8> {
        let mut data = (bytes.len() as u32).to_le_bytes().to_vec();
        data.extend_from_slice(bytes);
        data
    }

    #[test]
    fn test_read_advances_exactly() {
        let data = [1u8, 2, 3, 4, 5];
        let mut cursor = ByteCursor::new(&data);

        assert_eq!(cursor.read(2).unwrap(), &[1, 2]);
        assert_eq!(cursor.position(), 2);
        assert_eq!(cursor.remaining(), 3);
        assert_eq!(cursor.read(3).unwrap(), &[3, 4, 5]);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_read_past_end_fails_without_advancing() {
        let data = [1u8, 2, 3];
        let mut cursor = ByteCursor::new(&data);
        cursor.read(1).unwrap();

        let err = cursor.read(3).unwrap_err();
        assert_eq!(
            err,
            CursorError::Truncated {
                wanted: 3,
                position: 1,
                available: 2
            }
        );
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_skip_is_bounds_checked() {
        let data = [0u8; 4];
        let mut cursor = ByteCursor::new(&data);
        assert!(cursor.skip(4).is_ok());
        assert!(cursor.skip(1).is_err());
    }

    #[test]
    fn test_little_endian_integers() {
        let data = [0xFE, 0xFF, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF];
        let mut cursor = ByteCursor::new(&data);

        assert_eq!(cursor.read_i16().unwrap(), -2);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(cursor.read_i8().unwrap(), -1);
    }

    #[test]
    fn test_big_endian_integers() {
        let data = [0x12, 0x34, 0x56, 0x78, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut cursor = ByteCursor::with_order(&data, Endianness::Big);

        assert_eq!(cursor.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(cursor.read_i32().unwrap(), -2);
    }

    #[test]
    fn test_byte_orders_are_symmetric() {
        let value: i32 = -123_456;
        let le = value.to_le_bytes();
        let be = value.to_be_bytes();

        assert_eq!(ByteCursor::new(&le).read_i32().unwrap(), value);
        assert_eq!(
            ByteCursor::with_order(&be, Endianness::Big)
                .read_i32()
                .unwrap(),
            value
        );
    }

    #[test]
    fn test_native_order_matches_target() {
        let probe = 1u32.to_ne_bytes();
        let mut cursor = ByteCursor::with_order(&probe, Endianness::native());
        assert_eq!(cursor.read_u32().unwrap(), 1);
    }

    #[test]
    fn test_length_prefixed_string() {
        let data = prefixed(b"Stadium");
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_length_prefixed_string().unwrap(), "Stadium");
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_length_prefixed_string_masks_top_bit() {
        let mut data = (0x8000_0003u32).to_le_bytes().to_vec();
        data.extend_from_slice(b"abc");
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_length_prefixed_string().unwrap(), "abc");
    }

    #[test]
    fn test_length_prefixed_bytes_keep_invalid_utf8() {
        let data = prefixed(b"Caf\xE9");
        let mut cursor = ByteCursor::new(&data);
        let bytes = cursor.read_length_prefixed_bytes().unwrap();
        assert_eq!(bytes, b"Caf\xE9");
        assert_eq!(bytes.len(), 4);
        assert_eq!(cursor.remaining(), 0);

        // Lossy decoding replaces the byte and changes the length
        let mut cursor = ByteCursor::new(&data);
        let text = cursor.read_length_prefixed_string().unwrap();
        assert_eq!(text, "Caf\u{FFFD}");
        assert_eq!(text.len(), 6);
    }

    #[test]
    fn test_zero_length_string_is_empty() {
        let data = 0u32.to_le_bytes();
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_length_prefixed_string().unwrap(), "");
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn test_oversized_string_length_rejected() {
        let mut data = (MAX_STRING_LENGTH + 1).to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 16]);
        let mut cursor = ByteCursor::new(&data);

        match cursor.read_length_prefixed_string() {
            Err(CursorError::InvalidStringLength { length, position }) => {
                assert_eq!(length, MAX_STRING_LENGTH + 1);
                assert_eq!(position, 0);
            }
            other => panic!("Expected InvalidStringLength, got {:?}", other),
        }
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_truncated_string_body_fails() {
        let mut data = 10u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"short");
        let mut cursor = ByteCursor::new(&data);

        assert!(matches!(
            cursor.read_length_prefixed_string(),
            Err(CursorError::Truncated { wanted: 10, .. })
        ));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_seek() {
        let data = [0u8; 8];
        let mut cursor = ByteCursor::new(&data);
        cursor.seek(6).unwrap();
        assert_eq!(cursor.remaining(), 2);
        cursor.seek(0).unwrap();
        assert_eq!(cursor.position(), 0);
        assert_eq!(
            cursor.seek(9),
            Err(CursorError::SeekOutOfBounds { offset: 9, len: 8 })
        );
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{FEFF}Nadeo"), "Nadeo");
        assert_eq!(strip_bom("plain"), "plain");
    }
}
