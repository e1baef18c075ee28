//! Binary codec primitives for fixed-layout wire messages.
//!
//! All fixed-width integers are little-endian. Variable-length data is
//! prefixed with a compact-size integer:
//!
//! | value range                | encoding             |
//! |----------------------------|----------------------|
//! | `0 ..= 0xFC`               | 1 byte               |
//! | `0xFD ..= 0xFFFF`          | `0xFD` + `u16` (3 B) |
//! | `0x1_0000 ..= 0xFFFF_FFFF` | `0xFE` + `u32` (5 B) |
//! | above                      | `0xFF` + `u64` (9 B) |
//!
//! Decoding rejects non-canonical prefixes (a value that fits a shorter form).

use crate::DecodeError;

const PREFIX_U16: u8 = 0xFD;
const PREFIX_U32: u8 = 0xFE;
const PREFIX_U64: u8 = 0xFF;

/// Number of bytes the compact-size encoding of `value` occupies.
pub fn var_int_len(value: u64) -> usize {
    if value < PREFIX_U16 as u64 {
        1
    } else if value <= 0xFFFF {
        3
    } else if value <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Append-only little-endian writer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Write a compact-size integer using the shortest form.
    pub fn write_var_int(&mut self, value: u64) {
        match var_int_len(value) {
            1 => self.write_u8(value as u8),
            3 => {
                self.write_u8(PREFIX_U16);
                self.write_u16(value as u16);
            }
            5 => {
                self.write_u8(PREFIX_U32);
                self.write_u32(value as u32);
            }
            _ => {
                self.write_u8(PREFIX_U64);
                self.write_u64(value);
            }
        }
    }

    /// Write a compact-size length followed by the raw bytes.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_var_string(&mut self, s: &str) {
        self.write_var_bytes(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a borrowed byte slice.
///
/// Every read either consumes exactly the bytes it needs or fails without
/// consuming anything.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(DecodeError::Truncated { needed, remaining });
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Any non-zero byte reads as `true`.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a compact-size integer, rejecting non-canonical encodings.
    pub fn read_var_int(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let result = self.read_var_int_inner();
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn read_var_int_inner(&mut self) -> Result<u64, DecodeError> {
        let (value, minimum) = match self.read_u8()? {
            PREFIX_U16 => (self.read_u16()? as u64, PREFIX_U16 as u64),
            PREFIX_U32 => (self.read_u32()? as u64, 0x1_0000),
            PREFIX_U64 => (self.read_u64()?, 0x1_0000_0000),
            small => return Ok(small as u64),
        };
        if value < minimum {
            return Err(DecodeError::InvalidEncoding(format!(
                "non-canonical compact size {value}"
            )));
        }
        Ok(value)
    }

    /// Read a compact-size length followed by that many bytes.
    ///
    /// Lengths above `max_len` are rejected, and lengths beyond the bytes
    /// left are reported as truncation, before any payload is read.
    pub fn read_var_bytes(&mut self, max_len: usize) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let len = self.read_var_int()?;
        if len > max_len as u64 {
            self.pos = start;
            return Err(DecodeError::InvalidEncoding(format!(
                "length {len} exceeds limit {max_len}"
            )));
        }
        let remaining = self.remaining();
        if len > remaining as u64 {
            self.pos = start;
            return Err(DecodeError::Truncated {
                needed: usize::try_from(len).unwrap_or(usize::MAX),
                remaining,
            });
        }
        self.take(len as usize)
    }

    pub fn read_var_string(&mut self, max_len: usize) -> Result<String, DecodeError> {
        let start = self.pos;
        let bytes = self.read_var_bytes(max_len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(e) => {
                self.pos = start;
                Err(DecodeError::InvalidEncoding(format!("invalid UTF-8: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_var_int(value: u64) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_var_int(value);
        w.into_bytes()
    }

    #[test]
    fn var_int_uses_shortest_form_at_boundaries() {
        assert_eq!(encode_var_int(0xFC), vec![0xFC]);
        assert_eq!(encode_var_int(0xFD), vec![0xFD, 0xFD, 0x00]);
        assert_eq!(encode_var_int(0xFFFF), vec![0xFD, 0xFF, 0xFF]);
        assert_eq!(encode_var_int(0x1_0000), vec![0xFE, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(encode_var_int(0x1_0000_0000).len(), 9);
        for value in [0u64, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, u64::MAX] {
            assert_eq!(encode_var_int(value).len(), var_int_len(value));
        }
    }

    #[test]
    fn var_int_reads_back() {
        for value in [0u64, 1, 0xFC, 0xFD, 0x1234, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, u64::MAX] {
            let bytes = encode_var_int(value);
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_var_int().unwrap(), value);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn non_canonical_var_int_rejected() {
        // 5 encoded with the 3-byte form.
        let bytes = [0xFD, 0x05, 0x00];
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.read_var_int(),
            Err(DecodeError::InvalidEncoding(_))
        ));
        assert_eq!(r.position(), 0);

        let bytes = [0xFE, 0xFF, 0xFF, 0x00, 0x00];
        assert!(matches!(
            Reader::new(&bytes).read_var_int(),
            Err(DecodeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn truncated_var_int_reports_truncation() {
        let bytes = [0xFE, 0x01, 0x02];
        let mut r = Reader::new(&bytes);
        assert!(matches!(r.read_var_int(), Err(DecodeError::Truncated { .. })));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn oversized_length_rejected_before_payload() {
        let mut w = Writer::new();
        w.write_var_bytes(&[0u8; 10]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.read_var_bytes(4),
            Err(DecodeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn declared_length_past_the_buffer_is_truncated() {
        let mut w = Writer::new();
        w.write_var_int(u64::MAX);
        w.write_u8(0xAA);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.read_var_bytes(usize::MAX),
            Err(DecodeError::Truncated { remaining: 1, .. })
        ));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn invalid_utf8_rejected() {
        let bytes = [0x02, 0xC3, 0x28];
        assert!(matches!(
            Reader::new(&bytes).read_var_string(16),
            Err(DecodeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn fixed_width_reads_are_little_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 0x0403_0201);
        assert!(matches!(
            r.read_u8(),
            Err(DecodeError::Truncated {
                needed: 1,
                remaining: 0
            })
        ));
    }
}
