//! Bounds-checked little-endian cursor over one frame.

use thiserror::Error;

/// Errors raised while decoding a primary frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A read needed more bytes than the buffer holds.
    #[error("frame truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Opcode this decoder does not interpret. Frames carrying one are passed
    /// through untouched.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
}

/// Cursor that never reads past the end of its buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn truncated(&self, needed: usize) -> DecodeError {
        DecodeError::Truncated {
            offset: self.pos,
            needed,
            available: self.remaining(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(self.truncated(n));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Fail unless `count` records of `record_len` bytes could still fit.
    /// Rejects implausible counts before any record is read.
    pub fn ensure_records(&self, count: usize, record_len: usize) -> Result<(), DecodeError> {
        match count.checked_mul(record_len) {
            Some(needed) if needed <= self.remaining() => Ok(()),
            Some(needed) => Err(self.truncated(needed)),
            None => Err(self.truncated(usize::MAX)),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    /// Everything left in the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn i16_le(&mut self) -> Result<i16, DecodeError> {
        self.array().map(i16::from_le_bytes)
    }

    pub fn u32_le(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn i32_le(&mut self) -> Result<i32, DecodeError> {
        self.array().map(i32::from_le_bytes)
    }

    pub fn f64_le(&mut self) -> Result<f64, DecodeError> {
        self.array().map(f64::from_le_bytes)
    }

    /// Zero-terminated byte string, each byte taken as a Latin-1 code point.
    pub fn latin1_z(&mut self) -> Result<String, DecodeError> {
        let rest = &self.buf[self.pos..];
        let Some(len) = rest.iter().position(|&b| b == 0) else {
            return Err(self.truncated(rest.len() + 1));
        };
        let text = rest[..len].iter().map(|&b| char::from(b)).collect();
        self.pos += len + 1;
        Ok(text)
    }

    /// Zero-terminated string of little-endian UTF-16 code units. The
    /// terminator is consumed but not returned.
    pub fn utf16_z(&mut self) -> Result<Vec<u16>, DecodeError> {
        let start = self.pos;
        let mut units = Vec::new();
        loop {
            let unit = match self.u16_le() {
                Ok(unit) => unit,
                Err(_) => {
                    self.pos = start;
                    return Err(self.truncated(self.remaining() + 2));
                }
            };
            if unit == 0 {
                return Ok(units);
            }
            units.push(unit);
        }
    }
}
