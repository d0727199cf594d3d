// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked little-endian decoding helpers.
//!
//! Every decoder in this crate reads peer-supplied bytes through [`Reader`],
//! so a truncated or over-length field surfaces as a [`DecodeError`] and
//! never as a panic.

use thiserror::Error;

/// Errors produced while decoding a wire buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not enough bytes left for the next field.
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A field holds a value outside its defined range.
    #[error("invalid {field}: 0x{value:x}")]
    InvalidValue { field: &'static str, value: u32 },

    /// A fixed-size record declared an unexpected length.
    #[error("{field} length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Consume `len` bytes.
    pub fn bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                field,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Consume `N` bytes into a fixed array.
    pub fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(field, N)?);
        Ok(out)
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.bytes(field, 1)?[0])
    }

    pub fn u16_le(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array(field)?))
    }

    pub fn u32_le(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array(field)?))
    }

    /// Split off a sub-reader over the next `len` bytes.
    pub fn sub(&mut self, field: &'static str, len: usize) -> Result<Reader<'a>, DecodeError> {
        Ok(Reader::new(self.bytes(field, len)?))
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_little_endian() {
        let mut r = Reader::new(&[0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(r.u8("a").unwrap(), 0x01);
        assert_eq!(r.u16_le("b").unwrap(), 0x1234);
        assert_eq!(r.u32_le("c").unwrap(), 0x1234_5678);
        assert!(r.is_empty());
    }

    #[test]
    fn test_truncated_read_does_not_advance() {
        let mut r = Reader::new(&[0xaa, 0xbb, 0xcc]);
        let err = r.u32_le("stamp").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                field: "stamp",
                needed: 4,
                remaining: 3
            }
        );
        assert_eq!(r.position(), 0);
        assert_eq!(r.bytes("rest", 3).unwrap(), &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_sub_reader_is_bounded() {
        let mut r = Reader::new(&[1, 2, 3, 4, 5]);
        let mut sub = r.sub("record", 2).unwrap();
        assert_eq!(sub.u16_le("x").unwrap(), 0x0201);
        assert!(sub.u8("y").is_err());
        assert_eq!(r.rest(), &[3, 4, 5]);
    }
}
