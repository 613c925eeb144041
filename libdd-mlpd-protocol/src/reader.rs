// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::DecodeError;
use crate::varint::{decode_sleb128, decode_uleb128};

/// Cursor over an event payload.
#[derive(Clone, Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn peek_u8(&self) -> Result<u8, DecodeError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::UnexpectedEof(self.pos))
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn uleb(&mut self) -> Result<u64, DecodeError> {
        let (value, len) = decode_uleb128(&self.buf[self.pos..]).map_err(|e| self.at(e))?;
        self.pos += len;
        Ok(value)
    }

    pub fn sleb(&mut self) -> Result<i64, DecodeError> {
        let (value, len) = decode_sleb128(&self.buf[self.pos..]).map_err(|e| self.at(e))?;
        self.pos += len;
        Ok(value)
    }

    pub fn f64_le(&mut self) -> Result<f64, DecodeError> {
        let end = self.pos + 8;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        self.pos = end;
        Ok(f64::from_le_bytes(raw))
    }

    /// Reads a NUL terminated string. Invalid UTF-8 is replaced rather than rejected.
    pub fn cstr(&mut self) -> Result<String, DecodeError> {
        let rest = &self.buf[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(DecodeError::UnterminatedString(self.pos))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }

    pub fn skip_cstr(&mut self) -> Result<(), DecodeError> {
        self.cstr().map(|_| ())
    }

    fn at(&self, err: DecodeError) -> DecodeError {
        match err {
            DecodeError::UnexpectedEof(_) => DecodeError::UnexpectedEof(self.buf.len()),
            DecodeError::VarintOverflow(_) => DecodeError::VarintOverflow(self.pos),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_mixed_fields() {
        let mut bytes = vec![7u8, 0xe5, 0x8e, 0x26, 0x7f];
        bytes.extend_from_slice(b"Foo\0");
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.u8().unwrap(), 7);
        assert_eq!(reader.uleb().unwrap(), 624485);
        assert_eq!(reader.sleb().unwrap(), -1);
        assert_eq!(reader.cstr().unwrap(), "Foo");
        assert_eq!(reader.f64_le().unwrap(), 1.5);
        assert!(reader.is_empty());
        assert!(matches!(reader.u8(), Err(DecodeError::UnexpectedEof(_))));
    }

    #[test]
    fn unterminated_string() {
        let mut reader = WireReader::new(b"abc");
        assert!(matches!(
            reader.cstr(),
            Err(DecodeError::UnterminatedString(0))
        ));
    }
}
