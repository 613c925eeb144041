// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! LEB128 integer codec.
//!
//! The encoders never check bounds beyond the destination slice: callers reserve
//! [`LEB128_SIZE`] bytes per value up front.

use crate::error::DecodeError;

/// Worst-case size in bytes of a 64-bit value encoded with LEB128.
pub const LEB128_SIZE: usize = 10;

/// Encodes `value` as unsigned LEB128 at the start of `buf` and returns the number of bytes
/// written.
pub fn encode_uleb128(mut value: u64, buf: &mut [u8]) -> usize {
    let mut written = 0;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf[written] = byte;
        written += 1;
        if value == 0 {
            return written;
        }
    }
}

/// Encodes `value` as signed LEB128 at the start of `buf` and returns the number of bytes
/// written. Encoding stops once the remaining value is pure sign extension of the last byte.
pub fn encode_sleb128(mut value: i64, buf: &mut [u8]) -> usize {
    let mut written = 0;
    loop {
        let mut byte = (value & 0x7f) as u8;
        // Arithmetic shift keeps the sign.
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if !done {
            byte |= 0x80;
        }
        buf[written] = byte;
        written += 1;
        if done {
            return written;
        }
    }
}

pub fn write_uleb128(out: &mut Vec<u8>, value: u64) {
    let mut scratch = [0u8; LEB128_SIZE];
    let len = encode_uleb128(value, &mut scratch);
    out.extend_from_slice(&scratch[..len]);
}

pub fn write_sleb128(out: &mut Vec<u8>, value: i64) {
    let mut scratch = [0u8; LEB128_SIZE];
    let len = encode_sleb128(value, &mut scratch);
    out.extend_from_slice(&scratch[..len]);
}

/// Decodes an unsigned LEB128 value from the start of `buf`, returning the value and the number
/// of bytes consumed.
pub fn decode_uleb128(buf: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= LEB128_SIZE {
            return Err(DecodeError::VarintOverflow(0));
        }
        if shift < 64 {
            result |= u64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(DecodeError::UnexpectedEof(buf.len()))
}

/// Decodes a signed LEB128 value from the start of `buf`, returning the value and the number of
/// bytes consumed.
pub fn decode_sleb128(buf: &[u8]) -> Result<(i64, usize), DecodeError> {
    let mut result = 0i64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= LEB128_SIZE {
            return Err(DecodeError::VarintOverflow(0));
        }
        if shift < 64 {
            result |= i64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                result |= -1i64 << shift;
            }
            return Ok((result, i + 1));
        }
    }
    Err(DecodeError::UnexpectedEof(buf.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uleb_round_trip(value: u64) {
        let mut buf = [0u8; LEB128_SIZE];
        let len = encode_uleb128(value, &mut buf);
        assert!(len <= LEB128_SIZE);
        assert_eq!(decode_uleb128(&buf[..len]).unwrap(), (value, len));
    }

    fn sleb_round_trip(value: i64) {
        let mut buf = [0u8; LEB128_SIZE];
        let len = encode_sleb128(value, &mut buf);
        assert!(len <= LEB128_SIZE);
        assert_eq!(decode_sleb128(&buf[..len]).unwrap(), (value, len));
    }

    #[test]
    fn boundary_values() {
        for value in [0, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX as u64, u64::MAX] {
            uleb_round_trip(value);
        }
        for value in [0, -1, 63, 64, -64, -65, i64::MIN, i64::MAX] {
            sleb_round_trip(value);
        }
    }

    #[test]
    fn known_encodings() {
        let mut out = Vec::new();
        write_uleb128(&mut out, 624485);
        assert_eq!(out, [0xe5, 0x8e, 0x26]);

        out.clear();
        write_sleb128(&mut out, -123456);
        assert_eq!(out, [0xc0, 0xbb, 0x78]);

        out.clear();
        write_sleb128(&mut out, -1);
        assert_eq!(out, [0x7f]);

        out.clear();
        write_sleb128(&mut out, 64);
        assert_eq!(out, [0xc0, 0x00]);
    }

    #[test]
    fn max_values_use_ten_bytes() {
        let mut buf = [0u8; LEB128_SIZE];
        assert_eq!(encode_uleb128(u64::MAX, &mut buf), LEB128_SIZE);
        assert_eq!(encode_sleb128(i64::MIN, &mut buf), LEB128_SIZE);
    }

    #[test]
    fn truncated_input() {
        assert!(matches!(
            decode_uleb128(&[0x80, 0x80]),
            Err(DecodeError::UnexpectedEof(_))
        ));
        assert!(matches!(
            decode_sleb128(&[]),
            Err(DecodeError::UnexpectedEof(_))
        ));
        assert!(matches!(
            decode_uleb128(&[0xff; 11]),
            Err(DecodeError::VarintOverflow(_))
        ));
    }

    #[test]
    fn fuzz_uleb128() {
        bolero::check!()
            .with_type::<u64>()
            .for_each(|value| uleb_round_trip(*value));
    }

    #[test]
    fn fuzz_sleb128() {
        bolero::check!()
            .with_type::<i64>()
            .for_each(|value| sleb_round_trip(*value));
    }
}
