// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Errors raised while decoding buffer records and the events inside them.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),
    #[error("LEB128 value at offset {0} does not fit in 64 bits")]
    VarintOverflow(usize),
    #[error("string at offset {0} is not NUL terminated")]
    UnterminatedString(usize),
    #[error("Incorrect buffer id: 0x{id:x}")]
    BadBufferId { id: u32, raw: [u8; 48] },
    #[error("unhandled profiler event: 0x{tag:x} at offset {offset}")]
    UnhandledEvent { tag: u8, offset: usize },
    #[error("unknown counter type {kind} at offset {offset}")]
    UnknownCounterType { kind: u64, offset: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reasons a stream header is rejected.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("bad header magic 0x{0:x}")]
    BadMagic(u32),
    #[error("unsupported data version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported pointer size {0}")]
    UnsupportedPointerSize(u8),
    #[error("header flags must be 0, found 0x{0:x}")]
    NonZeroFlags(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}
