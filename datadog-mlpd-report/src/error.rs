// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libdd_mlpd_protocol::{DecodeError, HeaderError};
use std::io;
use std::path::PathBuf;

/// Reasons a report run stops.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Cannot open file: {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Not a log profiler data file (or unsupported version).")]
    NotAProfile(#[source] HeaderError),
    #[error("Incorrect buffer id: 0x{0:x}")]
    BadBufferId(u32),
    #[error(
        "unhandled profiler event: 0x{tag:x} at file offset: {file_offset} + {offset} (len: {len})"
    )]
    UnhandledEvent {
        tag: u8,
        file_offset: u64,
        offset: usize,
        len: u32,
    },
    #[error("invalid gc handle type {handle_type} at file offset {file_offset}")]
    InvalidHandleType { handle_type: u64, file_offset: u64 },
    #[error("malformed buffer at file offset {file_offset}: {source}")]
    Malformed {
        file_offset: u64,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}
