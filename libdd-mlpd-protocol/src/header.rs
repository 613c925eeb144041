// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{DecodeError, HeaderError};
use crate::wire::{
    BUFFER_HEADER_SIZE, BUF_ID, LOG_DATA_VERSION, LOG_HEADER_ID, LOG_VERSION_MAJOR,
    LOG_VERSION_MINOR,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Stream header, written once before any buffer record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub major: u8,
    pub minor: u8,
    pub data_version: u8,
    pub ptr_size: u8,
    /// Wall clock at startup, in milliseconds since the epoch.
    pub startup_ms: u64,
    /// Monotonic clock at startup, in nanoseconds. Absent before major version 3.
    pub startup_ns: u64,
    pub timer_overhead: u32,
    pub pid: u32,
    pub port: u16,
    pub args: String,
    pub arch: String,
    pub os: String,
}

impl FileHeader {
    /// Header describing a stream produced by this version of the profiler.
    pub fn current(startup_ms: u64, startup_ns: u64, timer_overhead: u32, pid: u32) -> Self {
        Self {
            major: LOG_VERSION_MAJOR,
            minor: LOG_VERSION_MINOR,
            data_version: LOG_DATA_VERSION,
            ptr_size: std::mem::size_of::<usize>() as u8,
            startup_ms,
            startup_ns,
            timer_overhead,
            pid,
            port: 0,
            args: String::new(),
            arch: std::env::consts::ARCH.to_owned(),
            os: std::env::consts::OS.to_owned(),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(LOG_HEADER_ID)?;
        w.write_u8(self.major)?;
        w.write_u8(self.minor)?;
        w.write_u8(self.data_version)?;
        w.write_u8(self.ptr_size)?;
        w.write_u64::<LittleEndian>(self.startup_ms)?;
        if self.major >= 3 {
            w.write_u64::<LittleEndian>(self.startup_ns)?;
        }
        w.write_u32::<LittleEndian>(self.timer_overhead)?;
        w.write_u32::<LittleEndian>(0)?;
        w.write_u32::<LittleEndian>(self.pid)?;
        w.write_u16::<LittleEndian>(self.port)?;
        if self.major >= 1 {
            write_header_string(w, &self.args)?;
            write_header_string(w, &self.arch)?;
            write_header_string(w, &self.os)?;
        } else {
            w.write_u16::<LittleEndian>(0)?;
        }
        Ok(())
    }

    /// Reads and validates a header. Streams newer than [`LOG_DATA_VERSION`], streams recorded
    /// with pointers wider than 64 bits and streams with header flags set are rejected.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, HeaderError> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != LOG_HEADER_ID {
            return Err(HeaderError::BadMagic(magic));
        }
        let major = r.read_u8()?;
        let minor = r.read_u8()?;
        let data_version = r.read_u8()?;
        if data_version > LOG_DATA_VERSION {
            return Err(HeaderError::UnsupportedVersion(data_version));
        }
        let ptr_size = r.read_u8()?;
        if ptr_size > 8 {
            return Err(HeaderError::UnsupportedPointerSize(ptr_size));
        }
        let startup_ms = r.read_u64::<LittleEndian>()?;
        let startup_ns = if major >= 3 {
            r.read_u64::<LittleEndian>()?
        } else {
            0
        };
        let timer_overhead = r.read_u32::<LittleEndian>()?;
        let flags = r.read_u32::<LittleEndian>()?;
        if flags != 0 {
            return Err(HeaderError::NonZeroFlags(flags));
        }
        let pid = r.read_u32::<LittleEndian>()?;
        let port = r.read_u16::<LittleEndian>()?;
        let (args, arch, os) = if major >= 1 {
            (
                read_header_string(r)?,
                read_header_string(r)?,
                read_header_string(r)?,
            )
        } else {
            // Old operating system field, never filled in.
            r.read_u16::<LittleEndian>()?;
            Default::default()
        };
        Ok(Self {
            major,
            minor,
            data_version,
            ptr_size,
            startup_ms,
            startup_ns,
            timer_overhead,
            pid,
            port,
            args,
            arch,
            os,
        })
    }
}

/// Length-prefixed string; the length counts the trailing NUL, which is written too.
fn write_header_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes: Vec<u8> = s.bytes().take_while(|b| *b != 0).collect();
    w.write_u32::<LittleEndian>(bytes.len() as u32 + 1)?;
    w.write_all(&bytes)?;
    w.write_u8(0)
}

fn read_header_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u32::<LittleEndian>()? as u64;
    let mut bytes = Vec::new();
    r.by_ref().take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    if let Some(nul) = bytes.iter().position(|b| *b == 0) {
        bytes.truncate(nul);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Header of a buffer record. The bases seed the delta decoders of the payload that follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferHeader {
    /// Payload length in bytes.
    pub len: u32,
    pub time_base: u64,
    pub ptr_base: u64,
    /// Object base, shifted right by 3.
    pub obj_base: u64,
    pub thread_id: u64,
    pub method_base: u64,
}

impl BufferHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; BUFFER_HEADER_SIZE] {
        let mut raw = [0u8; BUFFER_HEADER_SIZE];
        raw[0..4].copy_from_slice(&BUF_ID.to_le_bytes());
        raw[4..8].copy_from_slice(&self.len.to_le_bytes());
        for (i, value) in [
            self.time_base,
            self.ptr_base,
            self.obj_base,
            self.thread_id,
            self.method_base,
        ]
        .into_iter()
        .enumerate()
        {
            let start = 8 + i * 8;
            raw[start..start + 8].copy_from_slice(&value.to_le_bytes());
        }
        raw
    }

    pub fn from_bytes(raw: &[u8; BUFFER_HEADER_SIZE]) -> Result<Self, DecodeError> {
        let mut r = &raw[..];
        let id = r.read_u32::<LittleEndian>()?;
        if id != BUF_ID {
            return Err(DecodeError::BadBufferId { id, raw: *raw });
        }
        Ok(Self {
            len: r.read_u32::<LittleEndian>()?,
            time_base: r.read_u64::<LittleEndian>()?,
            ptr_base: r.read_u64::<LittleEndian>()?,
            obj_base: r.read_u64::<LittleEndian>()?,
            thread_id: r.read_u64::<LittleEndian>()?,
            method_base: r.read_u64::<LittleEndian>()?,
        })
    }
}

/// Reads the next buffer record.
///
/// Returns `Ok(None)` once the stream ends, including when it ends in the middle of a record: a
/// profiler that was killed leaves a truncated last buffer behind. A record with the wrong id
/// is an error.
pub fn read_buffer<R: Read>(r: &mut R) -> Result<Option<(BufferHeader, Vec<u8>)>, DecodeError> {
    let mut raw = [0u8; BUFFER_HEADER_SIZE];
    if !read_full(r, &mut raw)? {
        return Ok(None);
    }
    let header = BufferHeader::from_bytes(&raw)?;
    // Grows with the bytes actually present, whatever the length field claims.
    let mut payload = Vec::new();
    r.by_ref()
        .take(u64::from(header.len))
        .read_to_end(&mut payload)?;
    if payload.len() != header.len as usize {
        return Ok(None);
    }
    Ok(Some((header, payload)))
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
