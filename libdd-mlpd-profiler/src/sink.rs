// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where the stream goes: a file, an inherited descriptor or the stdin of a shell command,
//! optionally gzip compressed.

use anyhow::Context;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::fd::FromRawFd;
use std::process::{Child, Command, Stdio};

pub const DEFAULT_OUTPUT: &str = "output.mlpd";

/// Resolves the configured output into a target string.
///
/// A leading `+` appends `.<pid>` to the name. `%t` expands to the UTC start time as
/// `YYYYMMDDhhmmss`, `%p` to the pid and `%%` to `%`; names without `%t` or `%p` are used
/// verbatim. With `report` set the stream is piped into `mprof-report`.
pub fn resolve_target(
    output: Option<&str>,
    report: bool,
    pid: u32,
    now: DateTime<Utc>,
) -> String {
    let Some(output) = output else {
        return if report {
            "|mprof-report -".to_owned()
        } else {
            DEFAULT_OUTPUT.to_owned()
        };
    };
    let output = match output.strip_prefix('+') {
        Some(rest) => format!("{rest}.{pid}"),
        None => output.to_owned(),
    };
    let name = expand_output_name(&output, pid, now);
    if report {
        format!("|mprof-report '--out={name}' -")
    } else {
        name
    }
}

pub fn expand_output_name(template: &str, pid: u32, now: DateTime<Utc>) -> String {
    let mut has_placeholder = false;
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('t') | Some('p') => has_placeholder = true,
                Some(_) => {}
                None => break,
            }
        }
    }
    if !has_placeholder {
        return template.to_owned();
    }

    let date = now.format("%Y%m%d%H%M%S").to_string();
    let mut name = String::with_capacity(template.len() + date.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            name.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => name.push_str(&date),
            Some('p') => name.push_str(&pid.to_string()),
            Some('%') => name.push('%'),
            Some(other) => {
                name.push('%');
                name.push(other);
            }
            None => break,
        }
    }
    name
}

enum Output {
    Plain(BufWriter<Box<dyn Write + Send>>),
    Gzip(GzEncoder<BufWriter<Box<dyn Write + Send>>>),
}

/// Byte sink owned by the writer thread.
pub struct OutputSink {
    target: String,
    out: Output,
    child: Option<Child>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("target", &self.target)
            .field("gzip", &matches!(self.out, Output::Gzip(_)))
            .finish()
    }
}

impl OutputSink {
    /// Opens a target produced by [`resolve_target`]: `|cmd` pipes into `sh -c cmd`, `#N`
    /// appends to descriptor `N`, anything else is created or truncated.
    pub fn open(target: &str, gzip: bool) -> anyhow::Result<Self> {
        let (raw, child) = Self::open_raw(target)
            .with_context(|| format!("Could not create log profiler output file '{target}'"))?;
        let raw = BufWriter::new(raw);
        let out = if gzip {
            Output::Gzip(GzEncoder::new(raw, Compression::default()))
        } else {
            Output::Plain(raw)
        };
        tracing::debug!(output = target, gzip, "opened profiler output");
        Ok(Self {
            target: target.to_owned(),
            out,
            child,
        })
    }

    fn open_raw(target: &str) -> io::Result<(Box<dyn Write + Send>, Option<Child>)> {
        if let Some(command) = target.strip_prefix('|') {
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(Stdio::piped())
                .spawn()?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdin"))?;
            Ok((Box::new(stdin), Some(child)))
        } else if let Some(fd) = target.strip_prefix('#') {
            let fd: i32 = fd
                .trim()
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD).map_err(io::Error::from)?;
            // SAFETY: the descriptor is open (checked above) and was handed to the profiler,
            // which takes ownership of it for the rest of the process.
            let file = unsafe { File::from_raw_fd(fd) };
            Ok((Box::new(file), None))
        } else {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(target)?;
            Ok((Box::new(file), None))
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Flushes everything, ends the gzip stream and waits for a piped command to exit.
    pub fn finish(self) -> anyhow::Result<()> {
        let mut raw = match self.out {
            Output::Plain(raw) => raw,
            Output::Gzip(gz) => gz.finish().context("finishing gzip stream")?,
        };
        raw.flush().context("flushing profiler output")?;
        drop(raw);
        if let Some(mut child) = self.child {
            let status = child.wait().context("waiting for output command")?;
            if !status.success() {
                tracing::warn!(output = %self.target, %status, "output command failed");
            }
        }
        Ok(())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.out {
            Output::Plain(w) => w.write(buf),
            Output::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.out {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => w.flush(),
        }
    }
}
