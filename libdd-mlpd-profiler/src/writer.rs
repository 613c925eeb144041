// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The writer thread, sole owner of the output sink.
//!
//! Every queued buffer is preceded in the stream by the JIT records of the methods it
//! references that the stream has not described yet. Those records are written from a buffer
//! private to this thread, flushed ahead of the data buffer.

use crate::profiler::{Flush, Shared, WriterEntry};
use crate::sink::OutputSink;
use crate::thread::{current_thread_id, ThreadContext};
use libdd_mlpd_protocol::{Event, FileHeader};
use std::io::{self, Write};
use std::sync::Arc;

struct Writer<'a> {
    shared: &'a Shared,
    ctx: ThreadContext,
    sink: OutputSink,
}

impl Writer<'_> {
    /// Writes the next queued entry. Returns false when the queue is empty.
    fn handle_entry(&mut self) -> io::Result<bool> {
        let Some(entry) = self.shared.writer_queue.pop() else {
            return Ok(false);
        };
        let WriterEntry { buffer, methods } = entry;

        let mut described = false;
        if !methods.is_empty() {
            let mut table = self.shared.method_table.write();
            for info in methods {
                if !table.insert(info.method) {
                    continue;
                }
                let (code_start, code_size) = match (info.code_start, info.code_size) {
                    (0, 0) => self
                        .shared
                        .runtime
                        .method_code(info.method)
                        .unwrap_or_default(),
                    code => code,
                };
                let event = Event::MethodJit {
                    method: info.method,
                    code_start,
                    code_size,
                    name: self.shared.runtime.method_name(info.method),
                };
                let counter = &self.shared.counters.method_jits;
                self.shared
                    .write_event(&mut self.ctx, counter, info.time, &event, Flush::Never);
                described = true;
            }
        }

        if described {
            let (metadata, _) = self.ctx.take_buffer(self.shared.now());
            metadata.write_chain(&mut self.sink)?;
        }
        buffer.write_chain(&mut self.sink)?;
        Ok(true)
    }

    fn run(&mut self) -> io::Result<()> {
        let shared = self.shared;
        let queue = &shared.writer_queue;
        while queue.is_running() {
            queue.wait();
            self.handle_entry()?;
        }
        while self.handle_entry()? {}
        self.sink.flush()
    }
}

/// Thread body: writes the file header, then queued buffers until stopped and drained.
///
/// Output errors terminate the process, as a truncated stream cannot be decoded.
pub(crate) fn run(shared: &Arc<Shared>, mut sink: OutputSink, header: FileHeader) {
    let result = header.write_to(&mut sink).and_then(|()| {
        let mut writer = Writer {
            shared,
            ctx: ThreadContext::new(current_thread_id(), 0, shared.now()),
            sink,
        };
        writer.run()?;
        Ok(writer.sink)
    });
    let finished = result
        .map_err(anyhow::Error::from)
        .and_then(OutputSink::finish);
    if let Err(e) = finished {
        tracing::error!("log profiler output failed: {e:#}");
        eprintln!("[ERROR] log profiler output failed: {e:#}");
        std::process::exit(1);
    }
}
