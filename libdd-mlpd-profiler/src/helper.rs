// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The helper thread: periodic sync points, counter samples and the command server.
//!
//! Every second the helper takes the buffer lock exclusively, flushes every attached thread
//! and writes a periodic sync point. Clients connected to the command port may send
//! `heapshot` lines to request a heap shot.

use crate::config::EventMask;
use crate::counters::RuntimeCounter;
use crate::profiler::{Flush, Shared};
use crate::thread::{current_thread_id, ThreadContext};
use anyhow::Context;
use libdd_mlpd_protocol::wire::SyncPoint;
use libdd_mlpd_protocol::Event;
use std::io::{self, Read};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SYNC_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Longest command line kept from a client before its input is discarded.
const MAX_COMMAND_LEN: usize = 256;

/// Binds the command server on the loopback interface. Port zero picks a free port, which is
/// then recorded in the file header.
pub(crate) fn bind_command_port(port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .with_context(|| format!("Could not bind log profiler command server to port {port}"))?;
    listener
        .set_nonblocking(true)
        .context("Could not configure log profiler command server")?;
    Ok(listener)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Heapshot,
}

impl Command {
    fn parse(line: &[u8]) -> Option<Self> {
        match line.trim_ascii() {
            b"heapshot" => Some(Command::Heapshot),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Client {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl Client {
    /// Reads what the client sent so far and returns the complete commands. `Ok(None)` once
    /// the client disconnected.
    fn poll(&mut self) -> io::Result<Option<Vec<Command>>> {
        let mut chunk = [0u8; 64];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut commands = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            match Command::parse(&line) {
                Some(command) => commands.push(command),
                None => tracing::debug!(
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "ignoring unknown profiler command"
                ),
            }
        }
        if self.pending.len() > MAX_COMMAND_LEN {
            self.pending.clear();
        }
        Ok(Some(commands))
    }
}

struct Helper<'a> {
    shared: &'a Shared,
    ctx: ThreadContext,
    listener: TcpListener,
    clients: Vec<Client>,
}

impl Helper<'_> {
    /// Accepts new clients and runs the commands of the connected ones. Returns whether there
    /// was any activity.
    fn serve_commands(&mut self) -> bool {
        let mut active = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(%peer, "dropping profiler command client: {e}");
                        continue;
                    }
                    tracing::debug!(%peer, "profiler command client connected");
                    self.clients.push(Client {
                        stream,
                        pending: Vec::new(),
                    });
                    active = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!("profiler command server accept failed: {e}");
                    break;
                }
            }
        }

        let shared = self.shared;
        self.clients.retain_mut(|client| match client.poll() {
            Ok(Some(commands)) => {
                for command in commands {
                    active = true;
                    match command {
                        Command::Heapshot => shared.trigger_heapshot(),
                    }
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!("profiler command client dropped: {e}");
                false
            }
        });
        active
    }

    fn sync(&mut self) {
        let shared = self.shared;
        let small_id = self.ctx.small_id;
        shared.lock.lock_exclusive(small_id);
        shared.sync_point(&mut self.ctx, SyncPoint::Periodic);
        if shared.enabled(EventMask::COUNTER) {
            let mut counters = shared.runtime.counters();
            counters.extend(shared.counters.as_runtime_counters());
            shared.write_counters(&mut self.ctx, &counters);
            shared.send_buffer(&mut self.ctx);
        }
        shared.lock.unlock_exclusive(small_id);
    }

    fn run(&mut self) {
        let shared = self.shared;
        let mut last_sync = Instant::now();
        while shared.helper_wake.is_running() {
            shared.helper_wake.wait_timeout(POLL_INTERVAL);
            let active = self.serve_commands();
            if active || last_sync.elapsed() >= SYNC_INTERVAL {
                self.sync();
                last_sync = Instant::now();
            }
        }
        shared.send_buffer(&mut self.ctx);
    }
}

impl Shared {
    /// Writes descriptions of new counters and samples of the changed ones to `ctx`.
    pub fn write_counters(&self, ctx: &mut ThreadContext, counters: &[RuntimeCounter]) {
        let (descs, samples) = self.counter_tracker.lock().update(counters);
        let now = self.now();
        if !descs.is_empty() {
            let event = Event::CountersDesc { counters: descs };
            self.write_event(ctx, &self.counters.counter_descs, now, &event, Flush::IfChained);
        }
        if !samples.is_empty() {
            let event = Event::Counters { samples };
            let counter = &self.counters.counter_samples;
            self.write_event(ctx, counter, now, &event, Flush::IfChained);
        }
    }
}

pub(crate) fn run(shared: &Arc<Shared>, small_id: u16, listener: TcpListener) {
    let mut helper = Helper {
        shared,
        ctx: ThreadContext::new(current_thread_id(), small_id, shared.now()),
        listener,
        clients: Vec::new(),
    };
    helper.run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(b"heapshot\n"), Some(Command::Heapshot));
        assert_eq!(Command::parse(b"  heapshot\r\n"), Some(Command::Heapshot));
        assert_eq!(Command::parse(b"heap\n"), None);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn client_lines_are_split() {
        let listener = bind_command_port(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut remote = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        let (stream, _) = loop {
            match listener.accept() {
                Ok(accepted) => break accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Err(e) => panic!("{e}"),
            }
        };
        stream.set_nonblocking(true).unwrap();
        let mut client = Client {
            stream,
            pending: Vec::new(),
        };

        remote.write_all(b"heapshot\nbogus\nheap").unwrap();
        remote.flush().unwrap();
        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.extend(client.poll().unwrap().unwrap());
            if seen.len() == 1 && client.pending == b"heap" {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(seen, vec![Command::Heapshot]);
        assert_eq!(client.pending, b"heap");

        drop(remote);
        let mut closed = false;
        for _ in 0..100 {
            if client.poll().unwrap().is_none() {
                closed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(closed);
    }
}
