// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Statistical samples.
//!
//! Sampling signal handlers only copy raw instruction pointers into a preallocated
//! [`SampleHit`] and queue it. The dumper thread resolves the frames to methods, writes the
//! hits and describes the native code pages they landed in with symbol records.

use crate::profiler::{Flush, Profiler, Shared};
use crate::thread::{current_thread_id, ThreadContext};
use libdd_mlpd_protocol::Event;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Code pages are described once, at this granularity.
const CODE_PAGE_SHIFT: u32 = 9;
/// Stride used to probe a code page for symbols.
const SYMBOL_PROBE_STRIDE: u64 = 16;
/// The dumper flushes its own buffer when idle this long.
const IDLE_FLUSH: Duration = Duration::from_secs(1);

/// A managed frame of a sample, as captured by the sampler. `method` is `None` when the
/// sampler could not tell, in which case the dumper looks `address` up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFrame {
    pub method: Option<u64>,
    pub address: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SampleHit {
    time: u64,
    thread_id: u64,
    ip: u64,
    frames: Vec<SampleFrame>,
}

impl Profiler {
    /// Queues a sample taken on `thread_id` at `ip`, with its managed frames innermost first.
    ///
    /// Meant for signal handlers: nothing is allocated once the sample pool is warm, and the
    /// sample is dropped when the pool is exhausted.
    pub fn sample_hit(&self, thread_id: u64, ip: u64, frames: &[SampleFrame]) {
        let shared = &self.shared;
        if shared.in_shutdown.load(Ordering::Acquire) {
            return;
        }
        let Some(mut hit) = shared.sample_reuse.pop().or_else(|| allocate_sample(shared)) else {
            return;
        };
        hit.time = shared.now();
        hit.thread_id = thread_id;
        hit.ip = ip;
        hit.frames.clear();
        hit.frames
            .extend_from_slice(&frames[..frames.len().min(shared.num_frames())]);
        shared.dumper_queue.push(hit);
    }
}

fn allocate_sample(shared: &Shared) -> Option<Box<SampleHit>> {
    let max = u64::from(shared.config.max_allocated_sample_hits);
    shared
        .counters
        .sample_allocations
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
        .ok()
        .map(|_| Box::default())
}

struct Dumper<'a> {
    shared: &'a Shared,
    ctx: ThreadContext,
    /// Code pages seen so far, and whether their symbols were written.
    code_pages: hashbrown::HashMap<u64, bool>,
}

impl Dumper<'_> {
    fn handle_entry(&mut self) -> bool {
        let Some(mut hit) = self.shared.dumper_queue.pop() else {
            return false;
        };
        let shared = self.shared;

        let frames = hit
            .frames
            .iter()
            .map(|frame| {
                frame
                    .method
                    .or_else(|| shared.runtime.find_method(frame.address))
                    .unwrap_or(0)
            })
            .collect();
        let event = Event::SampleHit {
            thread_id: hit.thread_id,
            ips: vec![hit.ip],
            frames,
        };
        let counter = &shared.counters.sample_hits;
        shared.write_event(&mut self.ctx, counter, hit.time, &event, Flush::IfChained);
        self.add_code_pointer(hit.ip);

        hit.frames.clear();
        // The pool is sized for every sample ever allocated.
        let _ = shared.sample_reuse.push(hit);

        self.dump_unmanaged_coderefs();
        true
    }

    fn add_code_pointer(&mut self, ip: u64) {
        self.code_pages.entry(ip >> CODE_PAGE_SHIFT).or_insert(false);
    }

    fn dump_unmanaged_coderefs(&mut self) {
        let shared = self.shared;
        let mut last_symbol: Option<String> = None;
        let mut pages: Vec<u64> = self
            .code_pages
            .iter_mut()
            .filter(|(_, dumped)| !**dumped)
            .map(|(page, dumped)| {
                *dumped = true;
                *page
            })
            .collect();
        pages.sort_unstable();

        for page in pages {
            let start = page << CODE_PAGE_SHIFT;
            let end = (page + 1) << CODE_PAGE_SHIFT;
            for addr in (start..end).step_by(SYMBOL_PROBE_STRIDE as usize) {
                let Some(name) = shared.symbols.resolve(addr) else {
                    continue;
                };
                if last_symbol.as_deref() == Some(name.as_str()) {
                    continue;
                }
                last_symbol = Some(name.clone());
                if name.is_empty() {
                    continue;
                }
                let event = Event::SampleUsym {
                    addr,
                    size: 0,
                    name,
                };
                let now = shared.now();
                let counter = &shared.counters.sample_usyms;
                shared.write_event(&mut self.ctx, counter, now, &event, Flush::IfChained);
            }
        }
    }

    fn run(&mut self) {
        let shared = self.shared;
        let queue = &shared.dumper_queue;
        while queue.is_running() {
            if !queue.wait_timeout(IDLE_FLUSH) {
                shared.send_buffer(&mut self.ctx);
            }
            self.handle_entry();
        }
        while self.handle_entry() {}
        shared.send_buffer(&mut self.ctx);
    }
}

pub(crate) fn run(shared: &Arc<Shared>) {
    let mut dumper = Dumper {
        shared,
        ctx: ThreadContext::new(current_thread_id(), 0, shared.now()),
        code_pages: hashbrown::HashMap::new(),
    };
    dumper.run();
    tracing::debug!(
        code_pages = dumper.code_pages.len(),
        "log profiler dumper stopped"
    );
}
