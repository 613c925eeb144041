// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Profiler lifecycle and the emission path every event goes through.

use crate::buffer::LogBuffer;
use crate::clock;
use crate::config::{EventMask, HeapshotMode, ProfilerConfig};
use crate::counters::{bump, CounterTracker, EventCounters, EventCountersSnapshot};
use crate::dumper::{self, SampleHit};
use crate::gc::GcState;
use crate::helper;
use crate::lock::BufferLock;
use crate::queue::WorkQueue;
use crate::runtime::{RuntimeHooks, SymbolResolver};
use crate::sink::{self, OutputSink};
use crate::thread::{
    current_thread_id, MethodInfo, RegistryFull, ThreadContext, ThreadHandle, ThreadRegistry,
};
use crate::writer;
use anyhow::Context;
use crossbeam_queue::ArrayQueue;
use hashbrown::HashSet;
use libdd_mlpd_protocol::wire::{SyncPoint, MAX_FRAMES};
use libdd_mlpd_protocol::{Event, FileHeader};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A filled buffer chain and the methods it references that may still lack a JIT record.
#[derive(Debug)]
pub(crate) struct WriterEntry {
    pub buffer: Box<LogBuffer>,
    pub methods: Vec<MethodInfo>,
}

/// Whether writing an event hands the buffer to the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flush {
    /// Once the buffer overflowed into a chain.
    IfChained,
    Never,
}

pub(crate) struct Shared {
    pub config: ProfilerConfig,
    events: AtomicU32,
    num_frames: AtomicUsize,
    max_call_depth: AtomicU32,
    heapshot: Mutex<HeapshotMode>,
    runtime_ready: AtomicBool,
    pub in_shutdown: AtomicBool,
    pub lock: BufferLock,
    pub threads: ThreadRegistry,
    /// Methods whose JIT record is already in the stream.
    pub method_table: RwLock<HashSet<u64>>,
    pub runtime: Arc<dyn RuntimeHooks>,
    pub symbols: Arc<dyn SymbolResolver>,
    pub writer_queue: WorkQueue<WriterEntry>,
    pub dumper_queue: WorkQueue<Box<SampleHit>>,
    pub sample_reuse: ArrayQueue<Box<SampleHit>>,
    pub helper_wake: WorkQueue<()>,
    pub gc: GcState,
    pub counters: EventCounters,
    pub counter_tracker: Mutex<CounterTracker>,
}

impl Shared {
    fn new(
        config: ProfilerConfig,
        runtime: Arc<dyn RuntimeHooks>,
        symbols: Arc<dyn SymbolResolver>,
    ) -> Self {
        Self {
            events: AtomicU32::new(config.effective_events().bits()),
            num_frames: AtomicUsize::new(config.num_frames),
            max_call_depth: AtomicU32::new(config.max_call_depth),
            heapshot: Mutex::new(config.heapshot),
            runtime_ready: AtomicBool::new(false),
            in_shutdown: AtomicBool::new(false),
            lock: BufferLock::new(),
            threads: ThreadRegistry::default(),
            method_table: RwLock::default(),
            runtime,
            symbols,
            writer_queue: WorkQueue::default(),
            dumper_queue: WorkQueue::default(),
            sample_reuse: ArrayQueue::new(config.max_allocated_sample_hits.max(1) as usize),
            helper_wake: WorkQueue::default(),
            gc: GcState::default(),
            counters: EventCounters::default(),
            counter_tracker: Mutex::default(),
            config,
        }
    }

    pub fn now(&self) -> u64 {
        clock::now_ns()
    }

    pub fn events(&self) -> EventMask {
        EventMask::from_bits_truncate(self.events.load(Ordering::Relaxed))
    }

    pub fn enabled(&self, mask: EventMask) -> bool {
        self.events().intersects(mask)
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames.load(Ordering::Relaxed)
    }

    pub fn max_call_depth(&self) -> i64 {
        i64::from(self.max_call_depth.load(Ordering::Relaxed))
    }

    pub fn heapshot_mode(&self) -> HeapshotMode {
        *self.heapshot.lock()
    }

    /// Captures the calling thread's managed stack when backtraces are wanted. Done before
    /// entering the buffer since walking the stack may emit events of its own.
    pub fn backtrace(&self) -> Option<Vec<u64>> {
        let frames = self.num_frames();
        if self.config.enter_leave || frames == 0 || !self.runtime_ready.load(Ordering::Acquire) {
            return None;
        }
        let mut backtrace = self.runtime.walk_stack(frames);
        backtrace.truncate(frames);
        Some(backtrace)
    }

    /// Runs `f` on the context of an attached thread, inside the shared buffer lock.
    ///
    /// Returns `None`, dropping the event, when the handle is stale or the thread is already
    /// writing an event further up its stack.
    pub fn with_log<R>(
        &self,
        handle: ThreadHandle,
        f: impl FnOnce(&mut ThreadContext) -> R,
    ) -> Option<R> {
        let small_id = handle.small_id();
        self.lock.lock(small_id);
        let result = self.threads.with(handle, f);
        self.lock.unlock(small_id);
        if result.is_none() {
            tracing::debug!(small_id, "dropped event of a detached or busy thread");
        }
        result
    }

    /// Writes one event of an attached thread, counted in `counter`.
    pub fn log(&self, handle: ThreadHandle, counter: &AtomicU64, event: Event) {
        self.with_log(handle, |ctx| {
            let now = self.now();
            self.write_event(ctx, counter, now, &event, Flush::IfChained);
        });
    }

    /// Appends `event` to the buffer of `ctx`, queueing JIT records for the methods it
    /// references.
    pub fn write_event(
        &self,
        ctx: &mut ThreadContext,
        counter: &AtomicU64,
        time: u64,
        event: &Event,
        flush: Flush,
    ) {
        bump(counter);
        if LogBuffer::ensure(&mut ctx.buffer, event.max_encoded_len(), time) {
            bump(&self.counters.buffer_allocations);
        }
        self.register_methods(ctx, event, time);
        ctx.buffer.write(time, event);
        if flush == Flush::IfChained && ctx.buffer.has_next() {
            self.send_buffer(ctx);
        }
    }

    fn register_methods(&self, ctx: &mut ThreadContext, event: &Event, time: u64) {
        let mut methods = event.referenced_methods().filter(|&m| m != 0).peekable();
        if methods.peek().is_none() {
            return;
        }
        let table = self.method_table.read();
        for method in methods {
            if !table.contains(&method) {
                ctx.register_method(method, None, time);
            }
        }
    }

    /// Records code bounds for `method` ahead of its JIT record.
    pub fn register_jitted(
        &self,
        handle: ThreadHandle,
        method: u64,
        code_start: u64,
        code_size: u64,
    ) {
        if method == 0 || self.method_table.read().contains(&method) {
            return;
        }
        self.with_log(handle, |ctx| {
            ctx.register_method(method, Some((code_start, code_size)), self.now());
        });
    }

    /// Hands the buffer chain of `ctx` to the writer and starts a fresh one.
    pub fn send_buffer(&self, ctx: &mut ThreadContext) {
        let (buffer, methods) = ctx.take_buffer(self.now());
        bump(&self.counters.buffer_allocations);
        if buffer.is_empty() && !buffer.has_next() && methods.is_empty() {
            return;
        }
        self.writer_queue.push(WriterEntry { buffer, methods });
    }

    /// Flushes every attached thread. The caller holds the buffer lock exclusively.
    pub fn sync_point_flush(&self, small_id: u16) {
        debug_assert!(self.lock.is_held_exclusively_by(small_id));
        self.threads.for_each_attached(|ctx| self.send_buffer(ctx));
    }

    /// Writes a sync point to `ctx` and flushes it. The caller holds the buffer lock
    /// exclusively.
    pub fn sync_point_mark(&self, ctx: &mut ThreadContext, kind: SyncPoint) {
        debug_assert!(self.lock.is_held_exclusively_by(ctx.small_id) || ctx.small_id == 0);
        let event = Event::SyncPoint { kind: kind.raw() };
        self.write_event(ctx, &self.counters.sync_points, self.now(), &event, Flush::Never);
        self.send_buffer(ctx);
    }

    /// Flushes every thread and marks the point with `kind`. The caller holds the buffer lock
    /// exclusively.
    pub fn sync_point(&self, ctx: &mut ThreadContext, kind: SyncPoint) {
        self.sync_point_flush(ctx.small_id);
        self.sync_point_mark(ctx, kind);
    }

    /// Sends the last buffer of a thread leaving the profiler, ending it first when it did
    /// not end on its own.
    fn retire(&self, mut ctx: ThreadContext) {
        if !ctx.ended {
            let event = Event::ThreadEnd {
                thread_id: ctx.thread_id,
            };
            let now = self.now();
            self.write_event(&mut ctx, &self.counters.thread_ends, now, &event, Flush::Never);
        }
        self.send_buffer(&mut ctx);
    }

    pub fn detach(&self, handle: ThreadHandle) {
        if let Some(ctx) = self.threads.detach(handle) {
            self.retire(ctx);
        }
    }

    /// Emits from a context of its own, for calls that have no attached thread behind them.
    fn log_standalone(&self, counter: &AtomicU64, event: Event) {
        let now = self.now();
        let mut ctx = ThreadContext::new(current_thread_id(), 0, now);
        self.write_event(&mut ctx, counter, now, &event, Flush::Never);
        self.send_buffer(&mut ctx);
    }
}

struct Workers {
    helper_id: u16,
    helper: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    dumper: Option<JoinHandle<()>>,
}

impl Workers {
    /// Winds down whatever started when starting failed halfway. The start error is the one
    /// reported, so cleanup failures are only logged.
    fn abandon(&mut self, shared: &Shared) {
        if let Err(err) = self.stop(shared) {
            tracing::warn!(%err, "Failed to stop the workers of an aborted profiler start");
        }
    }

    fn stop(&mut self, shared: &Shared) -> anyhow::Result<()> {
        let mut result = Ok(());
        shared.helper_wake.stop();
        result = result.and(join(self.helper.take(), "helper"));

        for handle in shared.threads.attached() {
            shared.detach(handle);
        }

        shared.dumper_queue.stop();
        result = result.and(join(self.dumper.take(), "dumper"));
        shared.writer_queue.stop();
        result = result.and(join(self.writer.take(), "writer"));

        shared.threads.release(self.helper_id);
        debug_assert!(shared.lock.is_idle(), "buffer lock still held at shutdown");
        result
    }
}

fn join(handle: Option<JoinHandle<()>>, name: &str) -> anyhow::Result<()> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow::anyhow!("profiler {name} thread panicked")),
        None => Ok(()),
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> anyhow::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .with_context(|| format!("Could not start log profiler {name} thread"))
}

/// A running log profiler.
///
/// Runtime threads attach to get a [`ThreadHandle`] and pass it to every emitter. Emitters
/// never fail: events of stale handles, or of disabled event classes, are dropped.
pub struct Profiler {
    pub(crate) shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("events", &self.shared.events())
            .field("running", &self.workers.lock().is_some())
            .finish()
    }
}

impl Profiler {
    /// Opens the output and starts the helper, writer and dumper threads.
    pub fn start(
        config: ProfilerConfig,
        runtime: Arc<dyn RuntimeHooks>,
        symbols: Arc<dyn SymbolResolver>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let pid = std::process::id();
        let target = sink::resolve_target(
            config.output.as_deref(),
            config.report,
            pid,
            chrono::Utc::now(),
        );
        let sink = OutputSink::open(&target, config.use_zip)?;
        let listener = helper::bind_command_port(config.command_port)?;

        let mut header = FileHeader::current(
            clock::wall_ms(),
            clock::now_ns(),
            clock::timer_overhead(),
            pid,
        );
        header.port = listener.local_addr()?.port();
        header.args = config.args.clone();
        let port = header.port;

        let shared = Arc::new(Shared::new(config, runtime, symbols));
        let helper_id = shared.threads.reserve()?;
        let mut workers = Workers {
            helper_id,
            helper: None,
            writer: None,
            dumper: None,
        };
        if let Err(e) = Self::spawn_workers(&shared, &mut workers, listener, sink, header) {
            workers.abandon(&shared);
            return Err(e);
        }
        tracing::debug!(output = %target, port, "log profiler started");

        Ok(Self {
            shared,
            workers: Mutex::new(Some(workers)),
        })
    }

    fn spawn_workers(
        shared: &Arc<Shared>,
        workers: &mut Workers,
        listener: std::net::TcpListener,
        sink: OutputSink,
        header: FileHeader,
    ) -> anyhow::Result<()> {
        let helper_id = workers.helper_id;
        let s = shared.clone();
        workers.helper = Some(spawn("Profiler Helper", move || {
            helper::run(&s, helper_id, listener)
        })?);
        let s = shared.clone();
        workers.writer = Some(spawn("Profiler Writer", move || {
            writer::run(&s, sink, header)
        })?);
        let s = shared.clone();
        workers.dumper = Some(spawn("Profiler Dumper", move || dumper::run(&s))?);
        Ok(())
    }

    /// Enables backtraces, which need a runtime able to walk stacks.
    pub fn runtime_initialized(&self) {
        self.shared.runtime_ready.store(true, Ordering::Release);
    }

    pub fn attach_thread(&self, thread_id: u64) -> Result<ThreadHandle, RegistryFull> {
        self.shared.threads.attach(thread_id, self.shared.now())
    }

    /// Unregisters a thread, ending it in the stream unless [`Profiler::thread_end`] already
    /// did.
    pub fn detach_thread(&self, handle: ThreadHandle) {
        self.shared.detach(handle);
    }

    pub fn events(&self) -> EventMask {
        self.shared.events()
    }

    pub fn set_events(&self, events: EventMask) {
        self.shared.events.store(events.bits(), Ordering::Relaxed);
    }

    pub fn enable_events(&self, events: EventMask, enable: bool) {
        if enable {
            self.shared.events.fetch_or(events.bits(), Ordering::Relaxed);
        } else {
            self.shared.events.fetch_and(!events.bits(), Ordering::Relaxed);
        }
    }

    pub fn num_frames(&self) -> usize {
        self.shared.num_frames()
    }

    /// Sets the backtrace depth, capped at [`MAX_FRAMES`].
    pub fn set_num_frames(&self, frames: usize) {
        self.shared
            .num_frames
            .store(frames.min(MAX_FRAMES), Ordering::Relaxed);
    }

    pub fn max_call_depth(&self) -> u32 {
        self.shared.max_call_depth.load(Ordering::Relaxed)
    }

    pub fn set_max_call_depth(&self, depth: u32) {
        self.shared.max_call_depth.store(depth, Ordering::Relaxed);
    }

    pub fn heapshot_mode(&self) -> HeapshotMode {
        self.shared.heapshot_mode()
    }

    pub fn set_heapshot_mode(&self, mode: HeapshotMode) {
        *self.shared.heapshot.lock() = mode;
    }

    pub fn counters(&self) -> EventCountersSnapshot {
        self.shared.counters.snapshot()
    }

    /// Stops the profiler: every thread is ended and flushed, then the background threads
    /// drain their queues and the output is closed. Later calls do nothing.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        let Some(mut workers) = self.workers.lock().take() else {
            return Ok(());
        };
        let shared = &self.shared;

        if let Some(id) = shared.runtime.aot_id() {
            shared.log_standalone(&shared.counters.aot_ids, Event::AotId { id });
        }
        if shared.config.heapshot_on_shutdown {
            shared.gc.request_heapshot();
            shared.runtime.collect(shared.runtime.max_generation());
        }

        shared.in_shutdown.store(true, Ordering::Release);
        let result = workers.stop(shared);
        tracing::debug!("log profiler stopped");
        result
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("log profiler shutdown failed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{NoRuntime, NoSymbols};

    fn shared() -> Shared {
        Shared::new(
            ProfilerConfig::default(),
            Arc::new(NoRuntime),
            Arc::new(NoSymbols),
        )
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn stop_reports_panicked_workers() {
        let shared = shared();
        let helper = std::thread::spawn(|| panic!("helper failed"));
        let mut workers = Workers {
            helper_id: shared.threads.reserve().unwrap(),
            helper: Some(helper),
            writer: None,
            dumper: None,
        };
        let err = workers.stop(&shared).unwrap_err();
        assert!(err.to_string().contains("helper"), "{err}");
        assert!(workers.helper.is_none());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn abandoned_start_joins_every_worker() {
        let shared = shared();
        let mut workers = Workers {
            helper_id: shared.threads.reserve().unwrap(),
            helper: Some(std::thread::spawn(|| panic!("helper failed"))),
            writer: Some(std::thread::spawn(|| ())),
            dumper: None,
        };
        workers.abandon(&shared);
        assert!(workers.helper.is_none());
        assert!(workers.writer.is_none());
    }
}
