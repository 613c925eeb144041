// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accumulates the decoded events of a profile into the state the reports are printed from.

use crate::counters::Counters;
use crate::error::ReportError;
use crate::heap::{HeapRoot, HeapShot, HeapShotCheck, ObjectError};
use crate::options::ReportOptions;
use crate::samples::Samples;
use crate::tables::{BacktraceId, Ptr, Tables, Traces};
use indexmap::IndexMap;
use libdd_mlpd_protocol::wire::{
    legacy_root, sample_type, subtype, ClauseType, CodeBufferType, GcEvent, HandleType,
    MonitorEvent, RootSource, SyncPoint, BUFFER_HEADER_SIZE, CLAUSE_SLOTS,
};
use libdd_mlpd_protocol::{
    BufferHeader, CounterSample, DecodeError, Decoded, Event, EventDecoder, FileHeader,
    LegacyEvent, Record, WireReader,
};
use std::io::{self, Write};

/// Writes a decoding trace line when `--debug` is set.
macro_rules! debug_line {
    ($report:ident, $($arg:tt)*) => {
        if $report.options.debug > 0 {
            writeln!($report.out, $($arg)*)?;
        }
    };
}

pub const GC_GENERATIONS: usize = 3;
pub const HANDLE_KINDS: usize = 4;

#[derive(Clone, Copy, Debug)]
struct Frame {
    method: u64,
    start: u64,
    /// Time spent in callees that already returned.
    callee: u64,
}

#[derive(Debug, Default)]
pub struct ThreadState {
    pub name: Option<String>,
    stack: Vec<Frame>,
    last_time: u64,
    /// Monitor this thread is waiting for, and since when.
    contention: Option<(u64, u64)>,
    heap_shot: Option<HeapShot>,
    roots: Vec<HeapRoot>,
    gc_start: [u64; GC_GENERATIONS],
}

impl ThreadState {
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcInfo {
    pub count: u64,
    pub total_time: u64,
    pub max_time: u64,
}

#[derive(Clone, Debug, Default)]
pub struct HandleInfo {
    pub created: u64,
    pub destroyed: u64,
    pub live: u64,
    pub max_live: u64,
    pub traces: Traces,
    pub destroy_traces: Traces,
}

#[derive(Debug, Default)]
pub struct GcStats {
    pub generations: [GcInfo; GC_GENERATIONS],
    pub handles: [HandleInfo; HANDLE_KINDS],
    pub resizes: u64,
    pub max_heap_size: u64,
    pub object_moves: u64,
}

#[derive(Clone, Debug, Default)]
pub struct MonitorDesc {
    pub obj: u64,
    pub contentions: u64,
    pub wait_time: u64,
    pub max_wait_time: u64,
    pub traces: Traces,
}

#[derive(Debug, Default)]
pub struct MonitorStats {
    pub monitors: IndexMap<u64, MonitorDesc>,
    pub contentions: u64,
    pub acquired: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub struct ExceptionStats {
    pub throws: u64,
    pub clauses: [u64; CLAUSE_SLOTS],
    pub traces: Traces,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventStat {
    pub count: u64,
    /// Smallest encoded size seen.
    pub min: u64,
    pub max: u64,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct EventStats {
    pub buffers: u64,
    /// Indexed by tag byte.
    pub per_tag: [EventStat; 256],
}

impl Default for EventStats {
    fn default() -> Self {
        Self {
            buffers: 0,
            per_tag: [EventStat::default(); 256],
        }
    }
}

impl EventStats {
    fn record(&mut self, tag: u8, len: usize) {
        let len = len as u64;
        let stat = &mut self.per_tag[usize::from(tag)];
        stat.count += 1;
        if stat.min == 0 || len < stat.min {
            stat.min = len;
        }
        stat.max = stat.max.max(len);
        stat.bytes += len;
    }

    /// Bytes spent on buffer headers.
    pub fn overhead(&self) -> u64 {
        self.buffers * BUFFER_HEADER_SIZE as u64
    }
}

/// Everything learned from a profile. Feed it buffers with [`Report::process_buffer`], call
/// [`Report::finish`] and print it with [`Report::print_reports`].
pub struct Report<W> {
    pub(crate) options: ReportOptions,
    pub(crate) out: W,
    pub(crate) header: FileHeader,
    /// Time base of the first buffer.
    pub(crate) startup_time: Option<u64>,
    time_from: u64,
    time_to: u64,
    pub(crate) tables: Tables,
    /// Newest thread first once printed; kept in discovery order here.
    pub(crate) threads: IndexMap<u64, ThreadState>,
    pub(crate) domains: IndexMap<u64, Option<String>>,
    /// Context -> domain
    pub(crate) contexts: IndexMap<u64, u64>,
    pub(crate) gc: GcStats,
    pub(crate) monitors: MonitorStats,
    pub(crate) exceptions: ExceptionStats,
    pub(crate) jit_helpers: u64,
    pub(crate) jit_helpers_code_size: u64,
    pub(crate) heap_shots: Vec<HeapShot>,
    heap_checks: Vec<HeapShotCheck>,
    pub(crate) samples: Samples,
    pub(crate) counters: Counters,
    pub(crate) stats: EventStats,
    tracked: Vec<u64>,
}

impl<W: Write> Report<W> {
    pub fn new(header: FileHeader, options: ReportOptions, out: W) -> Self {
        let tracked = options.track.clone();
        Self {
            options,
            out,
            header,
            startup_time: None,
            time_from: 0,
            time_to: u64::MAX,
            tables: Tables::default(),
            threads: IndexMap::new(),
            domains: IndexMap::new(),
            contexts: IndexMap::new(),
            gc: GcStats::default(),
            monitors: MonitorStats::default(),
            exceptions: ExceptionStats::default(),
            jit_helpers: 0,
            jit_helpers_code_size: 0,
            heap_shots: Vec::new(),
            heap_checks: Vec::new(),
            samples: Samples::default(),
            counters: Counters::default(),
            stats: EventStats::default(),
            tracked,
        }
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn threads(&self) -> &IndexMap<u64, ThreadState> {
        &self.threads
    }

    pub fn domains(&self) -> &IndexMap<u64, Option<String>> {
        &self.domains
    }

    pub fn contexts(&self) -> &IndexMap<u64, u64> {
        &self.contexts
    }

    pub fn gc(&self) -> &GcStats {
        &self.gc
    }

    pub fn monitors(&self) -> &MonitorStats {
        &self.monitors
    }

    pub fn exceptions(&self) -> &ExceptionStats {
        &self.exceptions
    }

    pub fn heap_shots(&self) -> &[HeapShot] {
        &self.heap_shots
    }

    /// Graph checks of completed heap shots, collected with `--debug` and `--traces`.
    pub fn heap_checks(&self) -> &[HeapShotCheck] {
        &self.heap_checks
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }

    /// Objects followed with `--track` or found with `--find`.
    pub fn tracked(&self) -> &[u64] {
        &self.tracked
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn in_window(&self, time: u64) -> bool {
        time >= self.time_from && time < self.time_to
    }

    fn thread_selected(&self, thread_id: u64) -> bool {
        self.options.thread.map_or(true, |selected| selected == thread_id)
    }

    /// Whether an event of `thread_id` at `time` passes both the thread and the time filter.
    fn selected(&self, thread_id: u64, time: u64) -> bool {
        self.thread_selected(thread_id) && self.in_window(time)
    }

    fn seconds_since_startup(&self, time: u64) -> f64 {
        time.wrapping_sub(self.startup_time.unwrap_or(0)) as f64 / 1_000_000_000.0
    }

    /// Prints the raw header of a buffer record with a bad magic number.
    pub fn dump_bad_buffer(&mut self, id: u32, raw: &[u8]) -> io::Result<()> {
        writeln!(self.out, "Incorrect buffer id: 0x{id:x}")?;
        for (i, byte) in raw.iter().enumerate() {
            let sep = if i % 8 != 0 { " " } else { "\n" };
            write!(self.out, "0x{byte:x}{sep}")?;
        }
        Ok(())
    }

    /// Decodes and accounts every event of one buffer record found at `file_offset`.
    pub fn process_buffer(
        &mut self,
        header: &BufferHeader,
        payload: &[u8],
        file_offset: u64,
    ) -> Result<(), ReportError> {
        debug_line!(
            self,
            "buf: thread:{:x}, len: {}, time: {}, file offset: {}",
            header.thread_id,
            header.len,
            header.time_base,
            file_offset
        );
        self.threads.entry(header.thread_id).or_default();
        self.stats.buffers += 1;
        if self.startup_time.is_none() {
            let startup = header.time_base;
            self.startup_time = Some(startup);
            if let Some(range) = &self.options.time {
                self.time_from = startup.saturating_add((range.from_secs * 1e9) as u64);
                self.time_to = startup.saturating_add((range.to_secs * 1e9) as u64);
            }
        }

        let mut decoder = EventDecoder::new(self.header.data_version, header);
        let mut reader = WireReader::new(payload);
        while !reader.is_empty() {
            let record = decoder.decode(&mut reader).map_err(|err| match err {
                DecodeError::UnhandledEvent { tag, offset } => ReportError::UnhandledEvent {
                    tag,
                    file_offset,
                    offset,
                    len: header.len,
                },
                source => ReportError::Malformed {
                    file_offset,
                    source,
                },
            });
            let record = match record {
                Ok(record) => record,
                Err(err @ ReportError::UnhandledEvent { .. }) => {
                    writeln!(self.out, "{err}")?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            self.stats.record(record.tag, record.len);
            self.handle_record(header.thread_id, record, file_offset)?;
        }

        self.threads.entry(header.thread_id).or_default().last_time = decoder.time();
        Ok(())
    }

    fn handle_record(
        &mut self,
        thread_id: u64,
        record: Record,
        file_offset: u64,
    ) -> Result<(), ReportError> {
        let Record {
            tag, time, event, ..
        } = record;
        match event {
            Decoded::Current(event) => self.handle_event(thread_id, tag, time, event, file_offset),
            Decoded::Legacy(event) => Ok(self.handle_legacy(thread_id, time, event)?),
        }
    }

    fn handle_event(
        &mut self,
        thread_id: u64,
        tag: u8,
        time: u64,
        event: Event,
        file_offset: u64,
    ) -> Result<(), ReportError> {
        let load_str = if tag & subtype::MASK == subtype::END_LOAD {
            "loaded"
        } else {
            "unloaded"
        };
        match event {
            Event::Alloc {
                vtable,
                obj,
                size,
                backtrace,
            } => self.alloc(thread_id, time, vtable, obj, size, backtrace)?,
            Event::GcEvent { event, generation } => {
                self.gc_event(thread_id, time, event, generation)?
            }
            Event::GcResize { size } => {
                debug_line!(self, "gc heap resized to {size}");
                self.gc.resizes += 1;
                self.gc.max_heap_size = self.gc.max_heap_size.max(size);
            }
            Event::GcMove { objects } => {
                self.gc.object_moves += objects.len() as u64 / 2;
                for pair in objects.chunks_exact(2) {
                    self.track_move(pair[0], pair[1])?;
                    debug_line!(self, "moved obj {} to {}", Ptr(pair[0]), Ptr(pair[1]));
                }
            }
            Event::GcHandleCreated {
                handle_type,
                handle,
                obj,
                backtrace,
            } => {
                let kind = Self::handle_kind(handle_type, file_offset)?;
                let bt = if self.selected(thread_id, time) {
                    let bt = self.backtrace(thread_id, backtrace.as_deref());
                    let info = &mut self.gc.handles[kind];
                    info.created += 1;
                    info.live += 1;
                    info.max_live = info.max_live.max(info.live);
                    if let Some(bt) = bt {
                        info.traces.add(bt, 1);
                    }
                    bt
                } else {
                    None
                };
                self.track_handle(obj, handle, bt, time)?;
                debug_line!(
                    self,
                    "handle ({}) {} created for object {}",
                    HandleType::name_of(kind as u8),
                    handle as u32,
                    Ptr(obj)
                );
            }
            Event::GcHandleDestroyed {
                handle_type,
                handle,
                backtrace,
            } => {
                let kind = Self::handle_kind(handle_type, file_offset)?;
                if self.selected(thread_id, time) {
                    let bt = self.backtrace(thread_id, backtrace.as_deref());
                    let info = &mut self.gc.handles[kind];
                    info.destroyed += 1;
                    info.live = info.live.saturating_sub(1);
                    if let Some(bt) = bt {
                        info.destroy_traces.add(bt, 1);
                    }
                }
                debug_line!(
                    self,
                    "handle ({}) {} destroyed",
                    HandleType::name_of(kind as u8),
                    handle as u32
                );
            }
            Event::GcFinalizeStart => {
                debug_line!(self, "gc finalizer queue being processed at {time}")
            }
            Event::GcFinalizeEnd => {
                debug_line!(self, "gc finalizer queue finished processing at {time}")
            }
            Event::GcFinalizeObjectStart { obj } => {
                debug_line!(self, "gc finalizing object {} at {time}", Ptr(obj))
            }
            Event::GcFinalizeObjectEnd { obj } => {
                debug_line!(self, "gc finalized object {} at {time}", Ptr(obj))
            }
            Event::ClassLoad { klass, image, name } => {
                debug_line!(
                    self,
                    "{load_str} class {} ({name} in {}) at {time}",
                    Ptr(klass),
                    Ptr(image)
                );
                self.tables.add_class(klass, &name);
            }
            Event::ImageLoad { image, name, .. } => {
                debug_line!(self, "{load_str} image {} ({name}) at {time}", Ptr(image));
                if !self.tables.images.iter().any(|(known, _)| *known == image) {
                    self.tables.images.push((image, name));
                }
            }
            Event::ImageUnload { image, name } => {
                debug_line!(self, "{load_str} image {} ({name}) at {time}", Ptr(image));
            }
            Event::AssemblyLoad { assembly, name, .. } => {
                debug_line!(
                    self,
                    "{load_str} assembly {} ({name}) at {time}",
                    Ptr(assembly)
                );
                if !self.tables.assemblies.iter().any(|(known, _)| *known == assembly) {
                    self.tables.assemblies.push((assembly, name));
                }
            }
            Event::AssemblyUnload { assembly, name, .. } => {
                debug_line!(
                    self,
                    "{load_str} assembly {} ({name}) at {time}",
                    Ptr(assembly)
                );
            }
            Event::VTableLoad {
                vtable,
                domain,
                klass,
            } => {
                debug_line!(
                    self,
                    "vtable {} for class {} in domain {} at {time}",
                    Ptr(vtable),
                    Ptr(klass),
                    Ptr(domain)
                );
                self.tables.add_vtable(vtable, klass);
            }
            Event::ThreadStart { thread_id: tid } | Event::ThreadEnd { thread_id: tid } => {
                self.threads.entry(tid).or_default();
                debug_line!(self, "{load_str} thread {} at {time}", Ptr(tid));
            }
            Event::ThreadName {
                thread_id: tid,
                name,
            } => {
                debug_line!(self, "thread {} named at {time}: {name}", Ptr(tid));
                self.threads.entry(tid).or_default().name = Some(name);
            }
            Event::DomainLoad { domain } | Event::DomainUnload { domain } => {
                self.domains.entry(domain).or_default();
                debug_line!(self, "{load_str} domain {} at {time}", Ptr(domain));
            }
            Event::DomainName { domain, name } => {
                debug_line!(self, "domain {} named at {time}: {name}", Ptr(domain));
                *self.domains.entry(domain).or_default() = Some(name);
            }
            Event::ContextLoad { context, domain } => {
                self.contexts.insert(context, domain);
                debug_line!(
                    self,
                    "{load_str} context {} ({}) at {time}",
                    Ptr(context),
                    Ptr(domain)
                );
            }
            Event::ContextUnload { context, domain } => {
                self.contexts.entry(context).or_insert(domain);
                debug_line!(
                    self,
                    "{load_str} context {} ({}) at {time}",
                    Ptr(context),
                    Ptr(domain)
                );
            }
            Event::MethodJit {
                method,
                code_start,
                code_size,
                name,
            } => {
                debug_line!(
                    self,
                    "jitted method {} ({name}), size: {code_size}, code: {}",
                    Ptr(method),
                    Ptr(code_start)
                );
                let outside = !self.in_window(time);
                let desc = self.tables.add_method(method, &name, code_start, code_size);
                if outside {
                    desc.ignore_jit = true;
                }
            }
            Event::MethodEnter { method } => {
                if self.selected(thread_id, time) {
                    let bt = self.thread_backtrace(thread_id);
                    let desc = self.tables.method(method);
                    if let Some(bt) = bt {
                        desc.traces.add(bt, 1);
                    }
                    self.threads.entry(thread_id).or_default().stack.push(Frame {
                        method,
                        start: time,
                        callee: 0,
                    });
                    debug_line!(self, "enter method {}", self.tables.method_name(method));
                }
            }
            Event::MethodLeave { method } | Event::MethodExcLeave { method } => {
                if self.selected(thread_id, time) {
                    self.pop_method(thread_id, method, time)?;
                    let what = if tag & subtype::MASK == subtype::EXC_LEAVE {
                        "exleave"
                    } else {
                        "leave"
                    };
                    debug_line!(self, "{what} method {}", self.tables.method_name(method));
                }
            }
            Event::ExceptionThrow { obj, backtrace } => {
                if self.selected(thread_id, time) {
                    self.exceptions.throws += 1;
                    if let Some(bt) = self.backtrace(thread_id, backtrace.as_deref()) {
                        self.exceptions.traces.add(bt, 1);
                    }
                } else if let Some(frames) = &backtrace {
                    self.touch_methods(frames);
                }
                debug_line!(self, "throw {}", Ptr(obj));
            }
            Event::ExceptionClause {
                clause_type,
                clause_num,
                method,
                ..
            } => {
                if self.selected(thread_id, time) {
                    if let Some(slot) = self.exceptions.clauses.get_mut(usize::from(clause_type)) {
                        *slot += 1;
                    }
                }
                let method_name = self.tables.method(method).name.clone();
                debug_line!(
                    self,
                    "clause {} ({clause_num}) in method {method_name}",
                    ClauseType::name_of(clause_type)
                );
            }
            Event::Monitor {
                event,
                obj,
                backtrace,
            } => self.monitor(thread_id, time, event, obj, backtrace)?,
            Event::HeapStart => {
                debug_line!(self, "heap shot start");
                let thread = self.threads.entry(thread_id).or_default();
                if let Some(previous) = thread.heap_shot.replace(HeapShot::new(time)) {
                    self.heap_shots.push(previous);
                }
            }
            Event::HeapEnd => {
                debug_line!(self, "heap shot end");
                self.end_heap_shot(thread_id)?;
            }
            Event::HeapObject {
                obj,
                vtable,
                size,
                refs,
                ..
            } => self.heap_object(thread_id, obj, vtable, size, &refs)?,
            Event::HeapRoots { roots } => {
                for (addr, obj) in roots {
                    debug_line!(self, "root object {} at address {}", Ptr(obj), Ptr(addr));
                    if self.options.traces {
                        self.threads
                            .entry(thread_id)
                            .or_default()
                            .roots
                            .push(HeapRoot {
                                obj,
                                root_type: legacy_root::MISC,
                                extra: 0,
                            });
                    }
                }
            }
            Event::HeapRootRegister {
                start,
                size,
                source,
                key,
                name,
            } => {
                debug_line!(
                    self,
                    "root register address {} size {size} type {} key {} name {name}",
                    Ptr(start),
                    RootSource::name_of(source),
                    Ptr(key)
                );
            }
            Event::HeapRootUnregister { start } => {
                debug_line!(self, "root unregister address {}", Ptr(start));
            }
            Event::SampleHit {
                thread_id: sampled,
                ips,
                frames,
            } => self.sample_hit(sample_type::CYCLES, sampled, time, &ips, &frames)?,
            Event::SampleUsym { addr, size, name } => {
                debug_line!(self, "unmanaged symbol {name} at {}", Ptr(addr));
                self.samples.add_symbol(addr, size, name);
            }
            Event::CountersDesc { counters } => {
                for desc in &counters {
                    self.counters.describe(desc);
                }
            }
            Event::Counters { samples } => {
                let startup = self.startup_time.unwrap_or(0);
                let timestamp = time.wrapping_sub(startup) / 1_000_000;
                self.counter_samples(timestamp, &samples);
            }
            Event::JitHelper {
                kind,
                buffer,
                size,
                name,
            } => {
                self.jit_helpers += 1;
                self.jit_helpers_code_size = self.jit_helpers_code_size.wrapping_add(size);
                let name = name.as_deref().unwrap_or(CodeBufferType::name_of(kind));
                debug_line!(
                    self,
                    "jit helper {name}, size: {size}, code: {}",
                    Ptr(buffer)
                );
            }
            Event::SyncPoint { kind } => {
                debug_line!(self, "sync point {kind} ({})", SyncPoint::name_of(kind));
            }
            Event::AotId { id } => {
                debug_line!(self, "aot id {id}");
            }
        }
        Ok(())
    }

    fn handle_legacy(&mut self, thread_id: u64, time: u64, event: LegacyEvent) -> io::Result<()> {
        match event {
            LegacyEvent::SampleHit {
                sample_type,
                thread_id: sampled,
                ips,
                frames,
            } => self.sample_hit(sample_type, sampled, time, &ips, &frames)?,
            LegacyEvent::UnmanagedBinary {
                addr, size, name, ..
            } => {
                debug_line!(self, "unmanaged binary {name} at {}", Ptr(addr));
                self.samples.add_binary(addr, size, name);
            }
            LegacyEvent::HeapRoots { roots, .. } => {
                for root in roots {
                    debug_line!(
                        self,
                        "object {} is a {} root",
                        Ptr(root.obj),
                        legacy_root::name(root.root_type)
                    );
                    if self.options.traces {
                        self.threads
                            .entry(thread_id)
                            .or_default()
                            .roots
                            .push(HeapRoot {
                                obj: root.obj,
                                root_type: root.root_type,
                                extra: root.extra,
                            });
                    }
                }
            }
            LegacyEvent::Counters {
                timestamp_ms,
                samples,
            } => self.counter_samples(timestamp_ms, &samples),
            LegacyEvent::Coverage => {}
        }
        Ok(())
    }

    fn handle_kind(handle_type: u64, file_offset: u64) -> Result<usize, ReportError> {
        match usize::try_from(handle_type) {
            Ok(kind) if kind < HANDLE_KINDS => Ok(kind),
            _ => Err(ReportError::InvalidHandleType {
                handle_type,
                file_offset,
            }),
        }
    }

    /// Makes sure every method of a backtrace has a descriptor.
    fn touch_methods(&mut self, frames: &[u64]) {
        for &method in frames {
            self.tables.method(method);
        }
    }

    /// Interns the backtrace carried by an event, innermost frame first on the wire side,
    /// or the current managed stack of the thread when the event has none.
    fn backtrace(&mut self, thread_id: u64, frames: Option<&[u64]>) -> Option<BacktraceId> {
        match frames {
            Some(frames) => self.event_backtrace(frames),
            None => self.thread_backtrace(thread_id),
        }
    }

    fn event_backtrace(&mut self, frames: &[u64]) -> Option<BacktraceId> {
        self.touch_methods(frames);
        if !self.options.traces {
            return None;
        }
        let bt = frames
            .iter()
            .rev()
            .take(self.options.trace_max)
            .copied()
            .collect();
        Some(self.tables.backtraces.intern(bt))
    }

    /// The innermost frames of the managed stack of `thread_id`.
    fn thread_backtrace(&mut self, thread_id: u64) -> Option<BacktraceId> {
        if !self.options.traces {
            return None;
        }
        let stack = &self.threads.get(&thread_id)?.stack;
        let skip = stack.len().saturating_sub(self.options.trace_max);
        let bt = stack[skip..].iter().map(|frame| frame.method).collect();
        Some(self.tables.backtraces.intern(bt))
    }

    fn write_backtrace(&mut self, bt: Option<BacktraceId>) -> io::Result<()> {
        let Some(bt) = bt else {
            return Ok(());
        };
        for &method in self.tables.backtraces.get(bt) {
            writeln!(self.out, "\t{}", self.tables.method_name(method))?;
        }
        Ok(())
    }

    fn alloc(
        &mut self,
        thread_id: u64,
        time: u64,
        vtable: u64,
        obj: u64,
        size: u64,
        backtrace: Option<Vec<u64>>,
    ) -> io::Result<()> {
        let klass = self.class_of(vtable);
        let class_name = self.tables.class(klass).name.clone();
        debug_line!(
            self,
            "alloced object {}, size {size} ({class_name}) at {time}",
            Ptr(obj)
        );
        if !self.selected(thread_id, time) {
            if let Some(frames) = &backtrace {
                self.touch_methods(frames);
            }
            return Ok(());
        }

        let bt = self.backtrace(thread_id, backtrace.as_deref());
        let class = self.tables.class(klass);
        class.allocs += 1;
        class.alloc_size = class.alloc_size.wrapping_add(size);
        if let Some(bt) = bt {
            class.traces.add(bt, size);
        }
        if let Some(find) = &self.options.find {
            if find.matches(size, &class_name) {
                self.tracked.push(obj);
            }
        }
        self.tracked_creation(obj, &class_name, size, bt, time)
    }

    /// Class of an allocation or heap object: a vtable since data version 15, the class
    /// pointer itself before.
    fn class_of(&mut self, vtable: u64) -> u64 {
        if self.header.data_version > 14 {
            self.tables.vtable_class(vtable)
        } else {
            self.tables.class(vtable);
            vtable
        }
    }

    fn gc_event(&mut self, thread_id: u64, time: u64, event: u8, generation: u8) -> io::Result<()> {
        debug_line!(
            self,
            "gc event for gen{generation}: {} at {time} (thread: 0x{thread_id:x})",
            GcEvent::name_of(event)
        );
        let gen = usize::from(generation);
        if gen >= GC_GENERATIONS {
            writeln!(self.out, "incorrect gc gen: {generation}")?;
            return Ok(());
        }
        let thread = self.threads.entry(thread_id).or_default();
        match GcEvent::from_raw(event) {
            Some(GcEvent::Start) => {
                thread.gc_start[gen] = time;
                self.gc.generations[gen].count += 1;
            }
            Some(GcEvent::End) => {
                let elapsed = time.wrapping_sub(thread.gc_start[gen]);
                let info = &mut self.gc.generations[gen];
                info.total_time = info.total_time.wrapping_add(elapsed);
                info.max_time = info.max_time.max(elapsed);
            }
            _ => {}
        }
        Ok(())
    }

    fn pop_method(&mut self, thread_id: u64, method: u64, time: u64) -> io::Result<()> {
        let thread = self.threads.entry(thread_id).or_default();
        let top = thread.stack.last().copied();
        let Some(frame) = top.filter(|frame| frame.method == method) else {
            let depth = thread.stack.len();
            let name = self.tables.method(method).name.clone();
            writeln!(
                self.out,
                "unmatched leave at stack pos: {depth} for method {name}"
            )?;
            return Ok(());
        };
        thread.stack.pop();

        let desc = self.tables.method(method);
        desc.calls += 1;
        if time < frame.start {
            writeln!(self.out, "time went backwards for {}", desc.name)?;
        }
        let elapsed = time.wrapping_sub(frame.start);
        if frame.callee > elapsed {
            writeln!(self.out, "callee time bigger for {}", desc.name)?;
        }
        desc.self_time = desc
            .self_time
            .wrapping_add(elapsed.wrapping_sub(frame.callee));
        desc.callee_time = desc.callee_time.wrapping_add(frame.callee);
        if let Some(parent) = thread.stack.last_mut() {
            parent.callee = parent.callee.wrapping_add(elapsed);
        }
        Ok(())
    }

    fn monitor(
        &mut self,
        thread_id: u64,
        time: u64,
        event: u8,
        obj: u64,
        backtrace: Option<Vec<u64>>,
    ) -> io::Result<()> {
        let record = self.selected(thread_id, time);
        let kind = MonitorEvent::from_raw(event);
        self.monitors
            .monitors
            .entry(obj)
            .or_insert_with(|| MonitorDesc {
                obj,
                ..Default::default()
            });

        if record {
            let thread = self.threads.entry(thread_id).or_default();
            match kind {
                Some(MonitorEvent::Contention) => {
                    self.monitors.contentions += 1;
                    if let Some(desc) = self.monitors.monitors.get_mut(&obj) {
                        desc.contentions += 1;
                    }
                    thread.contention = Some((obj, time));
                }
                Some(done @ (MonitorEvent::Done | MonitorEvent::Fail)) => {
                    if done == MonitorEvent::Fail {
                        self.monitors.failed += 1;
                    } else {
                        self.monitors.acquired += 1;
                    }
                    if let Some((waited_on, start)) = thread.contention.take() {
                        if start != 0 {
                            let wait = time.wrapping_sub(start);
                            if let Some(desc) = self.monitors.monitors.get_mut(&waited_on) {
                                desc.wait_time = desc.wait_time.wrapping_add(wait);
                                desc.max_wait_time = desc.max_wait_time.max(wait);
                            }
                        }
                    }
                }
                None => {}
            }
        }

        let bt = match &backtrace {
            Some(frames) => {
                if record && kind == Some(MonitorEvent::Contention) {
                    self.event_backtrace(frames)
                } else {
                    self.touch_methods(frames);
                    None
                }
            }
            None if record => self.thread_backtrace(thread_id),
            None => None,
        };
        if let (Some(bt), Some(desc)) = (bt, self.monitors.monitors.get_mut(&obj)) {
            desc.traces.add(bt, 1);
        }
        debug_line!(
            self,
            "monitor {} for object {}",
            MonitorEvent::name_of(event),
            Ptr(obj)
        );
        Ok(())
    }

    fn heap_object(
        &mut self,
        thread_id: u64,
        obj: u64,
        vtable: u64,
        size: u64,
        refs: &[libdd_mlpd_protocol::HeapRef],
    ) -> io::Result<()> {
        let klass = self.class_of(vtable);
        let class_name = self.tables.class(klass).name.clone();
        let targets: Vec<u64> = refs.iter().map(|r| r.obj).collect();
        let keep_graph = self.options.traces;

        let thread = self.threads.entry(thread_id).or_default();
        match thread.heap_shot.as_mut() {
            Some(shot) => match shot.add_object(obj, klass, size, &targets, keep_graph) {
                Ok(()) => {}
                Err(ObjectError::Duplicate) => writeln!(self.out, "duplicate object!")?,
                Err(ObjectError::Missing) => {
                    tracing::warn!(obj, "heap object continuation without a previous record")
                }
            },
            None => tracing::warn!(obj, thread_id, "heap object outside of a heap shot"),
        }

        for &target in &targets {
            self.track_obj_reference(target, obj, &class_name)?;
        }
        if size != 0 {
            debug_line!(
                self,
                "traced object {}, size {size} ({class_name}), refs: {}",
                Ptr(obj),
                targets.len()
            );
        }
        Ok(())
    }

    fn end_heap_shot(&mut self, thread_id: u64) -> io::Result<()> {
        let thread = self.threads.entry(thread_id).or_default();
        let roots = std::mem::take(&mut thread.roots);
        let Some(mut shot) = thread.heap_shot.take() else {
            tracing::warn!(thread_id, "heap shot end without a heap shot start");
            return Ok(());
        };
        if self.options.traces {
            shot.roots = roots;
            shot.resolve_reverse_refs();
            if let Some(check) = shot.mark_roots(self.options.debug > 0) {
                self.write_heap_check(&check)?;
                self.heap_checks.push(check);
            }
            shot.free_objects();
        }
        self.heap_shots.push(shot);
        Ok(())
    }

    fn write_heap_check(&mut self, check: &HeapShotCheck) -> io::Result<()> {
        for root in &check.missing_roots {
            let extra = self.tables.class(root.extra).name.clone();
            writeln!(
                self.out,
                "root type 0x{:x} for obj {} ({extra}) not found in heap",
                root.root_type,
                Ptr(root.obj)
            )?;
        }
        for &obj in &check.missing_refs {
            writeln!(self.out, "referenced obj {} not found in heap", Ptr(obj))?;
        }
        for &(obj, klass) in &check.unmarked {
            let name = self.tables.class(klass).name.clone();
            writeln!(self.out, "object {} ({name}) unmarked", Ptr(obj))?;
        }
        if !check.unmarked.is_empty() {
            writeln!(
                self.out,
                "Total unmarked: {}/{}",
                check.unmarked.len(),
                check.object_count
            )?;
        }
        Ok(())
    }

    fn sample_hit(
        &mut self,
        sample_type: u64,
        sampled_thread: u64,
        stamp: u64,
        ips: &[u64],
        frames: &[u64],
    ) -> io::Result<()> {
        for &ip in ips {
            if self.in_window(stamp) {
                self.samples.add_hit(sample_type, ip);
            }
            debug_line!(
                self,
                "sample hit, type: {sample_type} at {} for thread {}",
                Ptr(ip),
                Ptr(sampled_thread)
            );
        }
        for (i, &method) in frames.iter().enumerate() {
            let name = self.tables.method(method).name.clone();
            debug_line!(self, "sample hit bt {i}: {name}");
        }
        Ok(())
    }

    /// Records counter samples taken `timestamp` milliseconds after startup, if they fall in
    /// the time window.
    fn counter_samples(&mut self, timestamp: u64, samples: &[CounterSample]) {
        let startup = self.startup_time.unwrap_or(0);
        let sampled_at = (timestamp / 1000)
            .saturating_mul(1_000_000_000)
            .saturating_add(startup);
        if sampled_at < self.time_from || sampled_at > self.time_to {
            return;
        }
        for sample in samples {
            self.counters.sample(timestamp, sample);
        }
    }

    fn tracked_creation(
        &mut self,
        obj: u64,
        class_name: &str,
        size: u64,
        bt: Option<BacktraceId>,
        time: u64,
    ) -> io::Result<()> {
        let hits = self.tracked.iter().filter(|&&t| t == obj).count();
        let secs = self.seconds_since_startup(time);
        for _ in 0..hits {
            writeln!(
                self.out,
                "Object {} created ({class_name}, {size} bytes) at {secs:.3} secs.",
                Ptr(obj)
            )?;
            self.write_backtrace(bt)?;
        }
        Ok(())
    }

    fn track_handle(
        &mut self,
        obj: u64,
        handle: u64,
        bt: Option<BacktraceId>,
        time: u64,
    ) -> io::Result<()> {
        let hits = self.tracked.iter().filter(|&&t| t == obj).count();
        let secs = self.seconds_since_startup(time);
        for _ in 0..hits {
            writeln!(
                self.out,
                "Object {} referenced from handle {} at {secs:.3} secs.",
                Ptr(obj),
                handle as u32
            )?;
            self.write_backtrace(bt)?;
        }
        Ok(())
    }

    fn track_move(&mut self, src: u64, dst: u64) -> io::Result<()> {
        for &tracked in &self.tracked {
            if tracked == src {
                writeln!(self.out, "Object {} moved to {}", Ptr(src), Ptr(dst))?;
            } else if tracked == dst {
                writeln!(self.out, "Object {} moved from {}", Ptr(dst), Ptr(src))?;
            }
        }
        Ok(())
    }

    fn track_obj_reference(&mut self, obj: u64, parent: u64, class_name: &str) -> io::Result<()> {
        for &tracked in &self.tracked {
            if tracked == obj {
                writeln!(
                    self.out,
                    "Object {} referenced from {} ({class_name}).",
                    Ptr(obj),
                    Ptr(parent)
                )?;
            }
        }
        Ok(())
    }

    /// Closes the methods still on the stacks at the last time seen on each thread and keeps
    /// heap shots that never ended.
    pub fn finish(&mut self) -> io::Result<()> {
        let thread_ids: Vec<u64> = self.threads.keys().rev().copied().collect();
        for thread_id in thread_ids {
            loop {
                let Some(thread) = self.threads.get(&thread_id) else {
                    break;
                };
                let Some(top) = thread.stack.last() else {
                    break;
                };
                let (method, depth, last_time) = (top.method, thread.stack.len(), thread.last_time);
                debug_line!(self, "thread {} has {depth} items on stack", Ptr(thread_id));
                self.pop_method(thread_id, method, last_time)?;
            }
        }
        for thread in self.threads.values_mut() {
            if let Some(shot) = thread.heap_shot.take() {
                self.heap_shots.push(shot);
            }
        }
        Ok(())
    }
}
