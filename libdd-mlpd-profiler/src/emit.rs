// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime callbacks turned into events.
//!
//! Metadata events are always written since other events point at what they describe. The
//! rest are gated by the [`EventMask`] in force when the callback fires.

use crate::config::EventMask;
use crate::counters::RuntimeCounter;
use crate::profiler::{Flush, Profiler};
use crate::thread::ThreadHandle;
use libdd_mlpd_protocol::wire::{ClauseType, CodeBufferType, HandleType, MonitorEvent, RootSource};
use libdd_mlpd_protocol::Event;

impl Profiler {
    pub fn image_loaded(&self, handle: ThreadHandle, image: u64, name: &str, guid: &str) {
        let shared = &self.shared;
        let event = Event::ImageLoad {
            image,
            name: name.to_owned(),
            guid: guid.to_owned(),
        };
        shared.log(handle, &shared.counters.image_loads, event);
    }

    pub fn image_unloaded(&self, handle: ThreadHandle, image: u64, name: &str) {
        let shared = &self.shared;
        let event = Event::ImageUnload {
            image,
            name: name.to_owned(),
        };
        shared.log(handle, &shared.counters.image_unloads, event);
    }

    pub fn assembly_loaded(&self, handle: ThreadHandle, assembly: u64, image: u64, name: &str) {
        let shared = &self.shared;
        let event = Event::AssemblyLoad {
            assembly,
            image,
            name: name.to_owned(),
        };
        shared.log(handle, &shared.counters.assembly_loads, event);
    }

    pub fn assembly_unloaded(&self, handle: ThreadHandle, assembly: u64, image: u64, name: &str) {
        let shared = &self.shared;
        let event = Event::AssemblyUnload {
            assembly,
            image,
            name: name.to_owned(),
        };
        shared.log(handle, &shared.counters.assembly_unloads, event);
    }

    /// `name` is the full type name, nesting and namespace included.
    pub fn class_loaded(&self, handle: ThreadHandle, klass: u64, image: u64, name: &str) {
        let shared = &self.shared;
        let event = Event::ClassLoad {
            klass,
            image,
            name: name.to_owned(),
        };
        shared.log(handle, &shared.counters.class_loads, event);
    }

    pub fn vtable_loaded(&self, handle: ThreadHandle, vtable: u64, domain: u64, klass: u64) {
        let shared = &self.shared;
        let event = Event::VTableLoad {
            vtable,
            domain,
            klass,
        };
        shared.log(handle, &shared.counters.vtable_loads, event);
    }

    pub fn thread_start(&self, handle: ThreadHandle, thread_id: u64) {
        let shared = &self.shared;
        shared.log(handle, &shared.counters.thread_starts, Event::ThreadStart { thread_id });
    }

    /// Ends a thread: the end record is written, then the thread is detached and its buffer
    /// flushed. The handle is stale afterwards.
    pub fn thread_end(&self, handle: ThreadHandle, thread_id: u64) {
        let shared = &self.shared;
        shared.with_log(handle, |ctx| {
            let event = Event::ThreadEnd { thread_id };
            let now = shared.now();
            shared.write_event(ctx, &shared.counters.thread_ends, now, &event, Flush::Never);
            ctx.ended = true;
        });
        shared.detach(handle);
    }

    pub fn thread_name(&self, handle: ThreadHandle, thread_id: u64, name: &str) {
        let shared = &self.shared;
        let event = Event::ThreadName {
            thread_id,
            name: name.to_owned(),
        };
        shared.log(handle, &shared.counters.thread_names, event);
    }

    pub fn domain_loaded(&self, handle: ThreadHandle, domain: u64) {
        let shared = &self.shared;
        shared.log(handle, &shared.counters.domain_loads, Event::DomainLoad { domain });
    }

    pub fn domain_unloaded(&self, handle: ThreadHandle, domain: u64) {
        let shared = &self.shared;
        shared.log(handle, &shared.counters.domain_unloads, Event::DomainUnload { domain });
    }

    pub fn domain_name(&self, handle: ThreadHandle, domain: u64, name: &str) {
        let shared = &self.shared;
        let event = Event::DomainName {
            domain,
            name: name.to_owned(),
        };
        shared.log(handle, &shared.counters.domain_names, event);
    }

    pub fn context_loaded(&self, handle: ThreadHandle, context: u64, domain: u64) {
        let shared = &self.shared;
        let event = Event::ContextLoad { context, domain };
        shared.log(handle, &shared.counters.context_loads, event);
    }

    pub fn context_unloaded(&self, handle: ThreadHandle, context: u64, domain: u64) {
        let shared = &self.shared;
        let event = Event::ContextUnload { context, domain };
        shared.log(handle, &shared.counters.context_unloads, event);
    }

    /// An object allocation. `size` is rounded up to the heap alignment of 8 bytes.
    pub fn gc_alloc(&self, handle: ThreadHandle, vtable: u64, obj: u64, size: u64) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::ALLOC) {
            return;
        }
        let event = Event::Alloc {
            vtable,
            obj,
            size: (size + 7) & !7,
            backtrace: shared.backtrace(),
        };
        shared.log(handle, &shared.counters.gc_allocs, event);
    }

    pub fn gc_handle_created(
        &self,
        handle: ThreadHandle,
        gc_handle: u64,
        handle_type: HandleType,
        obj: u64,
    ) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::GC_HANDLE) {
            return;
        }
        let event = Event::GcHandleCreated {
            handle_type: u64::from(handle_type.raw()),
            handle: gc_handle,
            obj,
            backtrace: shared.backtrace(),
        };
        shared.log(handle, &shared.counters.gc_handle_creations, event);
    }

    pub fn gc_handle_deleted(&self, handle: ThreadHandle, gc_handle: u64, handle_type: HandleType) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::GC_HANDLE) {
            return;
        }
        let event = Event::GcHandleDestroyed {
            handle_type: u64::from(handle_type.raw()),
            handle: gc_handle,
            backtrace: shared.backtrace(),
        };
        shared.log(handle, &shared.counters.gc_handle_deletions, event);
    }

    /// A registered root range. `key` identifies the owning domain or context for the
    /// matching sources, by id rather than by pointer.
    ///
    /// Root range registrations are metadata for the heap shots and are written whatever the
    /// event mask.
    pub fn gc_root_register(
        &self,
        handle: ThreadHandle,
        start: u64,
        size: u64,
        source: RootSource,
        key: u64,
        name: Option<&str>,
    ) {
        let shared = &self.shared;
        let event = Event::HeapRootRegister {
            start,
            size,
            source: source.raw(),
            key,
            name: name.unwrap_or_default().to_owned(),
        };
        shared.log(handle, &shared.counters.heap_root_registers, event);
    }

    pub fn gc_root_unregister(&self, handle: ThreadHandle, start: u64) {
        let shared = &self.shared;
        let event = Event::HeapRootUnregister { start };
        shared.log(handle, &shared.counters.heap_root_unregisters, event);
    }

    pub fn method_enter(&self, handle: ThreadHandle, method: u64) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::CALL) {
            return;
        }
        let max_depth = shared.max_call_depth();
        shared.with_log(handle, |ctx| {
            let depth = ctx.call_depth;
            ctx.call_depth += 1;
            if depth <= max_depth {
                let event = Event::MethodEnter { method };
                let now = shared.now();
                let counter = &shared.counters.method_entries;
                shared.write_event(ctx, counter, now, &event, Flush::IfChained);
            }
        });
    }

    pub fn method_leave(&self, handle: ThreadHandle, method: u64) {
        self.method_exit(handle, Event::MethodLeave { method });
    }

    /// A tail call leaves the calling method.
    pub fn method_tail_call(&self, handle: ThreadHandle, method: u64, _target: u64) {
        self.method_leave(handle, method);
    }

    pub fn method_exc_leave(&self, handle: ThreadHandle, method: u64) {
        self.method_exit(handle, Event::MethodExcLeave { method });
    }

    fn method_exit(&self, handle: ThreadHandle, event: Event) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::CALL) {
            return;
        }
        let max_depth = shared.max_call_depth();
        shared.with_log(handle, |ctx| {
            ctx.call_depth -= 1;
            if ctx.call_depth <= max_depth {
                let counter = match event {
                    Event::MethodExcLeave { .. } => &shared.counters.method_exception_exits,
                    _ => &shared.counters.method_exits,
                };
                let now = shared.now();
                shared.write_event(ctx, counter, now, &event, Flush::IfChained);
            }
        });
    }

    /// A compiled method. Its JIT record, with these code bounds, precedes the first buffer
    /// of this thread that references it.
    pub fn method_jitted(&self, handle: ThreadHandle, method: u64, code_start: u64, code_size: u64) {
        self.shared.register_jitted(handle, method, code_start, code_size);
    }

    /// Runtime generated code. `name` is only recorded for specific trampolines.
    pub fn code_buffer_new(
        &self,
        handle: ThreadHandle,
        kind: CodeBufferType,
        buffer: u64,
        size: u64,
        name: Option<&str>,
    ) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::JIT) {
            return;
        }
        let name = match kind {
            CodeBufferType::SpecificTrampoline => name.map(str::to_owned),
            _ => None,
        };
        let event = Event::JitHelper {
            kind: kind.raw(),
            buffer,
            size,
            name,
        };
        shared.log(handle, &shared.counters.code_buffers, event);
    }

    pub fn throw_exc(&self, handle: ThreadHandle, obj: u64) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::EXCEPTION) {
            return;
        }
        let event = Event::ExceptionThrow {
            obj,
            backtrace: shared.backtrace(),
        };
        shared.log(handle, &shared.counters.exception_throws, event);
    }

    pub fn clause_exc(
        &self,
        handle: ThreadHandle,
        method: u64,
        clause_num: u64,
        clause_type: ClauseType,
        exc: u64,
    ) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::EXCEPTION) {
            return;
        }
        let event = Event::ExceptionClause {
            clause_type: clause_type.raw(),
            clause_num,
            method,
            obj: exc,
        };
        shared.log(handle, &shared.counters.exception_clauses, event);
    }

    pub fn monitor_event(&self, handle: ThreadHandle, obj: u64, event: MonitorEvent) {
        let shared = &self.shared;
        if !shared.enabled(EventMask::MONITOR) {
            return;
        }
        let event = Event::Monitor {
            event: event.raw(),
            obj,
            backtrace: shared.backtrace(),
        };
        shared.log(handle, &shared.counters.monitor_events, event);
    }

    pub fn monitor_contention(&self, handle: ThreadHandle, obj: u64) {
        self.monitor_event(handle, obj, MonitorEvent::Contention);
    }

    pub fn monitor_acquired(&self, handle: ThreadHandle, obj: u64) {
        self.monitor_event(handle, obj, MonitorEvent::Done);
    }

    pub fn monitor_failed(&self, handle: ThreadHandle, obj: u64) {
        self.monitor_event(handle, obj, MonitorEvent::Fail);
    }

    /// Samples counters outside of the periodic sampling of the helper thread. Counters are
    /// described the first time they are seen, and only changed values are written.
    pub fn sample_counters(&self, handle: ThreadHandle, counters: &[RuntimeCounter]) {
        let shared = &self.shared;
        if shared.enabled(EventMask::COUNTER) {
            shared.with_log(handle, |ctx| shared.write_counters(ctx, counters));
        }
    }
}
