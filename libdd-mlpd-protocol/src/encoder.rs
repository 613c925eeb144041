// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::delta::DeltaEncoder;
use crate::event::{CounterValue, Event};
use crate::varint::{write_sleb128, write_uleb128};
use crate::wire::counter;

/// Per-buffer encoding state: the running time cursor and the delta bases.
#[derive(Clone, Debug)]
pub struct EventEncoder {
    time_base: u64,
    last_time: u64,
    ptr: DeltaEncoder,
    obj: DeltaEncoder,
    method: DeltaEncoder,
}

impl EventEncoder {
    pub fn new(time_base: u64) -> Self {
        Self {
            time_base,
            last_time: time_base,
            ptr: DeltaEncoder::anchored(),
            obj: DeltaEncoder::anchored(),
            method: DeltaEncoder::chained(),
        }
    }

    pub fn time_base(&self) -> u64 {
        self.time_base
    }

    pub fn ptr_base(&self) -> u64 {
        self.ptr.base()
    }

    /// Object base, already shifted right by 3 as stored in the buffer header.
    pub fn obj_base(&self) -> u64 {
        self.obj.base()
    }

    pub fn method_base(&self) -> u64 {
        self.method.base()
    }

    /// Appends `event` stamped with `time` to `out`.
    ///
    /// Writes at most [`Event::max_encoded_len`] bytes. Times earlier than the previous event
    /// (JIT records and samples carry their own timestamps) wrap, like the readers expect.
    pub fn encode(&mut self, time: u64, event: &Event, out: &mut Vec<u8>) {
        out.push(event.tag());
        write_uleb128(out, time.wrapping_sub(self.last_time));
        self.last_time = time;
        if let Some(kind) = event.metadata_kind() {
            out.push(kind);
        }

        match event {
            Event::Alloc {
                vtable,
                obj,
                size,
                backtrace,
            } => {
                self.ptr(out, *vtable);
                self.obj(out, *obj);
                write_uleb128(out, *size);
                self.backtrace(out, backtrace);
            }
            Event::GcEvent { event, generation } => {
                out.push(*event);
                out.push(*generation);
            }
            Event::GcResize { size } => write_uleb128(out, *size),
            Event::GcMove { objects } => {
                write_uleb128(out, objects.len() as u64);
                for obj in objects {
                    self.obj(out, *obj);
                }
            }
            Event::GcHandleCreated {
                handle_type,
                handle,
                obj,
                backtrace,
            } => {
                write_uleb128(out, *handle_type);
                write_uleb128(out, *handle);
                self.obj(out, *obj);
                self.backtrace(out, backtrace);
            }
            Event::GcHandleDestroyed {
                handle_type,
                handle,
                backtrace,
            } => {
                write_uleb128(out, *handle_type);
                write_uleb128(out, *handle);
                self.backtrace(out, backtrace);
            }
            Event::GcFinalizeStart | Event::GcFinalizeEnd => {}
            Event::GcFinalizeObjectStart { obj } | Event::GcFinalizeObjectEnd { obj } => {
                self.obj(out, *obj)
            }
            Event::ClassLoad { klass, image, name } => {
                self.ptr(out, *klass);
                self.ptr(out, *image);
                cstr(out, name);
            }
            Event::ImageLoad { image, name, guid } => {
                self.ptr(out, *image);
                cstr(out, name);
                cstr(out, guid);
            }
            Event::ImageUnload { image, name } => {
                self.ptr(out, *image);
                cstr(out, name);
            }
            Event::AssemblyLoad {
                assembly,
                image,
                name,
            }
            | Event::AssemblyUnload {
                assembly,
                image,
                name,
            } => {
                self.ptr(out, *assembly);
                self.ptr(out, *image);
                cstr(out, name);
            }
            Event::VTableLoad {
                vtable,
                domain,
                klass,
            } => {
                self.ptr(out, *vtable);
                self.ptr(out, *domain);
                self.ptr(out, *klass);
            }
            Event::ThreadStart { thread_id } | Event::ThreadEnd { thread_id } => {
                self.ptr(out, *thread_id)
            }
            Event::ThreadName { thread_id, name } => {
                self.ptr(out, *thread_id);
                cstr(out, name);
            }
            Event::DomainLoad { domain } | Event::DomainUnload { domain } => {
                self.ptr(out, *domain)
            }
            Event::DomainName { domain, name } => {
                self.ptr(out, *domain);
                cstr(out, name);
            }
            Event::ContextLoad { context, domain } | Event::ContextUnload { context, domain } => {
                self.ptr(out, *context);
                self.ptr(out, *domain);
            }
            Event::MethodEnter { method }
            | Event::MethodLeave { method }
            | Event::MethodExcLeave { method } => self.method(out, *method),
            Event::MethodJit {
                method,
                code_start,
                code_size,
                name,
            } => {
                self.method(out, *method);
                self.ptr(out, *code_start);
                write_uleb128(out, *code_size);
                cstr(out, name);
            }
            Event::ExceptionThrow { obj, backtrace } => {
                self.obj(out, *obj);
                self.backtrace(out, backtrace);
            }
            Event::ExceptionClause {
                clause_type,
                clause_num,
                method,
                obj,
            } => {
                out.push(*clause_type);
                write_uleb128(out, *clause_num);
                self.method(out, *method);
                self.obj(out, *obj);
            }
            Event::Monitor {
                event,
                obj,
                backtrace,
            } => {
                out.push(*event);
                self.obj(out, *obj);
                self.backtrace(out, backtrace);
            }
            Event::HeapStart | Event::HeapEnd => {}
            Event::HeapObject {
                obj,
                vtable,
                size,
                generation,
                refs,
            } => {
                self.obj(out, *obj);
                self.ptr(out, *vtable);
                write_uleb128(out, *size);
                out.push(*generation);
                write_uleb128(out, refs.len() as u64);
                let mut last_offset = 0u64;
                for r in refs {
                    write_uleb128(out, r.offset.wrapping_sub(last_offset));
                    last_offset = r.offset;
                    self.obj(out, r.obj);
                }
            }
            Event::HeapRoots { roots } => {
                write_uleb128(out, roots.len() as u64);
                for (addr, obj) in roots {
                    self.ptr(out, *addr);
                    self.obj(out, *obj);
                }
            }
            Event::HeapRootRegister {
                start,
                size,
                source,
                key,
                name,
            } => {
                self.ptr(out, *start);
                write_uleb128(out, *size);
                out.push(*source);
                self.ptr(out, *key);
                cstr(out, name);
            }
            Event::HeapRootUnregister { start } => self.ptr(out, *start),
            Event::SampleHit {
                thread_id,
                ips,
                frames,
            } => {
                self.ptr(out, *thread_id);
                write_uleb128(out, ips.len() as u64);
                for ip in ips {
                    self.ptr(out, *ip);
                }
                write_uleb128(out, frames.len() as u64);
                for method in frames {
                    self.method(out, *method);
                }
            }
            Event::SampleUsym { addr, size, name } => {
                self.ptr(out, *addr);
                write_uleb128(out, *size);
                cstr(out, name);
            }
            Event::CountersDesc { counters } => {
                write_uleb128(out, counters.len() as u64);
                for desc in counters {
                    write_uleb128(out, desc.section);
                    if desc.section == counter::PERFCOUNTERS {
                        cstr(out, desc.section_name.as_deref().unwrap_or(""));
                    }
                    cstr(out, &desc.name);
                    write_uleb128(out, desc.kind);
                    write_uleb128(out, desc.unit);
                    write_uleb128(out, desc.variance);
                    write_uleb128(out, desc.index);
                }
            }
            Event::Counters { samples } => {
                for sample in samples {
                    write_uleb128(out, sample.index);
                    write_uleb128(out, sample.value.kind());
                    match &sample.value {
                        CounterValue::Int(v)
                        | CounterValue::Word(v)
                        | CounterValue::Long(v)
                        | CounterValue::TimeInterval(v) => write_sleb128(out, *v),
                        CounterValue::UInt(v) | CounterValue::ULong(v) => write_uleb128(out, *v),
                        CounterValue::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
                        CounterValue::String(None) => out.push(0),
                        CounterValue::String(Some(s)) => {
                            out.push(1);
                            cstr(out, s);
                        }
                    }
                }
                write_uleb128(out, 0);
            }
            Event::JitHelper {
                kind,
                buffer,
                size,
                name,
            } => {
                out.push(*kind);
                self.ptr(out, *buffer);
                write_uleb128(out, *size);
                if let Some(name) = name {
                    cstr(out, name);
                }
            }
            Event::SyncPoint { kind } => out.push(*kind),
            Event::AotId { id } => cstr(out, id),
        }
    }

    fn ptr(&mut self, out: &mut Vec<u8>, value: u64) {
        write_sleb128(out, self.ptr.first_or_delta(value));
    }

    fn obj(&mut self, out: &mut Vec<u8>, value: u64) {
        write_sleb128(out, self.obj.first_or_delta(value >> 3));
    }

    fn method(&mut self, out: &mut Vec<u8>, value: u64) {
        write_sleb128(out, self.method.first_or_delta(value));
    }

    fn backtrace(&mut self, out: &mut Vec<u8>, backtrace: &Option<Vec<u64>>) {
        if let Some(frames) = backtrace {
            write_uleb128(out, frames.len() as u64);
            for method in frames.iter().rev() {
                self.method(out, *method);
            }
        }
    }
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend(s.bytes().take_while(|b| *b != 0));
    out.push(0);
}
