// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::wire::{counter, event_type, metadata_kind, subtype, BYTE_SIZE, EVENT_SIZE, LEB128_SIZE};

/// One outgoing reference of a heap object: the field offset inside the referencing object and
/// the referenced object address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapRef {
    pub offset: u64,
    pub obj: u64,
}

/// Description of a runtime counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterDesc {
    pub section: u64,
    /// Category name; only carried on the wire for [`counter::PERFCOUNTERS`].
    pub section_name: Option<String>,
    pub name: String,
    pub kind: u64,
    pub unit: u64,
    pub variance: u64,
    /// Non-zero identifier used by counter samples.
    pub index: u64,
}

/// A counter value as carried on the wire. Integer kinds hold the difference from the previous
/// sample of the same counter, doubles and strings hold the value itself.
#[derive(Clone, Debug, PartialEq)]
pub enum CounterValue {
    Int(i64),
    UInt(u64),
    Word(i64),
    Long(i64),
    ULong(u64),
    Double(f64),
    String(Option<String>),
    TimeInterval(i64),
}

impl CounterValue {
    pub fn kind(&self) -> u64 {
        match self {
            CounterValue::Int(_) => counter::INT,
            CounterValue::UInt(_) => counter::UINT,
            CounterValue::Word(_) => counter::WORD,
            CounterValue::Long(_) => counter::LONG,
            CounterValue::ULong(_) => counter::ULONG,
            CounterValue::Double(_) => counter::DOUBLE,
            CounterValue::String(_) => counter::STRING,
            CounterValue::TimeInterval(_) => counter::TIME_INTERVAL,
        }
    }

    fn max_encoded_len(&self) -> usize {
        match self {
            CounterValue::Double(_) => 8,
            CounterValue::String(None) => BYTE_SIZE,
            CounterValue::String(Some(s)) => BYTE_SIZE + cstr_len(s),
            _ => LEB128_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CounterSample {
    pub index: u64,
    pub value: CounterValue,
}

/// Every event of the current data version.
///
/// Pointer fields hold absolute values; the encoder turns them into buffer-relative deltas.
/// Backtraces and sample frames are listed innermost frame first.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Object allocation. `vtable` is a class pointer in data versions before 15.
    Alloc {
        vtable: u64,
        obj: u64,
        size: u64,
        backtrace: Option<Vec<u64>>,
    },
    GcEvent {
        event: u8,
        generation: u8,
    },
    GcResize {
        size: u64,
    },
    /// Pairs of (old address, new address).
    GcMove {
        objects: Vec<u64>,
    },
    GcHandleCreated {
        handle_type: u64,
        handle: u64,
        obj: u64,
        backtrace: Option<Vec<u64>>,
    },
    GcHandleDestroyed {
        handle_type: u64,
        handle: u64,
        backtrace: Option<Vec<u64>>,
    },
    GcFinalizeStart,
    GcFinalizeEnd,
    GcFinalizeObjectStart {
        obj: u64,
    },
    GcFinalizeObjectEnd {
        obj: u64,
    },
    ClassLoad {
        klass: u64,
        image: u64,
        name: String,
    },
    ImageLoad {
        image: u64,
        name: String,
        guid: String,
    },
    ImageUnload {
        image: u64,
        name: String,
    },
    AssemblyLoad {
        assembly: u64,
        image: u64,
        name: String,
    },
    AssemblyUnload {
        assembly: u64,
        image: u64,
        name: String,
    },
    VTableLoad {
        vtable: u64,
        domain: u64,
        klass: u64,
    },
    ThreadStart {
        thread_id: u64,
    },
    ThreadEnd {
        thread_id: u64,
    },
    ThreadName {
        thread_id: u64,
        name: String,
    },
    DomainLoad {
        domain: u64,
    },
    DomainUnload {
        domain: u64,
    },
    DomainName {
        domain: u64,
        name: String,
    },
    ContextLoad {
        context: u64,
        domain: u64,
    },
    ContextUnload {
        context: u64,
        domain: u64,
    },
    MethodEnter {
        method: u64,
    },
    MethodLeave {
        method: u64,
    },
    MethodExcLeave {
        method: u64,
    },
    MethodJit {
        method: u64,
        code_start: u64,
        code_size: u64,
        name: String,
    },
    ExceptionThrow {
        obj: u64,
        backtrace: Option<Vec<u64>>,
    },
    ExceptionClause {
        clause_type: u8,
        clause_num: u64,
        method: u64,
        obj: u64,
    },
    Monitor {
        event: u8,
        obj: u64,
        backtrace: Option<Vec<u64>>,
    },
    HeapStart,
    HeapEnd,
    /// A heap walk object. A zero `size` continues the reference list of the previous object at
    /// the same address.
    HeapObject {
        obj: u64,
        vtable: u64,
        size: u64,
        generation: u8,
        refs: Vec<HeapRef>,
    },
    /// Pairs of (root address, object).
    HeapRoots {
        roots: Vec<(u64, u64)>,
    },
    HeapRootRegister {
        start: u64,
        size: u64,
        source: u8,
        key: u64,
        name: String,
    },
    HeapRootUnregister {
        start: u64,
    },
    SampleHit {
        thread_id: u64,
        ips: Vec<u64>,
        frames: Vec<u64>,
    },
    SampleUsym {
        addr: u64,
        size: u64,
        name: String,
    },
    CountersDesc {
        counters: Vec<CounterDesc>,
    },
    Counters {
        samples: Vec<CounterSample>,
    },
    /// Runtime generated code. `name` is only carried for specific trampolines.
    JitHelper {
        kind: u8,
        buffer: u64,
        size: u64,
        name: Option<String>,
    },
    SyncPoint {
        kind: u8,
    },
    AotId {
        id: String,
    },
}

/// Bytes a string takes on the wire: its content up to the first NUL, plus the terminator.
pub(crate) fn cstr_len(s: &str) -> usize {
    s.bytes().position(|b| b == 0).unwrap_or(s.len()) + 1
}

fn backtrace_len(backtrace: &Option<Vec<u64>>) -> usize {
    backtrace
        .as_ref()
        .map_or(0, |frames| LEB128_SIZE + frames.len() * LEB128_SIZE)
}

impl Event {
    /// The tag byte: event type in the low nibble, subtype and flag bits above it.
    pub fn tag(&self) -> u8 {
        use event_type as t;
        use subtype as s;
        match self {
            Event::Alloc { backtrace, .. } => {
                t::ALLOC | if backtrace.is_some() { s::ALLOC_BT } else { 0 }
            }
            Event::GcEvent { .. } => t::GC | s::GC_EVENT,
            Event::GcResize { .. } => t::GC | s::GC_RESIZE,
            Event::GcMove { .. } => t::GC | s::GC_MOVE,
            Event::GcHandleCreated { backtrace, .. } => {
                t::GC
                    | if backtrace.is_some() {
                        s::GC_HANDLE_CREATED_BT
                    } else {
                        s::GC_HANDLE_CREATED
                    }
            }
            Event::GcHandleDestroyed { backtrace, .. } => {
                t::GC
                    | if backtrace.is_some() {
                        s::GC_HANDLE_DESTROYED_BT
                    } else {
                        s::GC_HANDLE_DESTROYED
                    }
            }
            Event::GcFinalizeStart => t::GC | s::GC_FINALIZE_START,
            Event::GcFinalizeEnd => t::GC | s::GC_FINALIZE_END,
            Event::GcFinalizeObjectStart { .. } => t::GC | s::GC_FINALIZE_OBJECT_START,
            Event::GcFinalizeObjectEnd { .. } => t::GC | s::GC_FINALIZE_OBJECT_END,
            Event::ClassLoad { .. }
            | Event::ImageLoad { .. }
            | Event::AssemblyLoad { .. }
            | Event::VTableLoad { .. }
            | Event::ThreadStart { .. }
            | Event::DomainLoad { .. }
            | Event::ContextLoad { .. } => t::METADATA | s::END_LOAD,
            Event::ImageUnload { .. }
            | Event::AssemblyUnload { .. }
            | Event::ThreadEnd { .. }
            | Event::DomainUnload { .. }
            | Event::ContextUnload { .. } => t::METADATA | s::END_UNLOAD,
            Event::ThreadName { .. } | Event::DomainName { .. } => t::METADATA,
            Event::MethodEnter { .. } => t::METHOD | s::ENTER,
            Event::MethodLeave { .. } => t::METHOD | s::LEAVE,
            Event::MethodExcLeave { .. } => t::METHOD | s::EXC_LEAVE,
            Event::MethodJit { .. } => t::METHOD | s::JIT,
            Event::ExceptionThrow { backtrace, .. } => {
                t::EXCEPTION | if backtrace.is_some() { s::THROW_BT } else { 0 }
            }
            Event::ExceptionClause { .. } => t::EXCEPTION | s::CLAUSE,
            Event::Monitor { backtrace, .. } => {
                t::MONITOR | if backtrace.is_some() { s::MONITOR_BT } else { 0 }
            }
            Event::HeapStart => t::HEAP | s::HEAP_START,
            Event::HeapEnd => t::HEAP | s::HEAP_END,
            Event::HeapObject { .. } => t::HEAP | s::HEAP_OBJECT,
            Event::HeapRoots { .. } => t::HEAP | s::HEAP_ROOT,
            Event::HeapRootRegister { .. } => t::HEAP | s::HEAP_ROOT_REGISTER,
            Event::HeapRootUnregister { .. } => t::HEAP | s::HEAP_ROOT_UNREGISTER,
            Event::SampleHit { .. } => t::SAMPLE | s::SAMPLE_HIT,
            Event::SampleUsym { .. } => t::SAMPLE | s::SAMPLE_USYM,
            Event::CountersDesc { .. } => t::SAMPLE | s::SAMPLE_COUNTERS_DESC,
            Event::Counters { .. } => t::SAMPLE | s::SAMPLE_COUNTERS,
            Event::JitHelper { .. } => t::RUNTIME | s::JITHELPER,
            Event::SyncPoint { .. } => t::META | s::SYNC_POINT,
            Event::AotId { .. } => t::META | s::AOT_ID,
        }
    }

    /// The metadata kind byte written after the time delta, for metadata events.
    pub fn metadata_kind(&self) -> Option<u8> {
        use metadata_kind as k;
        Some(match self {
            Event::ClassLoad { .. } => k::CLASS,
            Event::ImageLoad { .. } | Event::ImageUnload { .. } => k::IMAGE,
            Event::AssemblyLoad { .. } | Event::AssemblyUnload { .. } => k::ASSEMBLY,
            Event::VTableLoad { .. } => k::VTABLE,
            Event::ThreadStart { .. } | Event::ThreadEnd { .. } | Event::ThreadName { .. } => {
                k::THREAD
            }
            Event::DomainLoad { .. } | Event::DomainUnload { .. } | Event::DomainName { .. } => {
                k::DOMAIN
            }
            Event::ContextLoad { .. } | Event::ContextUnload { .. } => k::CONTEXT,
            _ => return None,
        })
    }

    /// Methods this event references by pointer. A [`Event::MethodJit`] defines its method
    /// rather than referencing it, so it yields nothing.
    pub fn referenced_methods(&self) -> impl Iterator<Item = u64> + '_ {
        let (single, many): (Option<u64>, &[u64]) = match self {
            Event::MethodEnter { method }
            | Event::MethodLeave { method }
            | Event::MethodExcLeave { method }
            | Event::ExceptionClause { method, .. } => (Some(*method), &[]),
            Event::Alloc { backtrace, .. }
            | Event::GcHandleCreated { backtrace, .. }
            | Event::GcHandleDestroyed { backtrace, .. }
            | Event::ExceptionThrow { backtrace, .. }
            | Event::Monitor { backtrace, .. } => (None, backtrace.as_deref().unwrap_or(&[])),
            Event::SampleHit { frames, .. } => (None, frames),
            _ => (None, &[]),
        };
        single.into_iter().chain(many.iter().copied())
    }

    /// Upper bound of the bytes [`crate::EventEncoder::encode`] writes for this event, including
    /// the tag and time delta. Buffers reserve this much before encoding.
    pub fn max_encoded_len(&self) -> usize {
        const LEB: usize = LEB128_SIZE;
        const BYTE: usize = BYTE_SIZE;
        let fields = match self {
            Event::Alloc { backtrace, .. } => 3 * LEB + backtrace_len(backtrace),
            Event::GcEvent { .. } => 2 * BYTE,
            Event::GcResize { .. } => LEB,
            Event::GcMove { objects } => LEB + objects.len() * LEB,
            Event::GcHandleCreated { backtrace, .. } => 3 * LEB + backtrace_len(backtrace),
            Event::GcHandleDestroyed { backtrace, .. } => 2 * LEB + backtrace_len(backtrace),
            Event::GcFinalizeStart | Event::GcFinalizeEnd => 0,
            Event::GcFinalizeObjectStart { .. } | Event::GcFinalizeObjectEnd { .. } => LEB,
            Event::ClassLoad { name, .. } => BYTE + 2 * LEB + cstr_len(name),
            Event::ImageLoad { name, guid, .. } => BYTE + LEB + cstr_len(name) + cstr_len(guid),
            Event::ImageUnload { name, .. } => BYTE + LEB + cstr_len(name),
            Event::AssemblyLoad { name, .. } | Event::AssemblyUnload { name, .. } => {
                BYTE + 2 * LEB + cstr_len(name)
            }
            Event::VTableLoad { .. } => BYTE + 3 * LEB,
            Event::ThreadStart { .. }
            | Event::ThreadEnd { .. }
            | Event::DomainLoad { .. }
            | Event::DomainUnload { .. } => BYTE + LEB,
            Event::ThreadName { name, .. } | Event::DomainName { name, .. } => {
                BYTE + LEB + cstr_len(name)
            }
            Event::ContextLoad { .. } | Event::ContextUnload { .. } => BYTE + 2 * LEB,
            Event::MethodEnter { .. }
            | Event::MethodLeave { .. }
            | Event::MethodExcLeave { .. } => LEB,
            Event::MethodJit { name, .. } => 3 * LEB + cstr_len(name),
            Event::ExceptionThrow { backtrace, .. } => LEB + backtrace_len(backtrace),
            Event::ExceptionClause { .. } => BYTE + 3 * LEB,
            Event::Monitor { backtrace, .. } => BYTE + LEB + backtrace_len(backtrace),
            Event::HeapStart | Event::HeapEnd => 0,
            Event::HeapObject { refs, .. } => 3 * LEB + BYTE + LEB + refs.len() * 2 * LEB,
            Event::HeapRoots { roots } => LEB + roots.len() * 2 * LEB,
            Event::HeapRootRegister { name, .. } => 2 * LEB + BYTE + LEB + cstr_len(name),
            Event::HeapRootUnregister { .. } => LEB,
            Event::SampleHit { ips, frames, .. } => {
                LEB + LEB + ips.len() * LEB + LEB + frames.len() * LEB
            }
            Event::SampleUsym { name, .. } => 2 * LEB + cstr_len(name),
            Event::CountersDesc { counters } => {
                LEB + counters
                    .iter()
                    .map(|desc| {
                        let section = if desc.section == counter::PERFCOUNTERS {
                            cstr_len(desc.section_name.as_deref().unwrap_or(""))
                        } else {
                            0
                        };
                        LEB + section + cstr_len(&desc.name) + 4 * LEB
                    })
                    .sum::<usize>()
            }
            Event::Counters { samples } => {
                samples
                    .iter()
                    .map(|sample| 2 * LEB + sample.value.max_encoded_len())
                    .sum::<usize>()
                    + LEB
            }
            Event::JitHelper { name, .. } => {
                BYTE + 2 * LEB + name.as_deref().map_or(0, cstr_len)
            }
            Event::SyncPoint { .. } => BYTE,
            Event::AotId { id } => cstr_len(id),
        };
        EVENT_SIZE + fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags() {
        let alloc = Event::Alloc {
            vtable: 1,
            obj: 2,
            size: 8,
            backtrace: Some(vec![]),
        };
        assert_eq!(alloc.tag(), 0x10);
        assert_eq!(Event::HeapEnd.tag(), 0x16);
        assert_eq!(
            Event::ExceptionThrow {
                obj: 0,
                backtrace: Some(vec![1])
            }
            .tag(),
            0x84
        );
        assert_eq!(
            Event::ThreadName {
                thread_id: 1,
                name: "main".into()
            }
            .tag(),
            0x02
        );
        assert_eq!(Event::AotId { id: "x".into() }.tag(), 0x1a);
    }

    #[test]
    fn strings_stop_at_interior_nul() {
        assert_eq!(cstr_len("abc"), 4);
        assert_eq!(cstr_len("ab\0c"), 3);
        assert_eq!(cstr_len(""), 1);
    }

    #[test]
    fn referenced_methods() {
        let clause = Event::ExceptionClause {
            clause_type: 0,
            clause_num: 1,
            method: 0x40,
            obj: 8,
        };
        assert_eq!(clause.referenced_methods().collect::<Vec<_>>(), [0x40]);
        let throw = Event::ExceptionThrow {
            obj: 8,
            backtrace: Some(vec![0x10, 0x20]),
        };
        assert_eq!(throw.referenced_methods().collect::<Vec<_>>(), [0x10, 0x20]);
        let jit = Event::MethodJit {
            method: 0x40,
            code_start: 0x1000,
            code_size: 16,
            name: "Foo:Bar ()".into(),
        };
        assert_eq!(jit.referenced_methods().count(), 0);
    }
}
