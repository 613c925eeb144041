// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event decoding for every data version up to [`LOG_DATA_VERSION`].
//!
//! Version gates, oldest format first:
//! - before 13: small enums are ULEB128, metadata and backtraces carry a flags value, heap objects
//!   and symbols have no time delta, backtrace methods are plain pointer deltas;
//! - 13 and 14: legacy root records, counters use single bytes for type/unit/variance (until 15);
//! - 14 adds the monitor event byte and the image of assemblies;
//! - 15 references vtables from allocations and heap objects;
//! - 16 adds image GUIDs and heap object generations.

use crate::delta::{DeltaDecoder, DeltaMode};
use crate::error::DecodeError;
use crate::event::{CounterDesc, CounterSample, CounterValue, Event, HeapRef};
use crate::header::BufferHeader;
use crate::reader::WireReader;
use crate::wire::{
    counter, event_type, metadata_kind, sample_type, subtype, CodeBufferType, LOG_DATA_VERSION,
};

/// A root of the data version 13/14 root records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyRoot {
    pub obj: u64,
    pub root_type: u64,
    pub extra: u64,
}

/// Records that only exist in older streams.
#[derive(Clone, Debug, PartialEq)]
pub enum LegacyEvent {
    SampleHit {
        sample_type: u64,
        thread_id: u64,
        ips: Vec<u64>,
        frames: Vec<u64>,
    },
    UnmanagedBinary {
        addr: u64,
        offset: u64,
        size: u64,
        name: String,
    },
    HeapRoots {
        gc_count: u64,
        roots: Vec<LegacyRoot>,
    },
    /// Counter samples stamped with milliseconds since startup instead of a time delta.
    Counters {
        timestamp_ms: u64,
        samples: Vec<CounterSample>,
    },
    Coverage,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Current(Event),
    Legacy(LegacyEvent),
}

/// One decoded event and where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub tag: u8,
    /// Absolute time of the event. Legacy sample hits report their own timestamp here.
    pub time: u64,
    /// Offset of the tag byte inside the buffer payload.
    pub offset: usize,
    /// Encoded size of the event in bytes.
    pub len: usize,
    pub event: Decoded,
}

/// Decoding state of one buffer record.
#[derive(Clone, Debug)]
pub struct EventDecoder {
    version: u8,
    time: u64,
    thread_id: u64,
    ptr: DeltaDecoder,
    obj_base: u64,
    method: DeltaDecoder,
}

impl EventDecoder {
    pub fn new(data_version: u8, header: &BufferHeader) -> Self {
        debug_assert!(data_version <= LOG_DATA_VERSION);
        Self {
            version: data_version,
            time: header.time_base,
            thread_id: header.thread_id,
            ptr: DeltaDecoder::new(DeltaMode::Anchored, header.ptr_base),
            obj_base: header.obj_base,
            method: DeltaDecoder::new(DeltaMode::Chained, header.method_base),
        }
    }

    /// Time of the last decoded event, or the buffer time base before the first one.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn decode_all(&mut self, payload: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let mut reader = WireReader::new(payload);
        let mut records = Vec::new();
        while !reader.is_empty() {
            records.push(self.decode(&mut reader)?);
        }
        Ok(records)
    }

    pub fn decode(&mut self, r: &mut WireReader) -> Result<Record, DecodeError> {
        let offset = r.position();
        let tag = r.u8()?;
        let sub = tag & subtype::MASK;
        let unhandled = DecodeError::UnhandledEvent { tag, offset };
        let mut time = None;

        let event = match tag & 0x0f {
            event_type::ALLOC => {
                self.advance(r)?;
                let vtable = self.ptr(r)?;
                let obj = self.obj(r)?;
                let size = r.uleb()?;
                let backtrace = self.maybe_backtrace(r, sub & subtype::ALLOC_BT != 0)?;
                Decoded::Current(Event::Alloc {
                    vtable,
                    obj,
                    size,
                    backtrace,
                })
            }
            event_type::GC => {
                self.advance(r)?;
                Decoded::Current(self.gc(r, sub).ok_or(unhandled)??)
            }
            event_type::METADATA => {
                self.advance(r)?;
                Decoded::Current(self.metadata(r, sub).ok_or(unhandled)??)
            }
            event_type::METHOD => {
                self.advance(r)?;
                let method = self.method(r)?;
                Decoded::Current(match sub {
                    subtype::JIT => Event::MethodJit {
                        method,
                        code_start: self.ptr(r)?,
                        code_size: r.uleb()?,
                        name: r.cstr()?,
                    },
                    subtype::ENTER => Event::MethodEnter { method },
                    subtype::EXC_LEAVE => Event::MethodExcLeave { method },
                    _ => Event::MethodLeave { method },
                })
            }
            event_type::EXCEPTION => {
                self.advance(r)?;
                Decoded::Current(if tag & subtype::EXCEPTION_MASK == subtype::CLAUSE {
                    let clause_type = self.small_enum(r)?;
                    let clause_num = r.uleb()?;
                    let method = self.method(r)?;
                    let obj = if self.version > 13 { self.obj(r)? } else { 0 };
                    Event::ExceptionClause {
                        clause_type,
                        clause_num,
                        method,
                        obj,
                    }
                } else {
                    let obj = self.obj(r)?;
                    let backtrace = self.maybe_backtrace(r, tag & subtype::THROW_BT != 0)?;
                    Event::ExceptionThrow { obj, backtrace }
                })
            }
            event_type::MONITOR => {
                self.advance(r)?;
                let event = if self.version > 13 {
                    r.u8()?
                } else {
                    (tag >> 4) & 0x3
                };
                let obj = self.obj(r)?;
                let backtrace = self.maybe_backtrace(r, tag & subtype::MONITOR_BT != 0)?;
                Decoded::Current(Event::Monitor {
                    event,
                    obj,
                    backtrace,
                })
            }
            event_type::HEAP => self.heap(r, sub).ok_or(unhandled)??,
            event_type::SAMPLE => {
                let (event, stamp) = self.sample(r, sub).ok_or(unhandled)??;
                time = stamp;
                event
            }
            event_type::RUNTIME => {
                self.advance(r)?;
                if sub != subtype::JITHELPER {
                    return Err(unhandled);
                }
                let mut kind = self.small_enum(r)?;
                if self.version < 14 {
                    kind = kind.wrapping_sub(1);
                }
                let buffer = self.ptr(r)?;
                let size = r.uleb()?;
                let name = if kind == CodeBufferType::SpecificTrampoline.raw() {
                    Some(r.cstr()?)
                } else {
                    None
                };
                Decoded::Current(Event::JitHelper {
                    kind,
                    buffer,
                    size,
                    name,
                })
            }
            event_type::COVERAGE => {
                if self.version > 12 {
                    self.advance(r)?;
                }
                let (strings, values) = match sub {
                    subtype::COVERAGE_METHOD => (5, 3),
                    subtype::COVERAGE_STATEMENT => (0, 5),
                    subtype::COVERAGE_ASSEMBLY => (3, 3),
                    subtype::COVERAGE_CLASS => (2, 3),
                    _ => (0, 0),
                };
                for _ in 0..strings {
                    r.skip_cstr()?;
                }
                for _ in 0..values {
                    r.uleb()?;
                }
                Decoded::Legacy(LegacyEvent::Coverage)
            }
            event_type::META => {
                self.advance(r)?;
                Decoded::Current(match sub {
                    subtype::SYNC_POINT => Event::SyncPoint { kind: r.u8()? },
                    subtype::AOT_ID => Event::AotId { id: r.cstr()? },
                    _ => return Err(unhandled),
                })
            }
            _ => return Err(unhandled),
        };

        Ok(Record {
            tag,
            time: time.unwrap_or(self.time),
            offset,
            len: r.position() - offset,
            event,
        })
    }

    fn advance(&mut self, r: &mut WireReader) -> Result<(), DecodeError> {
        let delta = r.uleb()?;
        self.time = self.time.wrapping_add(delta);
        Ok(())
    }

    fn ptr(&mut self, r: &mut WireReader) -> Result<u64, DecodeError> {
        Ok(self.ptr.apply(r.sleb()?))
    }

    fn obj(&mut self, r: &mut WireReader) -> Result<u64, DecodeError> {
        Ok(self.obj_base.wrapping_add_signed(r.sleb()?) << 3)
    }

    fn method(&mut self, r: &mut WireReader) -> Result<u64, DecodeError> {
        Ok(self.method.apply(r.sleb()?))
    }

    /// Enumerations written as one byte since data version 13, ULEB128 before.
    fn small_enum(&mut self, r: &mut WireReader) -> Result<u8, DecodeError> {
        if self.version > 12 {
            r.u8()
        } else {
            Ok(r.uleb()? as u8)
        }
    }

    fn legacy_flags(&mut self, r: &mut WireReader) -> Result<(), DecodeError> {
        if self.version < 13 {
            r.uleb()?;
        }
        Ok(())
    }

    fn maybe_backtrace(
        &mut self,
        r: &mut WireReader,
        present: bool,
    ) -> Result<Option<Vec<u64>>, DecodeError> {
        if !present {
            return Ok(None);
        }
        self.legacy_flags(r)?;
        let count = r.uleb()?;
        let mut frames = Vec::new();
        for _ in 0..count {
            let diff = r.sleb()?;
            frames.push(if self.version > 12 {
                self.method.apply(diff)
            } else {
                self.ptr.base().wrapping_add_signed(diff)
            });
        }
        // Written outermost first.
        frames.reverse();
        Ok(Some(frames))
    }

    fn gc(&mut self, r: &mut WireReader, sub: u8) -> Option<Result<Event, DecodeError>> {
        let mut decode = || -> Result<Option<Event>, DecodeError> {
            Ok(Some(match sub {
                subtype::GC_EVENT => Event::GcEvent {
                    event: self.small_enum(r)?,
                    generation: self.small_enum(r)?,
                },
                subtype::GC_RESIZE => Event::GcResize { size: r.uleb()? },
                subtype::GC_MOVE => {
                    let num = r.uleb()?;
                    let mut objects = Vec::new();
                    for _ in 0..num {
                        objects.push(self.obj(r)?);
                    }
                    Event::GcMove { objects }
                }
                subtype::GC_HANDLE_CREATED | subtype::GC_HANDLE_CREATED_BT => {
                    let handle_type = r.uleb()?;
                    let handle = r.uleb()?;
                    let obj = self.obj(r)?;
                    let backtrace =
                        self.maybe_backtrace(r, sub == subtype::GC_HANDLE_CREATED_BT)?;
                    Event::GcHandleCreated {
                        handle_type,
                        handle,
                        obj,
                        backtrace,
                    }
                }
                subtype::GC_HANDLE_DESTROYED | subtype::GC_HANDLE_DESTROYED_BT => {
                    let handle_type = r.uleb()?;
                    let handle = r.uleb()?;
                    let backtrace =
                        self.maybe_backtrace(r, sub == subtype::GC_HANDLE_DESTROYED_BT)?;
                    Event::GcHandleDestroyed {
                        handle_type,
                        handle,
                        backtrace,
                    }
                }
                subtype::GC_FINALIZE_START => Event::GcFinalizeStart,
                subtype::GC_FINALIZE_END => Event::GcFinalizeEnd,
                subtype::GC_FINALIZE_OBJECT_START => Event::GcFinalizeObjectStart {
                    obj: self.obj(r)?,
                },
                subtype::GC_FINALIZE_OBJECT_END => Event::GcFinalizeObjectEnd {
                    obj: self.obj(r)?,
                },
                _ => return Ok(None),
            }))
        };
        decode().transpose()
    }

    fn metadata(&mut self, r: &mut WireReader, sub: u8) -> Option<Result<Event, DecodeError>> {
        let mut decode = || -> Result<Option<Event>, DecodeError> {
            let kind = r.u8()?;
            let ptr = self.ptr(r)?;
            let unload = sub == subtype::END_UNLOAD;
            Ok(Some(match kind {
                metadata_kind::CLASS => {
                    let image = self.ptr(r)?;
                    self.legacy_flags(r)?;
                    Event::ClassLoad {
                        klass: ptr,
                        image,
                        name: r.cstr()?,
                    }
                }
                metadata_kind::IMAGE => {
                    self.legacy_flags(r)?;
                    let name = r.cstr()?;
                    if unload {
                        Event::ImageUnload { image: ptr, name }
                    } else {
                        let guid = if self.version >= 16 && sub == subtype::END_LOAD {
                            r.cstr()?
                        } else {
                            String::new()
                        };
                        Event::ImageLoad {
                            image: ptr,
                            name,
                            guid,
                        }
                    }
                }
                metadata_kind::ASSEMBLY => {
                    let image = if self.version > 13 { self.ptr(r)? } else { 0 };
                    self.legacy_flags(r)?;
                    let name = r.cstr()?;
                    if unload {
                        Event::AssemblyUnload {
                            assembly: ptr,
                            image,
                            name,
                        }
                    } else {
                        Event::AssemblyLoad {
                            assembly: ptr,
                            image,
                            name,
                        }
                    }
                }
                metadata_kind::DOMAIN => {
                    self.legacy_flags(r)?;
                    match sub {
                        0 => Event::DomainName {
                            domain: ptr,
                            name: r.cstr()?,
                        },
                        subtype::END_UNLOAD => Event::DomainUnload { domain: ptr },
                        _ => Event::DomainLoad { domain: ptr },
                    }
                }
                metadata_kind::CONTEXT => {
                    self.legacy_flags(r)?;
                    let domain = self.ptr(r)?;
                    if unload {
                        Event::ContextUnload {
                            context: ptr,
                            domain,
                        }
                    } else {
                        Event::ContextLoad {
                            context: ptr,
                            domain,
                        }
                    }
                }
                metadata_kind::THREAD => {
                    self.legacy_flags(r)?;
                    match sub {
                        0 => Event::ThreadName {
                            thread_id: ptr,
                            name: r.cstr()?,
                        },
                        subtype::END_UNLOAD => Event::ThreadEnd { thread_id: ptr },
                        _ => Event::ThreadStart { thread_id: ptr },
                    }
                }
                metadata_kind::VTABLE => Event::VTableLoad {
                    vtable: ptr,
                    domain: self.ptr(r)?,
                    klass: self.ptr(r)?,
                },
                _ => return Ok(None),
            }))
        };
        decode().transpose()
    }

    fn heap(&mut self, r: &mut WireReader, sub: u8) -> Option<Result<Decoded, DecodeError>> {
        let mut decode = || -> Result<Option<Decoded>, DecodeError> {
            Ok(Some(match sub {
                subtype::HEAP_OBJECT => {
                    if self.version > 12 {
                        self.advance(r)?;
                    }
                    let obj = self.obj(r)?;
                    let vtable = self.ptr(r)?;
                    let size = r.uleb()?;
                    let generation = if self.version >= 16 { r.u8()? } else { 0 };
                    let num = r.uleb()?;
                    let mut refs = Vec::new();
                    let mut last_offset = 0u64;
                    for _ in 0..num {
                        let offset = if self.version > 1 {
                            last_offset.wrapping_add(r.uleb()?)
                        } else {
                            u64::MAX
                        };
                        last_offset = offset;
                        refs.push(HeapRef {
                            offset,
                            obj: self.obj(r)?,
                        });
                    }
                    Decoded::Current(Event::HeapObject {
                        obj,
                        vtable,
                        size,
                        generation,
                        refs,
                    })
                }
                subtype::HEAP_ROOT if self.version > 14 => {
                    self.advance(r)?;
                    let num = r.uleb()?;
                    let mut roots = Vec::new();
                    for _ in 0..num {
                        let addr = self.ptr(r)?;
                        roots.push((addr, self.obj(r)?));
                    }
                    Decoded::Current(Event::HeapRoots { roots })
                }
                subtype::HEAP_ROOT => {
                    if self.version > 12 {
                        self.advance(r)?;
                    }
                    let num = r.uleb()?;
                    let gc_count = r.uleb()?;
                    let mut roots = Vec::new();
                    for _ in 0..num {
                        let obj = self.obj(r)?;
                        let root_type = if self.version == 13 {
                            u64::from(r.u8()?)
                        } else {
                            r.uleb()?
                        };
                        let extra = r.uleb()?;
                        roots.push(LegacyRoot {
                            obj,
                            root_type,
                            extra,
                        });
                    }
                    Decoded::Legacy(LegacyEvent::HeapRoots { gc_count, roots })
                }
                subtype::HEAP_ROOT_REGISTER => {
                    self.advance(r)?;
                    Decoded::Current(Event::HeapRootRegister {
                        start: self.ptr(r)?,
                        size: r.uleb()?,
                        source: r.u8()?,
                        key: self.ptr(r)?,
                        name: r.cstr()?,
                    })
                }
                subtype::HEAP_ROOT_UNREGISTER => {
                    self.advance(r)?;
                    Decoded::Current(Event::HeapRootUnregister {
                        start: self.ptr(r)?,
                    })
                }
                subtype::HEAP_END => {
                    self.advance(r)?;
                    Decoded::Current(Event::HeapEnd)
                }
                subtype::HEAP_START => {
                    self.advance(r)?;
                    Decoded::Current(Event::HeapStart)
                }
                _ => return Ok(None),
            }))
        };
        decode().transpose()
    }

    #[allow(clippy::type_complexity)]
    fn sample(
        &mut self,
        r: &mut WireReader,
        sub: u8,
    ) -> Option<Result<(Decoded, Option<u64>), DecodeError>> {
        let mut decode = || -> Result<Option<(Decoded, Option<u64>)>, DecodeError> {
            Ok(Some(match sub {
                subtype::SAMPLE_HIT => {
                    let (kind, stamp) = if self.version > 12 {
                        self.advance(r)?;
                        let kind = if self.version < 14 {
                            u64::from(r.u8()?)
                        } else {
                            sample_type::CYCLES
                        };
                        (kind, self.time)
                    } else {
                        (r.uleb()?, r.uleb()?)
                    };
                    let thread_id = if self.version > 10 {
                        self.ptr(r)?
                    } else {
                        self.thread_id
                    };
                    let count = r.uleb()?;
                    let mut ips = Vec::new();
                    for _ in 0..count {
                        ips.push(self.ptr(r)?);
                    }
                    let mut frames = Vec::new();
                    if self.version > 5 {
                        let count = r.uleb()?;
                        for _ in 0..count {
                            frames.push(self.method(r)?);
                            if self.version < 13 {
                                r.sleb()?;
                                r.sleb()?;
                            }
                        }
                    }
                    if self.version < 14 {
                        (
                            Decoded::Legacy(LegacyEvent::SampleHit {
                                sample_type: kind,
                                thread_id,
                                ips,
                                frames,
                            }),
                            Some(stamp),
                        )
                    } else {
                        (
                            Decoded::Current(Event::SampleHit {
                                thread_id,
                                ips,
                                frames,
                            }),
                            None,
                        )
                    }
                }
                subtype::SAMPLE_USYM => {
                    if self.version > 12 {
                        self.advance(r)?;
                    }
                    (
                        Decoded::Current(Event::SampleUsym {
                            addr: self.ptr(r)?,
                            size: r.uleb()?,
                            name: r.cstr()?,
                        }),
                        None,
                    )
                }
                subtype::SAMPLE_UBIN => {
                    self.advance(r)?;
                    let raw = r.sleb()?;
                    let addr = if self.version > 13 {
                        self.ptr.base().wrapping_add_signed(raw)
                    } else {
                        raw as u64
                    };
                    (
                        Decoded::Legacy(LegacyEvent::UnmanagedBinary {
                            addr,
                            offset: r.uleb()?,
                            size: r.uleb()?,
                            name: r.cstr()?,
                        }),
                        None,
                    )
                }
                subtype::SAMPLE_COUNTERS_DESC => {
                    if self.version > 12 {
                        self.advance(r)?;
                    }
                    let len = r.uleb()?;
                    let mut counters = Vec::new();
                    for _ in 0..len {
                        let section = r.uleb()?;
                        let section_name = if section == counter::PERFCOUNTERS {
                            Some(r.cstr()?)
                        } else {
                            None
                        };
                        let name = r.cstr()?;
                        let (kind, unit, variance) = if self.byte_counter_fields() {
                            (
                                u64::from(r.u8()?),
                                u64::from(r.u8()?),
                                u64::from(r.u8()?),
                            )
                        } else {
                            (r.uleb()?, r.uleb()?, r.uleb()?)
                        };
                        counters.push(CounterDesc {
                            section,
                            section_name,
                            name,
                            kind,
                            unit,
                            variance,
                            index: r.uleb()?,
                        });
                    }
                    (Decoded::Current(Event::CountersDesc { counters }), None)
                }
                subtype::SAMPLE_COUNTERS => {
                    let legacy_ms = if self.version > 12 {
                        self.advance(r)?;
                        None
                    } else {
                        Some(r.uleb()?)
                    };
                    let samples = self.counter_samples(r)?;
                    let event = match legacy_ms {
                        Some(timestamp_ms) => Decoded::Legacy(LegacyEvent::Counters {
                            timestamp_ms,
                            samples,
                        }),
                        None => Decoded::Current(Event::Counters { samples }),
                    };
                    (event, None)
                }
                _ => return Ok(None),
            }))
        };
        decode().transpose()
    }

    fn byte_counter_fields(&self) -> bool {
        self.version > 12 && self.version < 15
    }

    fn counter_samples(&mut self, r: &mut WireReader) -> Result<Vec<CounterSample>, DecodeError> {
        let mut samples = Vec::new();
        loop {
            let index = r.uleb()?;
            if index == 0 {
                return Ok(samples);
            }
            let offset = r.position();
            let kind = if self.byte_counter_fields() {
                u64::from(r.u8()?)
            } else {
                r.uleb()?
            };
            let value = match kind {
                counter::INT => CounterValue::Int(r.sleb()?),
                counter::WORD => CounterValue::Word(r.sleb()?),
                counter::LONG => CounterValue::Long(r.sleb()?),
                counter::TIME_INTERVAL => CounterValue::TimeInterval(r.sleb()?),
                counter::UINT => CounterValue::UInt(r.uleb()?),
                counter::ULONG => CounterValue::ULong(r.uleb()?),
                counter::DOUBLE => CounterValue::Double(r.f64_le()?),
                counter::STRING => {
                    if r.u8()? == 0 {
                        CounterValue::String(None)
                    } else {
                        CounterValue::String(Some(r.cstr()?))
                    }
                }
                _ => return Err(DecodeError::UnknownCounterType { kind, offset }),
            };
            samples.push(CounterSample { index, value });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EventEncoder;
    use crate::varint::{write_sleb128, write_uleb128};
    use crate::wire::{GcEvent, MonitorEvent};

    fn header(encoder: &EventEncoder) -> BufferHeader {
        BufferHeader {
            len: 0,
            time_base: encoder.time_base(),
            ptr_base: encoder.ptr_base(),
            obj_base: encoder.obj_base(),
            thread_id: 7,
            method_base: encoder.method_base(),
        }
    }

    fn round_trip(events: &[(u64, Event)]) -> Vec<Record> {
        let mut encoder = EventEncoder::new(1_000);
        let mut payload = Vec::new();
        for (time, event) in events {
            encoder.encode(*time, event, &mut payload);
        }
        let mut decoder = EventDecoder::new(LOG_DATA_VERSION, &header(&encoder));
        decoder.decode_all(&payload).unwrap()
    }

    #[test]
    fn class_then_alloc() {
        let records = round_trip(&[
            (
                1_010,
                Event::ClassLoad {
                    klass: 0x1000,
                    image: 0x2000,
                    name: "Foo".into(),
                },
            ),
            (
                1_020,
                Event::Alloc {
                    vtable: 0x1000,
                    obj: 0x7f00_0010,
                    size: 24,
                    backtrace: None,
                },
            ),
        ]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, 1_010);
        assert_eq!(records[1].time, 1_020);
        assert_eq!(
            records[1].event,
            Decoded::Current(Event::Alloc {
                vtable: 0x1000,
                obj: 0x7f00_0010,
                size: 24,
                backtrace: None,
            })
        );
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[1].offset, records[0].len);
    }

    #[test]
    fn backtraces_keep_capture_order() {
        let events = vec![
            (
                1_001,
                Event::Monitor {
                    event: MonitorEvent::Contention.raw(),
                    obj: 0x5000,
                    backtrace: Some(vec![0x300, 0x200, 0x100]),
                },
            ),
            (
                1_002,
                Event::ExceptionThrow {
                    obj: 0x5008,
                    backtrace: Some(vec![0x100, 0x400]),
                },
            ),
            (
                1_003,
                Event::GcHandleDestroyed {
                    handle_type: 2,
                    handle: 9,
                    backtrace: Some(vec![]),
                },
            ),
        ];
        let records = round_trip(&events);
        for ((_, expected), record) in events.iter().zip(&records) {
            assert_eq!(&record.event, &Decoded::Current(expected.clone()));
        }
    }

    #[test]
    fn out_of_order_times_wrap() {
        let records = round_trip(&[
            (
                1_500,
                Event::GcEvent {
                    event: GcEvent::Start.raw(),
                    generation: 1,
                },
            ),
            (
                1_200,
                Event::MethodJit {
                    method: 0xabc0,
                    code_start: 0x9000,
                    code_size: 64,
                    name: "Foo:Bar ()".into(),
                },
            ),
            (1_600, Event::HeapStart),
        ]);
        let times: Vec<u64> = records.iter().map(|r| r.time).collect();
        assert_eq!(times, [1_500, 1_200, 1_600]);
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let header = BufferHeader::default();
        let mut decoder = EventDecoder::new(LOG_DATA_VERSION, &header);
        let err = decoder.decode_all(&[0x0b, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnhandledEvent {
                tag: 0x0b,
                offset: 0
            }
        ));
    }

    #[test]
    fn legacy_gc_event_and_monitor() {
        // Data version 12: uleb enums, monitor event in the tag, no heap object time.
        let mut payload = vec![event_type::GC | subtype::GC_EVENT];
        write_uleb128(&mut payload, 5);
        write_uleb128(&mut payload, GcEvent::End.raw().into());
        write_uleb128(&mut payload, 2);
        payload.push(event_type::MONITOR | (MonitorEvent::Done.raw() << 4));
        write_uleb128(&mut payload, 1);
        write_sleb128(&mut payload, 3);
        payload.push(event_type::HEAP | subtype::HEAP_OBJECT);
        write_sleb128(&mut payload, 1);
        write_sleb128(&mut payload, 0);
        write_uleb128(&mut payload, 16);
        write_uleb128(&mut payload, 0);

        let header = BufferHeader {
            time_base: 100,
            obj_base: 0x100,
            ptr_base: 0x4000,
            ..Default::default()
        };
        let mut decoder = EventDecoder::new(12, &header);
        let records = decoder.decode_all(&payload).unwrap();
        assert_eq!(
            records[0].event,
            Decoded::Current(Event::GcEvent {
                event: GcEvent::End.raw(),
                generation: 2
            })
        );
        assert_eq!(records[0].time, 105);
        assert_eq!(
            records[1].event,
            Decoded::Current(Event::Monitor {
                event: MonitorEvent::Done.raw(),
                obj: 0x103 << 3,
                backtrace: None,
            })
        );
        assert_eq!(
            records[2].event,
            Decoded::Current(Event::HeapObject {
                obj: 0x101 << 3,
                vtable: 0x4000,
                size: 16,
                generation: 0,
                refs: vec![],
            })
        );
        assert_eq!(records[2].time, 106);
    }

    #[test]
    fn legacy_roots_version_14() {
        let mut payload = vec![event_type::HEAP | subtype::HEAP_ROOT];
        write_uleb128(&mut payload, 2);
        write_uleb128(&mut payload, 1);
        write_uleb128(&mut payload, 4);
        write_sleb128(&mut payload, 2);
        write_uleb128(&mut payload, crate::wire::legacy_root::PINNING | 1);
        write_uleb128(&mut payload, 0);
        let header = BufferHeader::default();
        let mut decoder = EventDecoder::new(14, &header);
        let records = decoder.decode_all(&payload).unwrap();
        assert_eq!(
            records[0].event,
            Decoded::Legacy(LegacyEvent::HeapRoots {
                gc_count: 4,
                roots: vec![LegacyRoot {
                    obj: 16,
                    root_type: crate::wire::legacy_root::PINNING | 1,
                    extra: 0,
                }],
            })
        );
    }
}
