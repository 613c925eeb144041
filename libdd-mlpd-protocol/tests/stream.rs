// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libdd_mlpd_protocol::wire::{CodeBufferType, LOG_DATA_VERSION};
use libdd_mlpd_protocol::{
    read_buffer, BufferHeader, CounterDesc, CounterSample, CounterValue, Decoded, Event,
    EventDecoder, EventEncoder, FileHeader, HeapRef,
};
use proptest::prelude::*;

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.:() ]{0,24}"
}

fn obj() -> impl Strategy<Value = u64> {
    any::<u64>().prop_map(|o| o & !7)
}

fn backtrace() -> impl Strategy<Value = Option<Vec<u64>>> {
    proptest::option::of(proptest::collection::vec(any::<u64>(), 0..8))
}

fn gc_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (any::<u8>(), any::<u8>())
            .prop_map(|(event, generation)| Event::GcEvent { event, generation }),
        any::<u64>().prop_map(|size| Event::GcResize { size }),
        proptest::collection::vec(obj(), 0..6).prop_map(|objects| Event::GcMove { objects }),
        (any::<u64>(), any::<u64>(), obj(), backtrace()).prop_map(
            |(handle_type, handle, obj, backtrace)| Event::GcHandleCreated {
                handle_type,
                handle,
                obj,
                backtrace
            }
        ),
        (any::<u64>(), any::<u64>(), backtrace()).prop_map(|(handle_type, handle, backtrace)| {
            Event::GcHandleDestroyed {
                handle_type,
                handle,
                backtrace,
            }
        }),
        Just(Event::GcFinalizeStart),
        obj().prop_map(|obj| Event::GcFinalizeObjectEnd { obj }),
    ]
}

fn metadata_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (any::<u64>(), any::<u64>(), name())
            .prop_map(|(klass, image, name)| Event::ClassLoad { klass, image, name }),
        (any::<u64>(), name(), name())
            .prop_map(|(image, name, guid)| Event::ImageLoad { image, name, guid }),
        (any::<u64>(), name()).prop_map(|(image, name)| Event::ImageUnload { image, name }),
        (any::<u64>(), any::<u64>(), name()).prop_map(|(assembly, image, name)| {
            Event::AssemblyLoad {
                assembly,
                image,
                name,
            }
        }),
        (any::<u64>(), any::<u64>(), any::<u64>()).prop_map(|(vtable, domain, klass)| {
            Event::VTableLoad {
                vtable,
                domain,
                klass,
            }
        }),
        (any::<u64>(), name()).prop_map(|(thread_id, name)| Event::ThreadName { thread_id, name }),
        any::<u64>().prop_map(|domain| Event::DomainUnload { domain }),
        (any::<u64>(), any::<u64>())
            .prop_map(|(context, domain)| Event::ContextLoad { context, domain }),
    ]
}

fn runtime_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (any::<u64>(), obj(), any::<u64>(), backtrace()).prop_map(
            |(vtable, obj, size, backtrace)| Event::Alloc {
                vtable,
                obj,
                size,
                backtrace
            }
        ),
        any::<u64>().prop_map(|method| Event::MethodEnter { method }),
        any::<u64>().prop_map(|method| Event::MethodExcLeave { method }),
        (any::<u64>(), any::<u64>(), any::<u64>(), name()).prop_map(
            |(method, code_start, code_size, name)| Event::MethodJit {
                method,
                code_start,
                code_size,
                name
            }
        ),
        (obj(), backtrace()).prop_map(|(obj, backtrace)| Event::ExceptionThrow { obj, backtrace }),
        (any::<u8>(), any::<u64>(), any::<u64>(), obj()).prop_map(
            |(clause_type, clause_num, method, obj)| Event::ExceptionClause {
                clause_type,
                clause_num,
                method,
                obj
            }
        ),
        (any::<u8>(), obj(), backtrace()).prop_map(|(event, obj, backtrace)| Event::Monitor {
            event,
            obj,
            backtrace
        }),
        (0u8..10, any::<u64>(), any::<u64>(), name()).prop_map(|(kind, buffer, size, name)| {
            let name = (kind == CodeBufferType::SpecificTrampoline.raw()).then_some(name);
            Event::JitHelper {
                kind,
                buffer,
                size,
                name,
            }
        }),
    ]
}

fn heap_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::HeapStart),
        (
            obj(),
            any::<u64>(),
            any::<u64>(),
            0u8..3,
            proptest::collection::vec((0u64..4096, obj()), 0..6)
        )
            .prop_map(|(obj, vtable, size, generation, mut refs)| {
                refs.sort_unstable();
                Event::HeapObject {
                    obj,
                    vtable,
                    size,
                    generation,
                    refs: refs
                        .into_iter()
                        .map(|(offset, obj)| HeapRef { offset, obj })
                        .collect(),
                }
            }),
        proptest::collection::vec((any::<u64>(), obj()), 0..6)
            .prop_map(|roots| Event::HeapRoots { roots }),
        (any::<u64>(), any::<u64>(), any::<u8>(), any::<u64>(), name()).prop_map(
            |(start, size, source, key, name)| Event::HeapRootRegister {
                start,
                size,
                source,
                key,
                name
            }
        ),
        any::<u64>().prop_map(|start| Event::HeapRootUnregister { start }),
        (
            any::<u64>(),
            proptest::collection::vec(any::<u64>(), 0..6),
            proptest::collection::vec(any::<u64>(), 0..6)
        )
            .prop_map(|(thread_id, ips, frames)| Event::SampleHit {
                thread_id,
                ips,
                frames
            }),
        (any::<u64>(), any::<u64>(), name())
            .prop_map(|(addr, size, name)| Event::SampleUsym { addr, size, name }),
        any::<u8>().prop_map(|kind| Event::SyncPoint { kind }),
    ]
}

fn counter_value() -> impl Strategy<Value = CounterValue> {
    prop_oneof![
        any::<i64>().prop_map(CounterValue::Int),
        any::<u64>().prop_map(CounterValue::ULong),
        (-1.0e9f64..1.0e9).prop_map(CounterValue::Double),
        proptest::option::of(name()).prop_map(CounterValue::String),
        any::<i64>().prop_map(CounterValue::TimeInterval),
    ]
}

fn counter_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        proptest::collection::vec(
            (1u64..64, counter_value()).prop_map(|(index, value)| CounterSample { index, value }),
            0..5
        )
        .prop_map(|samples| Event::Counters { samples }),
        proptest::collection::vec(
            (1u64..64, name(), any::<bool>()).prop_map(|(index, name, perf)| CounterDesc {
                section: if perf { 1 << 15 } else { 1 << 9 },
                section_name: perf.then(|| "Processor".to_owned()),
                name,
                kind: 3,
                unit: 1 << 24,
                variance: 1 << 28,
                index,
            }),
            0..4
        )
        .prop_map(|counters| Event::CountersDesc { counters }),
    ]
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        gc_event(),
        metadata_event(),
        runtime_event(),
        heap_event(),
        counter_event()
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: if cfg!(miri) { 8 } else { 256 },
        ..ProptestConfig::default()
    })]

    #[test]
    fn proptest_encoded_size_within_budget_and_decodes_back(
        events in proptest::collection::vec((any::<u32>(), event()), 1..24)
    ) {
        let mut encoder = EventEncoder::new(1 << 40);
        let mut payload = Vec::new();
        let mut time = 1u64 << 40;
        for (delta, event) in &events {
            time += u64::from(*delta);
            let before = payload.len();
            encoder.encode(time, event, &mut payload);
            prop_assert!(payload.len() - before <= event.max_encoded_len());
        }

        let header = BufferHeader {
            len: payload.len() as u32,
            time_base: encoder.time_base(),
            ptr_base: encoder.ptr_base(),
            obj_base: encoder.obj_base(),
            thread_id: 1,
            method_base: encoder.method_base(),
        };
        let records = EventDecoder::new(LOG_DATA_VERSION, &header)
            .decode_all(&payload)
            .unwrap();
        prop_assert_eq!(records.len(), events.len());
        for ((_, expected), record) in events.iter().zip(records) {
            prop_assert_eq!(record.event, Decoded::Current(expected.clone()));
        }
    }
}

#[test]
fn whole_stream() {
    let mut stream = Vec::new();
    FileHeader::current(1_000, 5_000, 12, 77)
        .write_to(&mut stream)
        .unwrap();

    for (thread_id, method) in [(1u64, 0x5000u64), (2, 0x6000)] {
        let mut encoder = EventEncoder::new(5_000);
        let mut payload = Vec::new();
        encoder.encode(5_010, &Event::ThreadStart { thread_id }, &mut payload);
        encoder.encode(5_020, &Event::MethodEnter { method }, &mut payload);
        encoder.encode(5_050, &Event::MethodLeave { method }, &mut payload);
        BufferHeader {
            len: payload.len() as u32,
            time_base: encoder.time_base(),
            ptr_base: encoder.ptr_base(),
            obj_base: encoder.obj_base(),
            thread_id,
            method_base: encoder.method_base(),
        }
        .write_to(&mut stream)
        .unwrap();
        stream.extend_from_slice(&payload);
    }

    let mut r = &stream[..];
    let header = FileHeader::read_from(&mut r).unwrap();
    assert_eq!(header.pid, 77);
    assert_eq!(header.startup_ns, 5_000);

    let mut leaves = Vec::new();
    while let Some((buffer, payload)) = read_buffer(&mut r).unwrap() {
        let records = EventDecoder::new(header.data_version, &buffer)
            .decode_all(&payload)
            .unwrap();
        assert_eq!(records.len(), 3);
        if let Decoded::Current(Event::MethodLeave { method }) = &records[2].event {
            leaves.push((buffer.thread_id, *method, records[2].time));
        }
    }
    assert_eq!(leaves, [(1, 0x5000, 5_050), (2, 0x6000, 5_050)]);
}
