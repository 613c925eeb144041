// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hashbrown::HashMap;
use libdd_mlpd_protocol::wire::counter;
use libdd_mlpd_protocol::{CounterDesc, CounterSample, CounterValue};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! event_counters {
    ($($field:ident => $name:literal),* $(,)?) => {
        /// How many events of each kind were emitted, plus a few internal statistics.
        #[derive(Debug, Default)]
        pub struct EventCounters {
            $(pub(crate) $field: AtomicU64,)*
        }

        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
        pub struct EventCountersSnapshot {
            $(pub $field: u64,)*
        }

        impl EventCounters {
            pub fn snapshot(&self) -> EventCountersSnapshot {
                EventCountersSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }

            /// The counters as runtime counters of the profiler section.
            pub(crate) fn as_runtime_counters(&self) -> Vec<RuntimeCounter> {
                vec![$(RuntimeCounter::profiler(
                    $name,
                    self.$field.load(Ordering::Relaxed),
                ),)*]
            }
        }
    };
}

event_counters! {
    sample_allocations => "Sample events allocated",
    buffer_allocations => "Log buffers allocated",
    sync_points => "Event: Sync points",
    aot_ids => "Event: AOT IDs",
    heap_objects => "Event: Heap objects",
    heap_starts => "Event: Heap starts",
    heap_ends => "Event: Heap ends",
    heap_roots => "Event: Heap roots",
    heap_root_registers => "Event: Heap root registers",
    heap_root_unregisters => "Event: Heap root unregisters",
    gc_events => "Event: GC events",
    gc_resizes => "Event: GC resizes",
    gc_allocs => "Event: GC allocations",
    gc_moves => "Event: GC moves",
    gc_handle_creations => "Event: GC handle creations",
    gc_handle_deletions => "Event: GC handle deletions",
    finalize_begins => "Event: GC finalize begins",
    finalize_ends => "Event: GC finalize ends",
    finalize_object_begins => "Event: GC finalize object begins",
    finalize_object_ends => "Event: GC finalize object ends",
    image_loads => "Event: Image loads",
    image_unloads => "Event: Image unloads",
    assembly_loads => "Event: Assembly loads",
    assembly_unloads => "Event: Assembly unloads",
    class_loads => "Event: Class loads",
    vtable_loads => "Event: VTable loads",
    method_entries => "Event: Method entries",
    method_exits => "Event: Method exits",
    method_exception_exits => "Event: Method exception leaves",
    method_jits => "Event: Method JITs",
    code_buffers => "Event: Code buffers",
    exception_throws => "Event: Exception throws",
    exception_clauses => "Event: Exception clauses",
    monitor_events => "Event: Monitor events",
    thread_starts => "Event: Thread starts",
    thread_ends => "Event: Thread ends",
    thread_names => "Event: Thread names",
    domain_loads => "Event: Domain loads",
    domain_unloads => "Event: Domain unloads",
    domain_names => "Event: Domain names",
    context_loads => "Event: Context loads",
    context_unloads => "Event: Context unloads",
    sample_usyms => "Event: Sample symbols",
    sample_hits => "Event: Sample hits",
    counter_descs => "Event: Counter descriptions",
    counter_samples => "Event: Counter samples",
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Current value of a runtime counter, as handed to [`crate::Profiler::sample_counters`].
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeCounter {
    pub section: u64,
    /// Category of performance counters, see [`counter::PERFCOUNTERS`].
    pub section_name: Option<String>,
    pub name: String,
    pub unit: u64,
    pub variance: u64,
    /// Absolute value. The stream carries integer kinds as differences to the last sample.
    pub value: CounterValue,
}

impl RuntimeCounter {
    fn profiler(name: &str, value: u64) -> Self {
        Self {
            section: counter::PROFILER,
            section_name: None,
            name: name.to_owned(),
            unit: counter::COUNT,
            variance: counter::MONOTONIC,
            value: CounterValue::ULong(value),
        }
    }
}

#[derive(Debug)]
struct Agent {
    index: u64,
    last: Option<CounterValue>,
}

/// Assigns indexes to counters and turns absolute values into the delta samples of the
/// stream. Unchanged counters are left out of a sample.
#[derive(Debug, Default)]
pub(crate) struct CounterTracker {
    agents: HashMap<(u64, Option<String>, String), Agent>,
}

impl CounterTracker {
    /// Returns the descriptions of counters not seen before and the samples of the counters
    /// that changed.
    pub fn update(&mut self, counters: &[RuntimeCounter]) -> (Vec<CounterDesc>, Vec<CounterSample>) {
        let mut descs = Vec::new();
        let mut samples = Vec::new();
        for c in counters {
            let key = (c.section, c.section_name.clone(), c.name.clone());
            let next_index = self.agents.len() as u64 + 1;
            let agent = self.agents.entry(key).or_insert_with(|| {
                descs.push(CounterDesc {
                    section: c.section,
                    section_name: c.section_name.clone(),
                    name: c.name.clone(),
                    kind: c.value.kind(),
                    unit: c.unit,
                    variance: c.variance,
                    index: next_index,
                });
                Agent {
                    index: next_index,
                    last: None,
                }
            });
            if agent.last.as_ref() == Some(&c.value) {
                continue;
            }
            if let Some(value) = delta(agent.last.as_ref(), &c.value) {
                samples.push(CounterSample {
                    index: agent.index,
                    value,
                });
                agent.last = Some(c.value.clone());
            }
        }
        (descs, samples)
    }
}

/// Difference to the previous value. `None` when the kind changed, which the stream cannot
/// express.
fn delta(last: Option<&CounterValue>, value: &CounterValue) -> Option<CounterValue> {
    use CounterValue as V;
    Some(match (last, value) {
        (None, v) => v.clone(),
        (Some(V::Int(a)), V::Int(b)) => V::Int(b.wrapping_sub(*a)),
        (Some(V::UInt(a)), V::UInt(b)) => V::UInt(b.wrapping_sub(*a)),
        (Some(V::Word(a)), V::Word(b)) => V::Word(b.wrapping_sub(*a)),
        (Some(V::Long(a)), V::Long(b)) => V::Long(b.wrapping_sub(*a)),
        (Some(V::ULong(a)), V::ULong(b)) => V::ULong(b.wrapping_sub(*a)),
        (Some(V::TimeInterval(a)), V::TimeInterval(b)) => V::TimeInterval(b.wrapping_sub(*a)),
        (Some(V::Double(_)), V::Double(b)) => V::Double(*b),
        (Some(V::String(_)), V::String(b)) => V::String(b.clone()),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gc_counter(value: CounterValue) -> RuntimeCounter {
        RuntimeCounter {
            section: counter::GC,
            section_name: None,
            name: "Major GC time".into(),
            unit: counter::TIME,
            variance: counter::MONOTONIC,
            value,
        }
    }

    #[test]
    fn describes_once_and_samples_deltas() {
        let mut tracker = CounterTracker::default();
        let (descs, samples) = tracker.update(&[gc_counter(CounterValue::Long(100))]);
        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].index, 1);
        assert_eq!(descs[0].kind, counter::LONG);
        assert_eq!(samples[0].value, CounterValue::Long(100));

        let (descs, samples) = tracker.update(&[gc_counter(CounterValue::Long(130))]);
        assert!(descs.is_empty());
        assert_eq!(samples[0].value, CounterValue::Long(30));

        let (_, samples) = tracker.update(&[gc_counter(CounterValue::Long(130))]);
        assert!(samples.is_empty());
    }

    #[test]
    fn doubles_and_strings_are_absolute() {
        let mut tracker = CounterTracker::default();
        let mut load = gc_counter(CounterValue::Double(0.5));
        load.name = "Load".into();
        tracker.update(&[load.clone()]);
        load.value = CounterValue::Double(0.75);
        let (_, samples) = tracker.update(&[load]);
        assert_eq!(samples[0].value, CounterValue::Double(0.75));
    }

    #[test]
    fn profiler_section_counters() {
        let counters = EventCounters::default();
        bump(&counters.gc_allocs);
        bump(&counters.gc_allocs);
        assert_eq!(counters.snapshot().gc_allocs, 2);
        let described = counters.as_runtime_counters();
        assert!(described
            .iter()
            .any(|c| c.name == "Event: GC allocations" && c.value == CounterValue::ULong(2)));
        assert!(described.iter().all(|c| c.section == counter::PROFILER));
    }
}
