// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime counters: descriptions, and the values sampled over time grouped by section and
//! by timestamp.

use indexmap::IndexMap;
use libdd_mlpd_protocol::wire::counter;
use libdd_mlpd_protocol::{CounterDesc, CounterSample, CounterValue};
use std::fmt::Write;

/// Absolute value of a counter at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub enum Reading {
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Double(f64),
    String(Option<String>),
}

impl Reading {
    /// Applies a sample on top of the previous reading. Integer samples are differences,
    /// the other kinds replace the value.
    fn apply(previous: Option<&Reading>, value: &CounterValue) -> Reading {
        match value {
            CounterValue::Int(delta) => {
                let base = match previous {
                    Some(Reading::Int(v)) => *v,
                    _ => 0,
                };
                Reading::Int(base.wrapping_add(*delta as i32))
            }
            CounterValue::UInt(delta) => {
                let base = match previous {
                    Some(Reading::UInt(v)) => *v,
                    _ => 0,
                };
                Reading::UInt(base.wrapping_add(*delta as u32))
            }
            CounterValue::Word(delta)
            | CounterValue::Long(delta)
            | CounterValue::TimeInterval(delta) => {
                let base = match previous {
                    Some(Reading::Long(v)) => *v,
                    _ => 0,
                };
                Reading::Long(base.wrapping_add(*delta))
            }
            CounterValue::ULong(delta) => {
                let base = match previous {
                    Some(Reading::ULong(v)) => *v,
                    _ => 0,
                };
                Reading::ULong(base.wrapping_add(*delta))
            }
            CounterValue::Double(v) => Reading::Double(*v),
            CounterValue::String(s) => Reading::String(s.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Counter {
    pub index: u64,
    pub section: String,
    pub name: String,
    pub kind: u64,
    pub unit: u64,
    pub variance: u64,
    /// (milliseconds since startup, reading)
    pub values: Vec<(u64, Reading)>,
}

impl Counter {
    pub fn last(&self) -> Option<&Reading> {
        self.values.last().map(|(_, reading)| reading)
    }

    /// Formats a reading according to the declared kind and unit of the counter.
    pub fn format(&self, reading: &Reading) -> String {
        match reading {
            Reading::String(None) => "<null>".to_owned(),
            Reading::String(Some(s)) => s.clone(),
            Reading::Int(v) => v.to_string(),
            Reading::UInt(v) => v.to_string(),
            Reading::ULong(v) => v.to_string(),
            Reading::Double(v) => format!("{v:.6}"),
            Reading::Long(v) => {
                if self.kind == counter::LONG && self.unit == counter::TIME {
                    format!("{:.3}ms", *v as f64 / 10000.0)
                } else if self.kind == counter::TIME_INTERVAL {
                    format!("{:.3}ms", *v as f64 / 1000.0)
                } else {
                    v.to_string()
                }
            }
        }
    }
}

/// Formats milliseconds as `days:hours:minutes:seconds.millis`.
pub fn format_timestamp(ms: u64) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "{}:{:02}:{:02}:{:02}.{:03}",
        ms / 1000 / 60 / 60 / 24 % 1000,
        ms / 1000 / 60 / 60 % 24,
        ms / 1000 / 60 % 60,
        ms / 1000 % 60,
        ms % 1000
    );
    out
}

/// Counter names shown when the report is not verbose.
pub const SUMMARY_COUNTERS: [&str; 14] = [
    "Methods from AOT",
    "Methods JITted using mono JIT",
    "Methods JITted using LLVM",
    "Total time spent JITting (sec)",
    "User Time",
    "System Time",
    "Total Time",
    "Working Set",
    "Private Bytes",
    "Virtual Bytes",
    "Page Faults",
    "CPU Load Average - 1min",
    "CPU Load Average - 5min",
    "CPU Load Average - 15min",
];

#[derive(Debug, Default)]
pub struct Counters {
    pub counters: IndexMap<u64, Counter>,
    /// Section name -> counter indices, in description order.
    pub sections: IndexMap<String, Vec<u64>>,
    /// Timestamp -> section name -> indices of the counters sampled then.
    pub timestamps: IndexMap<u64, IndexMap<String, Vec<u64>>>,
}

impl Counters {
    /// Records a counter description. Later descriptions of a known index are ignored.
    pub fn describe(&mut self, desc: &CounterDesc) {
        if self.counters.contains_key(&desc.index) {
            return;
        }
        let section = if desc.section == counter::PERFCOUNTERS {
            desc.section_name.clone().unwrap_or_default()
        } else {
            counter::section_name(desc.section).to_owned()
        };
        self.sections
            .entry(section.clone())
            .or_default()
            .push(desc.index);
        self.counters.insert(
            desc.index,
            Counter {
                index: desc.index,
                section,
                name: desc.name.clone(),
                kind: desc.kind,
                unit: desc.unit,
                variance: desc.variance,
                values: Vec::new(),
            },
        );
    }

    /// Records a sample taken `timestamp` milliseconds after startup. Samples of unknown
    /// counters are dropped.
    pub fn sample(&mut self, timestamp: u64, sample: &CounterSample) {
        let Some(counter) = self.counters.get_mut(&sample.index) else {
            return;
        };
        let reading = Reading::apply(counter.last(), &sample.value);
        counter.values.push((timestamp, reading));
        let indices = self
            .timestamps
            .entry(timestamp)
            .or_default()
            .entry(counter.section.clone())
            .or_default();
        if !indices.contains(&sample.index) {
            indices.push(sample.index);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(index: u64, section: u64, name: &str, kind: u64, unit: u64) -> CounterDesc {
        CounterDesc {
            section,
            section_name: None,
            name: name.to_owned(),
            kind,
            unit,
            variance: counter::MONOTONIC,
            index,
        }
    }

    #[test]
    fn deltas_accumulate() {
        let mut counters = Counters::default();
        counters.describe(&desc(1, counter::JIT, "Methods JITted using mono JIT", counter::INT, counter::COUNT));
        counters.describe(&desc(1, counter::GC, "ignored", counter::INT, counter::COUNT));
        for (ts, delta) in [(1000, 5), (2000, 3), (3000, -2)] {
            counters.sample(
                ts,
                &CounterSample {
                    index: 1,
                    value: CounterValue::Int(delta),
                },
            );
        }
        counters.sample(
            4000,
            &CounterSample {
                index: 9,
                value: CounterValue::Int(1),
            },
        );
        let jit = &counters.counters[&1];
        assert_eq!(jit.section, "Mono JIT");
        assert_eq!(
            jit.values.iter().map(|(_, r)| r.clone()).collect::<Vec<_>>(),
            vec![Reading::Int(5), Reading::Int(8), Reading::Int(6)]
        );
        assert_eq!(counters.timestamps.len(), 3);
        assert_eq!(counters.sections["Mono JIT"], vec![1]);
    }

    #[test]
    fn perfcounter_sections() {
        let mut counters = Counters::default();
        counters.describe(&CounterDesc {
            section_name: Some("Processor".to_owned()),
            ..desc(2, counter::PERFCOUNTERS, "% Processor Time", counter::DOUBLE, counter::PERCENTAGE)
        });
        assert_eq!(counters.counters[&2].section, "Processor");
    }

    #[test]
    fn formatting() {
        let mut time = Counter {
            index: 1,
            section: String::new(),
            name: String::new(),
            kind: counter::LONG,
            unit: counter::TIME,
            variance: counter::MONOTONIC,
            values: Vec::new(),
        };
        assert_eq!(time.format(&Reading::Long(123_456)), "12.346ms");
        time.kind = counter::TIME_INTERVAL;
        assert_eq!(time.format(&Reading::Long(1500)), "1.500ms");
        time.kind = counter::LONG;
        time.unit = counter::BYTES;
        assert_eq!(time.format(&Reading::Long(-4)), "-4");
        assert_eq!(time.format(&Reading::Double(0.5)), "0.500000");
        assert_eq!(time.format(&Reading::String(None)), "<null>");

        assert_eq!(format_timestamp(0), "0:00:00:00.000");
        assert_eq!(format_timestamp(90_061_001), "1:01:01:01.001");
    }
}
