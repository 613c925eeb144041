// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Text reports.

use crate::analyzer::Report;
use crate::counters::{format_timestamp, Counter, Reading, SUMMARY_COUNTERS};
use crate::heap::HeapShot;
use crate::options::{AllocSort, CountersSort, MethodSort, ReportKind};
use crate::tables::{Ptr, Traces};
use chrono::{Local, TimeZone};
use libdd_mlpd_protocol::wire::{
    counter, event_type, sample_type, subtype, ClauseType, HandleType, BUFFER_HEADER_SIZE,
    CLAUSE_SLOTS,
};
use std::io::{self, Write};

/// Classes listed per heap shot unless verbose.
const HEAP_SHOT_CLASSES: usize = 30;

const COVERAGE_NOTICE: &str = "The log profiler no longer supports code coverage. Please use the dedicated coverage profiler instead. See mono-profilers(1) for more information.";

/// Event types and subtypes listed by the `stats` report, with their display names.
const STAT_EVENTS: &[(&str, u8, &[(&str, u8)])] = &[
    (
        "TYPE_ALLOC",
        event_type::ALLOC,
        &[
            ("TYPE_ALLOC_NO_BT", 0),
            ("TYPE_ALLOC_BT", subtype::ALLOC_BT),
        ],
    ),
    (
        "TYPE_GC",
        event_type::GC,
        &[
            ("TYPE_GC_EVENT", subtype::GC_EVENT),
            ("TYPE_GC_RESIZE", subtype::GC_RESIZE),
            ("TYPE_GC_MOVE", subtype::GC_MOVE),
            ("TYPE_GC_HANDLE_CREATED", subtype::GC_HANDLE_CREATED),
            ("TYPE_GC_HANDLE_DESTROYED", subtype::GC_HANDLE_DESTROYED),
            ("TYPE_GC_HANDLE_CREATED_BT", subtype::GC_HANDLE_CREATED_BT),
            ("TYPE_GC_HANDLE_DESTROYED_BT", subtype::GC_HANDLE_DESTROYED_BT),
            ("TYPE_GC_FINALIZE_START", subtype::GC_FINALIZE_START),
            ("TYPE_GC_FINALIZE_END", subtype::GC_FINALIZE_END),
            ("TYPE_GC_FINALIZE_OBJECT_START", subtype::GC_FINALIZE_OBJECT_START),
            ("TYPE_GC_FINALIZE_OBJECT_END", subtype::GC_FINALIZE_OBJECT_END),
        ],
    ),
    (
        "TYPE_METADATA",
        event_type::METADATA,
        &[
            ("TYPE_END_LOAD", subtype::END_LOAD),
            ("TYPE_END_UNLOAD", subtype::END_UNLOAD),
        ],
    ),
    (
        "TYPE_METHOD",
        event_type::METHOD,
        &[
            ("TYPE_LEAVE", subtype::LEAVE),
            ("TYPE_ENTER", subtype::ENTER),
            ("TYPE_EXC_LEAVE", subtype::EXC_LEAVE),
            ("TYPE_JIT", subtype::JIT),
        ],
    ),
    (
        "TYPE_EXCEPTION",
        event_type::EXCEPTION,
        &[
            ("TYPE_THROW_NO_BT", 0),
            ("TYPE_THROW_BT", subtype::THROW_BT),
            ("TYPE_CLAUSE", subtype::CLAUSE),
        ],
    ),
    (
        "TYPE_MONITOR",
        event_type::MONITOR,
        &[
            ("TYPE_MONITOR_NO_BT", 0),
            ("TYPE_MONITOR_BT", subtype::MONITOR_BT),
        ],
    ),
    (
        "TYPE_HEAP",
        event_type::HEAP,
        &[
            ("TYPE_HEAP_START", subtype::HEAP_START),
            ("TYPE_HEAP_END", subtype::HEAP_END),
            ("TYPE_HEAP_OBJECT", subtype::HEAP_OBJECT),
            ("TYPE_HEAP_ROOT", subtype::HEAP_ROOT),
        ],
    ),
    (
        "TYPE_SAMPLE",
        event_type::SAMPLE,
        &[
            ("TYPE_SAMPLE_HIT", subtype::SAMPLE_HIT),
            ("TYPE_SAMPLE_USYM", subtype::SAMPLE_USYM),
            ("TYPE_SAMPLE_UBIN", subtype::SAMPLE_UBIN),
            ("TYPE_SAMPLE_COUNTERS_DESC", subtype::SAMPLE_COUNTERS_DESC),
            ("TYPE_SAMPLE_COUNTERS", subtype::SAMPLE_COUNTERS),
        ],
    ),
    (
        "TYPE_RUNTIME",
        event_type::RUNTIME,
        &[("TYPE_JITHELPER", subtype::JITHELPER)],
    ),
    (
        "TYPE_COVERAGE",
        event_type::COVERAGE,
        &[
            ("TYPE_COVERAGE_ASSEMBLY", subtype::COVERAGE_ASSEMBLY),
            ("TYPE_COVERAGE_METHOD", subtype::COVERAGE_METHOD),
            ("TYPE_COVERAGE_STATEMENT", subtype::COVERAGE_STATEMENT),
            ("TYPE_COVERAGE_CLASS", subtype::COVERAGE_CLASS),
        ],
    ),
    (
        "TYPE_META",
        event_type::META,
        &[
            ("TYPE_SYNC_POINT", subtype::SYNC_POINT),
            ("TYPE_AOT_ID", subtype::AOT_ID),
        ],
    ),
];

fn ms(ns: u64) -> u64 {
    ns / 1_000_000
}

impl<W: Write> Report<W> {
    /// Prints the selected reports, in the order they were selected.
    pub fn print_reports(&mut self) -> io::Result<()> {
        let reports = self.options.reports.clone();
        for report in reports {
            match report {
                ReportKind::Header => self.print_header()?,
                ReportKind::Thread => self.print_threads()?,
                ReportKind::Domain => self.print_domains()?,
                ReportKind::Context => self.print_contexts()?,
                ReportKind::Gc => self.print_gc()?,
                ReportKind::Jit => self.print_jit()?,
                ReportKind::Alloc => self.print_allocations()?,
                ReportKind::Call => self.print_methods()?,
                ReportKind::Metadata => self.print_metadata()?,
                ReportKind::Exception => self.print_exceptions()?,
                ReportKind::Monitor => self.print_monitors()?,
                ReportKind::Heapshot => self.print_heap_shots()?,
                ReportKind::Sample => self.print_samples()?,
                ReportKind::Counters => self.print_counters()?,
                ReportKind::Coverage => writeln!(self.out, "{COVERAGE_NOTICE}")?,
                ReportKind::Stats => self.print_stats()?,
            }
        }
        self.out.flush()
    }

    /// Backtraces of `traces` by decreasing value, outermost frame first. Only shown when
    /// backtraces are collected.
    fn print_traces(&mut self, traces: &Traces, desc: &str) -> io::Result<()> {
        if !self.options.traces {
            return Ok(());
        }
        for (bt, count) in traces.sorted() {
            let frames = self.tables.backtraces.get(bt);
            if frames.is_empty() {
                continue;
            }
            writeln!(self.out, "\t{count} {desc} from:")?;
            for &method in frames {
                writeln!(self.out, "\t\t{}", self.tables.method_name(method))?;
            }
        }
        Ok(())
    }

    fn print_header(&mut self) -> io::Result<()> {
        let header = &self.header;
        writeln!(self.out, "\nMono log profiler data")?;
        writeln!(
            self.out,
            "\tProfiler version: {}.{}",
            header.major, header.minor
        )?;
        writeln!(self.out, "\tData version: {}", header.data_version)?;
        if header.major >= 1 {
            writeln!(self.out, "\tArguments: {}", header.args)?;
            writeln!(self.out, "\tArchitecture: {}", header.arch)?;
            writeln!(self.out, "\tOperating system: {}", header.os)?;
        }
        writeln!(
            self.out,
            "\tMean timer overhead: {} nanoseconds",
            header.timer_overhead
        )?;
        let startup = i64::try_from(header.startup_ms / 1000)
            .ok()
            .and_then(|secs| Local.timestamp_opt(secs, 0).single())
            .map(|time| time.format("%a %b %e %H:%M:%S %Y").to_string())
            .unwrap_or_default();
        writeln!(self.out, "\tProgram startup: {startup}")?;
        if header.pid != 0 {
            writeln!(self.out, "\tProgram ID: {}", header.pid)?;
        }
        if header.port != 0 {
            writeln!(self.out, "\tServer listening on: {}", header.port)?;
        }
        Ok(())
    }

    fn print_threads(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nThread summary")?;
        for (&thread_id, thread) in self.threads.iter().rev() {
            if thread_id == 0 {
                continue;
            }
            writeln!(
                self.out,
                "\tThread: {}, name: \"{}\"",
                Ptr(thread_id),
                thread.name.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }

    fn print_domains(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nDomain summary")?;
        for (&domain, name) in self.domains.iter().rev() {
            writeln!(
                self.out,
                "\tDomain: {}, friendly name: \"{}\"",
                Ptr(domain),
                name.as_deref().unwrap_or("(null)")
            )?;
        }
        Ok(())
    }

    fn print_contexts(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nContext summary")?;
        for (&context, &domain) in self.contexts.iter().rev() {
            writeln!(
                self.out,
                "\tContext: {}, domain: {}",
                Ptr(context),
                Ptr(domain)
            )?;
        }
        Ok(())
    }

    fn print_exceptions(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nException summary")?;
        writeln!(self.out, "\tThrows: {}", self.exceptions.throws)?;
        let traces = self.exceptions.traces.clone();
        self.print_traces(&traces, "throws")?;
        for slot in 0..CLAUSE_SLOTS {
            let count = self.exceptions.clauses[slot];
            if count == 0 {
                continue;
            }
            writeln!(
                self.out,
                "\tExecuted {} clauses: {count}",
                ClauseType::name_of(slot as u8)
            )?;
        }
        Ok(())
    }

    fn print_monitors(&mut self) -> io::Result<()> {
        if self.monitors.monitors.is_empty() {
            return Ok(());
        }
        let mut monitors: Vec<_> = self.monitors.monitors.values().cloned().collect();
        monitors.sort_by(|a, b| b.wait_time.cmp(&a.wait_time));
        writeln!(self.out, "\nMonitor lock summary")?;
        for monitor in &monitors {
            writeln!(
                self.out,
                "\tLock object {}: {} contentions",
                Ptr(monitor.obj),
                monitor.contentions
            )?;
            let wait = monitor.wait_time as f64 / 1_000_000_000.0;
            writeln!(
                self.out,
                "\t\t{:.6} secs total wait time, {:.6} max, {:.6} average",
                wait,
                monitor.max_wait_time as f64 / 1_000_000_000.0,
                wait / monitor.contentions as f64
            )?;
            self.print_traces(&monitor.traces, "contentions")?;
        }
        writeln!(self.out, "\tLock contentions: {}", self.monitors.contentions)?;
        writeln!(self.out, "\tLock acquired: {}", self.monitors.acquired)?;
        writeln!(self.out, "\tLock failures: {}", self.monitors.failed)?;
        Ok(())
    }

    fn print_gc(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nGC summary")?;
        writeln!(self.out, "\tGC resizes: {}", self.gc.resizes)?;
        writeln!(self.out, "\tMax heap size: {}", self.gc.max_heap_size)?;
        writeln!(self.out, "\tObject moves: {}", self.gc.object_moves)?;
        for (gen, info) in self.gc.generations.iter().enumerate() {
            if info.count == 0 {
                continue;
            }
            writeln!(
                self.out,
                "\tGen{gen} collections: {}, max time: {}us, total time: {}us, average: {}us",
                info.count,
                info.max_time / 1000,
                info.total_time / 1000,
                info.total_time / info.count / 1000
            )?;
        }
        let handles = self.gc.handles.clone();
        for (kind, info) in handles.iter().enumerate() {
            if info.max_live == 0 {
                continue;
            }
            writeln!(
                self.out,
                "\tGC handles {}: created: {}, destroyed: {}, max: {}",
                HandleType::name_of(kind as u8),
                info.created,
                info.destroyed,
                info.max_live
            )?;
            self.print_traces(&info.traces, "created")?;
            self.print_traces(&info.destroy_traces, "destroyed")?;
        }
        Ok(())
    }

    fn print_jit(&mut self) -> io::Result<()> {
        let compiled = self
            .tables
            .methods
            .values()
            .filter(|m| m.code != 0 && !m.ignore_jit);
        let (count, code_size) = compiled.fold((0u64, 0u64), |(n, size), m| {
            (n + 1, size.wrapping_add(m.len))
        });
        writeln!(self.out, "\nJIT summary")?;
        writeln!(self.out, "\tCompiled methods: {count}")?;
        writeln!(self.out, "\tGenerated code size: {code_size}")?;
        writeln!(self.out, "\tJIT helpers: {}", self.jit_helpers)?;
        writeln!(
            self.out,
            "\tJIT helpers code size: {}",
            self.jit_helpers_code_size
        )?;
        Ok(())
    }

    fn print_allocations(&mut self) -> io::Result<()> {
        let mut classes: Vec<_> = self
            .tables
            .classes
            .values()
            .filter(|c| c.allocs != 0)
            .cloned()
            .collect();
        match self.options.alloc_sort {
            AllocSort::Bytes => classes.sort_by(|a, b| b.alloc_size.cmp(&a.alloc_size)),
            AllocSort::Count => classes.sort_by(|a, b| b.allocs.cmp(&a.allocs)),
        }
        let (mut size, mut allocs) = (0u64, 0u64);
        for (i, class) in classes.iter().enumerate() {
            size = size.wrapping_add(class.alloc_size);
            allocs += class.allocs;
            if i == 0 {
                writeln!(self.out, "\nAllocation summary")?;
                writeln!(
                    self.out,
                    "{:>10} {:>10} {:>8} Type name",
                    "Bytes", "Count", "Average"
                )?;
            }
            writeln!(
                self.out,
                "{:>10} {:>10} {:>8} {}",
                class.alloc_size,
                class.allocs,
                class.alloc_size / class.allocs,
                class.name
            )?;
            self.print_traces(&class.traces, "bytes")?;
        }
        if allocs != 0 {
            writeln!(
                self.out,
                "Total memory allocated: {size} bytes in {allocs} objects"
            )?;
        }
        Ok(())
    }

    fn print_methods(&mut self) -> io::Result<()> {
        let mut methods: Vec<_> = self
            .tables
            .methods
            .values()
            .filter(|m| m.calls != 0)
            .cloned()
            .collect();
        match self.options.method_sort {
            MethodSort::Total => methods.sort_by(|a, b| b.total_time().cmp(&a.total_time())),
            MethodSort::SelfTime => methods.sort_by(|a, b| b.self_time.cmp(&a.self_time)),
            MethodSort::Calls => methods.sort_by(|a, b| b.calls.cmp(&a.calls)),
        }
        let mut calls = 0u64;
        let mut header_done = false;
        for method in &methods {
            calls += method.calls;
            let total = ms(method.total_time());
            if total == 0 && self.options.verbose == 0 {
                continue;
            }
            if !header_done {
                header_done = true;
                writeln!(self.out, "\nMethod call summary")?;
                writeln!(
                    self.out,
                    "{:>8} {:>8} {:>10} Method name",
                    "Total(ms)", "Self(ms)", "Calls"
                )?;
            }
            writeln!(
                self.out,
                "{:>8} {:>8} {:>10} {}",
                total,
                ms(method.self_time),
                method.calls,
                method.name
            )?;
            self.print_traces(&method.traces, "calls")?;
        }
        if calls != 0 {
            writeln!(self.out, "Total calls: {calls}")?;
        }
        Ok(())
    }

    fn print_metadata(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nMetadata summary")?;
        writeln!(self.out, "\tLoaded images: {}", self.tables.images.len())?;
        if self.options.verbose > 0 {
            for (_, name) in &self.tables.images {
                writeln!(self.out, "\t\t{name}")?;
            }
        }
        writeln!(
            self.out,
            "\tLoaded assemblies: {}",
            self.tables.assemblies.len()
        )?;
        if self.options.verbose > 0 {
            for (_, name) in &self.tables.assemblies {
                writeln!(self.out, "\t\t{name}")?;
            }
        }
        Ok(())
    }

    fn print_heap_shots(&mut self) -> io::Result<()> {
        if self.heap_shots.is_empty() {
            return Ok(());
        }
        let mut shots = std::mem::take(&mut self.heap_shots);
        shots.sort_by_key(|shot| shot.timestamp);
        writeln!(self.out, "\nHeap shot summary")?;
        let mut previous: Option<&HeapShot> = None;
        let mut result = Ok(());
        for (n, shot) in shots.iter().enumerate() {
            result = self.print_heap_shot(n, shot, previous);
            if result.is_err() {
                break;
            }
            previous = Some(shot);
        }
        self.heap_shots = shots;
        result
    }

    fn print_heap_shot(
        &mut self,
        n: usize,
        shot: &HeapShot,
        previous: Option<&HeapShot>,
    ) -> io::Result<()> {
        let mut classes: Vec<_> = shot.classes.values().collect();
        match self.options.alloc_sort {
            AllocSort::Bytes => classes.sort_by(|a, b| b.total_size.cmp(&a.total_size)),
            AllocSort::Count => classes.sort_by(|a, b| b.count.cmp(&a.count)),
        }
        let secs = shot
            .timestamp
            .wrapping_sub(self.startup_time.unwrap_or(0)) as f64
            / 1_000_000_000.0;
        writeln!(
            self.out,
            "\n\tHeap shot {n} at {secs:.3} secs: size: {}, object count: {}, class count: {}, roots: {}",
            shot.total_size(),
            shot.object_count(),
            classes.len(),
            shot.roots.len()
        )?;
        if self.options.verbose == 0 {
            classes.truncate(HEAP_SHOT_CLASSES);
        }
        writeln!(
            self.out,
            "\t{:>10} {:>10} {:>8} Class name",
            "Bytes", "Count", "Average"
        )?;
        for class in classes {
            let name = self.tables.class(class.klass).name.clone();
            write!(
                self.out,
                "\t{:>10} {:>10} {:>8} {name}",
                class.total_size,
                class.count,
                class.total_size / class.count.max(1)
            )?;
            match previous.and_then(|prev| prev.classes.get(&class.klass)) {
                Some(old) => writeln!(
                    self.out,
                    " (bytes: {:+}, count: {:+})",
                    class.total_size as i64 - old.total_size as i64,
                    class.count as i64 - old.count as i64
                )?,
                None => writeln!(self.out)?,
            }
            if !self.options.traces {
                continue;
            }
            if class.root_references != 0 {
                writeln!(
                    self.out,
                    "\t\t{} root references ({} pinning)",
                    class.root_references, class.pinned_references
                )?;
            }
            let mut rev_refs: Vec<_> = class.rev_refs.iter().map(|(&k, &n)| (k, n)).collect();
            rev_refs.sort_by(|a, b| b.1.cmp(&a.1));
            for (from, count) in rev_refs {
                let from = self.tables.class(from).name.clone();
                writeln!(self.out, "\t\t{count} references from: {from}")?;
            }
        }
        Ok(())
    }

    fn print_samples(&mut self) -> io::Result<()> {
        let Some(summary) = self.samples.summarize(&self.tables) else {
            return Ok(());
        };
        let percent = |hits| summary.percent(hits);
        writeln!(self.out, "\nStatistical samples summary")?;
        writeln!(
            self.out,
            "\tSample type: {}",
            sample_type::name(summary.sample_type)
        )?;
        writeln!(
            self.out,
            "\tUnmanaged hits:  {:>6} ({:>4.1}%)",
            summary.unmanaged_hits,
            percent(summary.unmanaged_hits)
        )?;
        writeln!(
            self.out,
            "\tManaged hits:    {:>6} ({:>4.1}%)",
            summary.managed_hits(),
            percent(summary.managed_hits())
        )?;
        writeln!(
            self.out,
            "\tUnresolved hits: {:>6} ({:>4.1}%)",
            summary.unresolved_hits,
            percent(summary.unresolved_hits)
        )?;
        writeln!(self.out, "\t{:>6} {:>6} {}", "Hits", "%", "Method name")?;
        for row in &summary.rows {
            let pc = percent(row.hits);
            if self.options.verbose == 0 && pc < 0.1 {
                break;
            }
            match &row.binary {
                Some(binary) => writeln!(
                    self.out,
                    "\t{:>6} {:>6.2} {:<36} in {binary}",
                    row.hits, pc, row.name
                )?,
                None => writeln!(self.out, "\t{:>6} {:>6.2} {}", row.hits, pc, row.name)?,
            }
        }
        Ok(())
    }

    fn write_counter_value(
        &mut self,
        key: &str,
        counter: &Counter,
        reading: &Reading,
    ) -> io::Result<()> {
        writeln!(self.out, "{key} : {}", counter.format(reading))
    }

    fn print_counters(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nCounters:")?;
        let counters = std::mem::take(&mut self.counters);
        let result = if self.options.verbose == 0 {
            self.print_counter_summary(&counters)
        } else {
            match self.options.counters_sort {
                CountersSort::Time => self.print_counters_by_time(&counters),
                CountersSort::Category => self.print_counters_by_category(&counters),
            }
        };
        self.counters = counters;
        result
    }

    fn print_counter_summary(&mut self, counters: &crate::counters::Counters) -> io::Result<()> {
        for (section, indices) in &counters.sections {
            let mut section_printed = false;
            for index in indices {
                let Some(counter) = counters.counters.get(index) else {
                    continue;
                };
                let Some(last) = counter.last() else {
                    continue;
                };
                if !SUMMARY_COUNTERS.contains(&counter.name.as_str()) {
                    continue;
                }
                if !section_printed {
                    writeln!(self.out, "\t{section}:")?;
                    section_printed = true;
                }
                self.write_counter_value(&format!("\t\t{:<30}", counter.name), counter, last)?;
            }
        }
        Ok(())
    }

    fn print_counters_by_time(&mut self, counters: &crate::counters::Counters) -> io::Result<()> {
        for (&timestamp, sections) in &counters.timestamps {
            writeln!(self.out, "\t{}:", format_timestamp(timestamp))?;
            for (section, indices) in sections {
                writeln!(self.out, "\t\t{section}:")?;
                for index in indices {
                    let Some(counter) = counters.counters.get(index) else {
                        continue;
                    };
                    let key = format!("\t\t\t{:<30}", counter.name);
                    for (_, reading) in counter.values.iter().filter(|(ts, _)| *ts == timestamp) {
                        self.write_counter_value(&key, counter, reading)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn print_counters_by_category(
        &mut self,
        counters: &crate::counters::Counters,
    ) -> io::Result<()> {
        for (section, indices) in &counters.sections {
            writeln!(self.out, "\t{section}:")?;
            for index in indices {
                let Some(counter) = counters.counters.get(index) else {
                    continue;
                };
                writeln!(
                    self.out,
                    "\t\t{}: [type: {}, unit: {}, variance: {}]",
                    counter.name,
                    counter::type_name(counter.kind),
                    counter::unit_name(counter.unit),
                    counter::variance_name(counter.variance)
                )?;
                for (timestamp, reading) in &counter.values {
                    let key = format!("\t\t\t{}", format_timestamp(*timestamp));
                    self.write_counter_value(&key, counter, reading)?;
                }
            }
        }
        Ok(())
    }

    fn print_stats(&mut self) -> io::Result<()> {
        writeln!(self.out, "\nMlpd statistics")?;
        writeln!(
            self.out,
            "\tBuffer count {}\toverhead {} ({} bytes per header)",
            self.stats.buffers,
            self.stats.overhead(),
            BUFFER_HEADER_SIZE
        )?;
        writeln!(self.out, "\nEvent details:")?;
        for (event_name, event, subtypes) in STAT_EVENTS {
            for (subtype_name, subtype) in subtypes.iter() {
                let stat = self.stats.per_tag[usize::from(event | subtype)];
                if stat.count == 0 {
                    continue;
                }
                writeln!(
                    self.out,
                    "\t{:>16}\t{:>26}\tcount {:>6}\tmin {:>3}\tmax {:>6}\tbytes {}",
                    event_name, subtype_name, stat.count, stat.min, stat.max, stat.bytes
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ReportOptions;
    use libdd_mlpd_protocol::{BufferHeader, Event, EventEncoder, FileHeader};

    fn run(options: ReportOptions, events: &[(u64, Event)]) -> String {
        let mut header = FileHeader::current(0, 0, 10, 1234);
        header.args = "--profile=log".into();
        header.arch = "x86_64".into();
        header.os = "linux".into();
        let mut report = Report::new(header, options, Vec::new());
        let mut encoder = EventEncoder::new(0);
        let mut payload = Vec::new();
        for (time, event) in events {
            encoder.encode(*time, event, &mut payload);
        }
        let buffer = BufferHeader {
            len: payload.len() as u32,
            time_base: 0,
            ptr_base: encoder.ptr_base(),
            obj_base: encoder.obj_base(),
            thread_id: 0x7000,
            method_base: encoder.method_base(),
        };
        report.process_buffer(&buffer, &payload, 0).unwrap();
        report.finish().unwrap();
        report.print_reports().unwrap();
        String::from_utf8(report.into_inner()).unwrap()
    }

    fn only(reports: &[ReportKind]) -> ReportOptions {
        ReportOptions {
            reports: reports.to_vec(),
            ..Default::default()
        }
    }

    fn foo_allocs() -> Vec<(u64, Event)> {
        vec![
            (
                0,
                Event::ClassLoad {
                    klass: 0x10,
                    image: 0x1,
                    name: "Foo".into(),
                },
            ),
            (
                0,
                Event::VTableLoad {
                    vtable: 0x100,
                    domain: 0x2,
                    klass: 0x10,
                },
            ),
            (
                1,
                Event::Alloc {
                    vtable: 0x100,
                    obj: 0x5000,
                    size: 24,
                    backtrace: None,
                },
            ),
        ]
    }

    #[test]
    fn allocation_summary() {
        let out = run(only(&[ReportKind::Alloc]), &foo_allocs());
        assert_eq!(
            out,
            "\nAllocation summary\n     Bytes      Count  Average Type name\n        24          1       24 Foo\nTotal memory allocated: 24 bytes in 1 objects\n"
        );
    }

    #[test]
    fn header_summary() {
        let out = run(only(&[ReportKind::Header]), &[]);
        assert!(out.starts_with("\nMono log profiler data\n\tProfiler version: 3.0\n\tData version: 17\n"));
        assert!(out.contains("\tArguments: --profile=log\n"));
        assert!(out.contains("\tMean timer overhead: 10 nanoseconds\n"));
        assert!(out.contains("\tProgram ID: 1234\n"));
        assert!(!out.contains("Server listening"));
    }

    #[test]
    fn call_summary() {
        let out = run(
            only(&[ReportKind::Call]),
            &[
                (
                    0,
                    Event::MethodJit {
                        method: 0xa,
                        code_start: 0x1000,
                        code_size: 16,
                        name: "A()".into(),
                    },
                ),
                (0, Event::MethodEnter { method: 0xa }),
                (5_000_000, Event::MethodLeave { method: 0xa }),
            ],
        );
        assert_eq!(
            out,
            "\nMethod call summary\nTotal(ms) Self(ms)      Calls Method name\n       5        5          1 A()\nTotal calls: 1\n"
        );
    }

    #[test]
    fn fast_methods_are_hidden_unless_verbose() {
        let events = [
            (0, Event::MethodEnter { method: 0xa }),
            (10, Event::MethodLeave { method: 0xa }),
        ];
        let out = run(only(&[ReportKind::Call]), &events);
        assert_eq!(out, "Total calls: 1\n");
        let out = run(
            ReportOptions {
                verbose: 1,
                ..only(&[ReportKind::Call])
            },
            &events,
        );
        assert!(out.contains("       0        0          1 unknown method 0xa\n"));
    }

    #[test]
    fn gc_and_jit_summaries() {
        let out = run(
            only(&[ReportKind::Jit, ReportKind::Gc]),
            &[
                (
                    0,
                    Event::MethodJit {
                        method: 0xa,
                        code_start: 0x1000,
                        code_size: 16,
                        name: "A()".into(),
                    },
                ),
                (
                    1,
                    Event::JitHelper {
                        kind: 1,
                        buffer: 0x2000,
                        size: 8,
                        name: None,
                    },
                ),
                (
                    10_000,
                    Event::GcEvent {
                        event: 0,
                        generation: 0,
                    },
                ),
                (
                    30_000,
                    Event::GcEvent {
                        event: 5,
                        generation: 0,
                    },
                ),
            ],
        );
        assert_eq!(
            out,
            "\nJIT summary\n\tCompiled methods: 1\n\tGenerated code size: 16\n\tJIT helpers: 1\n\tJIT helpers code size: 8\n\
             \nGC summary\n\tGC resizes: 0\n\tMax heap size: 0\n\tObject moves: 0\n\tGen0 collections: 1, max time: 20us, total time: 20us, average: 20us\n"
        );
    }

    #[test]
    fn heap_shot_deltas() {
        let object = |obj, size| Event::HeapObject {
            obj,
            vtable: 0x100,
            size,
            generation: 0,
            refs: Vec::new(),
        };
        let mut events = foo_allocs();
        events.extend([
            (1_000_000_000, Event::HeapStart),
            (1_000_000_000, object(0x1000, 16)),
            (1_000_000_000, Event::HeapEnd),
            (2_000_000_000, Event::HeapStart),
            (2_000_000_000, object(0x1000, 16)),
            (2_000_000_000, object(0x1010, 32)),
            (2_000_000_000, Event::HeapEnd),
        ]);
        let out = run(only(&[ReportKind::Heapshot]), &events);
        assert_eq!(
            out,
            "\nHeap shot summary\n\
             \n\tHeap shot 0 at 1.000 secs: size: 16, object count: 1, class count: 1, roots: 0\n\
             \t     Bytes      Count  Average Class name\n\
             \t        16          1       16 Foo\n\
             \n\tHeap shot 1 at 2.000 secs: size: 48, object count: 2, class count: 1, roots: 0\n\
             \t     Bytes      Count  Average Class name\n\
             \t        48          2       24 Foo (bytes: +32, count: +1)\n"
        );
    }

    #[test]
    fn monitor_and_exception_summaries() {
        let out = run(
            only(&[ReportKind::Exception, ReportKind::Monitor]),
            &[
                (
                    1_000_000,
                    Event::Monitor {
                        event: 1,
                        obj: 0x40,
                        backtrace: None,
                    },
                ),
                (
                    3_000_000,
                    Event::Monitor {
                        event: 2,
                        obj: 0x40,
                        backtrace: None,
                    },
                ),
                (
                    4_000_000,
                    Event::ExceptionClause {
                        clause_type: 0,
                        clause_num: 1,
                        method: 0xa,
                        obj: 0x99,
                    },
                ),
            ],
        );
        assert_eq!(
            out,
            "\nException summary\n\tThrows: 0\n\tExecuted catch clauses: 1\n\
             \nMonitor lock summary\n\tLock object 0x40: 1 contentions\n\
             \t\t0.002000 secs total wait time, 0.002000 max, 0.002000 average\n\
             \tLock contentions: 1\n\tLock acquired: 1\n\tLock failures: 0\n"
        );
    }

    #[test]
    fn backtraces_are_shown_with_traces() {
        let out = run(
            ReportOptions {
                traces: true,
                ..only(&[ReportKind::Exception])
            },
            &[
                (
                    0,
                    Event::MethodJit {
                        method: 0xa,
                        code_start: 0x1000,
                        code_size: 16,
                        name: "Outer()".into(),
                    },
                ),
                (
                    0,
                    Event::MethodJit {
                        method: 0xb,
                        code_start: 0x2000,
                        code_size: 16,
                        name: "Inner()".into(),
                    },
                ),
                (
                    1,
                    Event::ExceptionThrow {
                        obj: 0x99,
                        backtrace: Some(vec![0xb, 0xa]),
                    },
                ),
            ],
        );
        assert_eq!(
            out,
            "\nException summary\n\tThrows: 1\n\t1 throws from:\n\t\tOuter()\n\t\tInner()\n"
        );
    }

    #[test]
    fn stats_and_coverage() {
        let out = run(
            only(&[ReportKind::Coverage, ReportKind::Stats]),
            &[(0, Event::GcResize { size: 1024 })],
        );
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(COVERAGE_NOTICE));
        assert!(out.contains("\tBuffer count 1\toverhead 48 (48 bytes per header)\n"));
        assert!(out.contains("\t         TYPE_GC\t            TYPE_GC_RESIZE\tcount      1\t"));
    }

    #[test]
    fn thread_and_domain_summaries() {
        let out = run(
            only(&[ReportKind::Thread, ReportKind::Domain, ReportKind::Context]),
            &[
                (
                    0,
                    Event::ThreadName {
                        thread_id: 0x7000,
                        name: "Main".into(),
                    },
                ),
                (0, Event::DomainLoad { domain: 0x1 }),
                (
                    0,
                    Event::DomainName {
                        domain: 0x2,
                        name: "child".into(),
                    },
                ),
                (
                    0,
                    Event::ContextLoad {
                        context: 0x30,
                        domain: 0x2,
                    },
                ),
            ],
        );
        assert_eq!(
            out,
            "\nThread summary\n\tThread: 0x7000, name: \"Main\"\n\
             \nDomain summary\n\tDomain: 0x2, friendly name: \"child\"\n\tDomain: 0x1, friendly name: \"(null)\"\n\
             \nContext summary\n\tContext: 0x30, domain: 0x2\n"
        );
    }
}
