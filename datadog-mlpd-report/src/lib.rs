// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Reader for the `.mlpd` streams written by the log profiler.
//!
//! [`analyze`] decodes a stream buffer by buffer into a [`Report`]: metadata tables, call
//! graphs, allocation and heap statistics, monitor contention, samples and counters. It then
//! prints the summaries selected in [`ReportOptions`].

mod analyzer;
mod counters;
mod error;
mod heap;
mod input;
mod options;
mod print;
mod samples;
mod tables;

pub use analyzer::{
    EventStat, EventStats, ExceptionStats, GcInfo, GcStats, HandleInfo, MonitorDesc,
    MonitorStats, Report, ThreadState,
};
pub use counters::{Counter, Counters, Reading};
pub use error::ReportError;
pub use heap::{HeapClass, HeapRoot, HeapShot, HeapShotCheck};
pub use input::{maybe_gunzip, open_profile, CountingReader};
pub use options::{
    leading_decimal, parse_c_ulong, parse_objects, parse_reports, AllocSort, CountersSort,
    FindSpec, MethodSort, ReportKind, ReportOptions, TimeRange, DEFAULT_REPORTS,
    DEFAULT_TRACE_MAX,
};
pub use samples::{SampleRow, SampleSummary, Samples};
pub use tables::{Ptr, Tables};

use libdd_mlpd_protocol::{read_buffer, DecodeError, FileHeader};
use std::io::{Read, Write};

/// Decodes the whole stream of `input` and prints the selected reports to `out`.
///
/// When objects are tracked, only their history is printed.
pub fn analyze<R: Read, W: Write>(
    input: R,
    options: ReportOptions,
    out: W,
) -> Result<W, ReportError> {
    let report = decode(input, options, out)?;
    print_unless_tracking(report)
}

/// Decodes the whole stream of `input` without printing the reports.
pub fn decode<R: Read, W: Write>(
    input: R,
    options: ReportOptions,
    out: W,
) -> Result<Report<W>, ReportError> {
    let mut input = CountingReader::new(input);
    let header = FileHeader::read_from(&mut input).map_err(ReportError::NotAProfile)?;
    tracing::debug!(
        data_version = header.data_version,
        pid = header.pid,
        "Decoding log profiler data"
    );

    let mut report = Report::new(header, options, out);
    loop {
        let file_offset = input.position();
        let (buffer, payload) = match read_buffer(&mut input) {
            Ok(Some(buffer)) => buffer,
            Ok(None) => break,
            Err(DecodeError::BadBufferId { id, raw }) => {
                report.dump_bad_buffer(id, &raw)?;
                return Err(ReportError::BadBufferId(id));
            }
            Err(DecodeError::Io(err)) => return Err(err.into()),
            Err(source) => {
                return Err(ReportError::Malformed {
                    file_offset,
                    source,
                })
            }
        };
        report.process_buffer(&buffer, &payload, file_offset)?;
    }
    report.finish()?;
    Ok(report)
}

fn print_unless_tracking<W: Write>(mut report: Report<W>) -> Result<W, ReportError> {
    if report.tracked().is_empty() {
        report.print_reports()?;
    } else {
        tracing::debug!(
            objects = report.tracked().len(),
            "Tracking objects, reports skipped"
        );
    }
    Ok(report.into_inner())
}
