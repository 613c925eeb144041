// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_mlpd_report::{analyze, open_profile, ReportError, ReportKind, ReportOptions};
use flate2::write::GzEncoder;
use flate2::Compression;
use libdd_mlpd_profiler::{EventMask, NoSymbols, Profiler, ProfilerConfig, RuntimeHooks};
use libdd_mlpd_protocol::{BufferHeader, Event, EventEncoder, FileHeader};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

const THREAD: u64 = 0x7000;

#[derive(Debug, Default)]
struct FakeRuntime;

impl RuntimeHooks for FakeRuntime {
    fn method_name(&self, method: u64) -> String {
        format!("Program:M{method:x} ()")
    }

    fn method_code(&self, method: u64) -> Option<(u64, u64)> {
        Some((method << 8, 0x40))
    }

    fn find_method(&self, ip: u64) -> Option<u64> {
        Some(ip >> 8)
    }

    fn walk_heap(&self, _visit: &mut dyn FnMut(&libdd_mlpd_profiler::HeapObjectInfo)) {}
}

struct Output {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

fn output() -> Output {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.mlpd");
    Output { _dir: dir, path }
}

/// A file header followed by one buffer of `THREAD` holding `events`.
fn stream(events: &[(u64, Event)]) -> Vec<u8> {
    let mut out = Vec::new();
    FileHeader::current(0, 0, 10, 42)
        .write_to(&mut out)
        .unwrap();
    let mut encoder = EventEncoder::new(events.first().map_or(0, |(time, _)| *time));
    let mut payload = Vec::new();
    for (time, event) in events {
        encoder.encode(*time, event, &mut payload);
    }
    BufferHeader {
        len: payload.len() as u32,
        time_base: encoder.time_base(),
        ptr_base: encoder.ptr_base(),
        obj_base: encoder.obj_base(),
        thread_id: THREAD,
        method_base: encoder.method_base(),
    }
    .write_to(&mut out)
    .unwrap();
    out.extend_from_slice(&payload);
    out
}

fn allocations() -> Vec<(u64, Event)> {
    vec![
        (
            1000,
            Event::ClassLoad {
                klass: 0x10,
                image: 0x1,
                name: "Foo".into(),
            },
        ),
        (
            1001,
            Event::VTableLoad {
                vtable: 0x100,
                domain: 0x2,
                klass: 0x10,
            },
        ),
        (
            1002,
            Event::Alloc {
                vtable: 0x100,
                obj: 0x1000,
                size: 24,
                backtrace: None,
            },
        ),
        (
            1003,
            Event::Alloc {
                vtable: 0x100,
                obj: 0x1020,
                size: 24,
                backtrace: None,
            },
        ),
    ]
}

fn report_text(input: &[u8], options: ReportOptions) -> String {
    let out = analyze(input, options, Vec::new()).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
#[cfg_attr(miri, ignore)]
fn reports_a_profiler_session() {
    let out = output();
    let config = ProfilerConfig {
        output: Some(out.path.to_string_lossy().into_owned()),
        events: EventMask::default() | EventMask::ALLOC,
        enter_leave: true,
        ..Default::default()
    };
    let profiler = Profiler::start(config, Arc::new(FakeRuntime), Arc::new(NoSymbols)).unwrap();
    let thread = profiler.attach_thread(42).unwrap();
    profiler.thread_start(thread, 42);
    profiler.thread_name(thread, 42, "Main");
    profiler.class_loaded(thread, 0x10, 0x1, "Foo");
    profiler.vtable_loaded(thread, 0x100, 0x2, 0x10);
    profiler.method_jitted(thread, 0x11, 0x1100, 0x40);
    profiler.method_enter(thread, 0x11);
    profiler.gc_alloc(thread, 0x100, 0x2000_0000, 24);
    profiler.gc_alloc(thread, 0x100, 0x2000_0020, 20);
    profiler.method_leave(thread, 0x11);
    profiler.shutdown().unwrap();

    let options = ReportOptions {
        verbose: 1,
        ..Default::default()
    };
    let input = open_profile(&out.path).unwrap();
    let text = String::from_utf8(analyze(input, options, Vec::new()).unwrap()).unwrap();

    assert!(text.starts_with("\nMono log profiler data\n"), "{text}");
    assert!(text.contains("Allocation summary"), "{text}");
    // 24 and 20 are both rounded up to 24 bytes.
    assert!(
        text.contains(&format!("{:>10} {:>10} {:>8} Foo\n", 48, 2, 24)),
        "{text}"
    );
    assert!(text.contains("Method call summary"), "{text}");
    assert!(text.contains("Program:M11 ()"), "{text}");
    assert!(text.contains("Main"), "{text}");
}

#[test]
fn rejects_non_profiles() {
    for input in [&b""[..], b"not a profile at all, just some text"] {
        let err = analyze(input, ReportOptions::default(), Vec::new()).unwrap_err();
        assert!(matches!(err, ReportError::NotAProfile(_)), "{err:?}");
    }

    let mut newer = Vec::new();
    let mut header = FileHeader::current(0, 0, 10, 42);
    header.data_version = 18;
    header.write_to(&mut newer).unwrap();
    let err = analyze(&newer[..], ReportOptions::default(), Vec::new()).unwrap_err();
    assert!(matches!(err, ReportError::NotAProfile(_)), "{err:?}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn reads_gzipped_files() {
    let out = output();
    let mut gz = GzEncoder::new(
        std::fs::File::create(&out.path).unwrap(),
        Compression::default(),
    );
    gz.write_all(&stream(&allocations())).unwrap();
    gz.finish().unwrap();

    let options = ReportOptions {
        reports: vec![ReportKind::Alloc],
        ..Default::default()
    };
    let input = open_profile(&out.path).unwrap();
    let text = String::from_utf8(analyze(input, options, Vec::new()).unwrap()).unwrap();
    assert!(
        text.contains("Total memory allocated: 48 bytes in 2 objects"),
        "{text}"
    );
}

#[test]
fn missing_files_fail_to_open() {
    let out = output();
    let err = open_profile(&out.path).err().unwrap();
    assert!(matches!(err, ReportError::Open { .. }), "{err:?}");
}

#[test]
fn tracking_replaces_the_reports() {
    let options = ReportOptions {
        track: vec![0x1020],
        ..Default::default()
    };
    let text = report_text(&stream(&allocations()), options);
    assert!(
        text.starts_with("Object 0x1020 created (Foo, 24 bytes) at "),
        "{text}"
    );
    assert!(!text.contains("Allocation summary"), "{text}");
    assert!(!text.contains("0x1000"), "{text}");
}

#[test]
fn truncated_buffers_end_the_stream() {
    let full = stream(&allocations());
    let options = ReportOptions {
        reports: vec![ReportKind::Alloc],
        ..Default::default()
    };
    let text = report_text(&full[..full.len() - 1], options.clone());
    assert!(!text.contains("Allocation summary"), "{text}");

    let mut huge = Vec::new();
    FileHeader::current(0, 0, 10, 42)
        .write_to(&mut huge)
        .unwrap();
    BufferHeader {
        len: u32::MAX,
        time_base: 1000,
        ptr_base: 0,
        obj_base: 0,
        thread_id: THREAD,
        method_base: 0,
    }
    .write_to(&mut huge)
    .unwrap();
    huge.extend_from_slice(&[1, 2, 3]);
    let text = report_text(&huge, options);
    assert!(!text.contains("Allocation summary"), "{text}");
}

#[test]
fn bad_buffer_ids_are_fatal() {
    let mut input = stream(&allocations());
    let mut header = Vec::new();
    FileHeader::current(0, 0, 10, 42)
        .write_to(&mut header)
        .unwrap();
    input[header.len()..header.len() + 4].copy_from_slice(&0xdead_u32.to_le_bytes());

    let mut out = Vec::new();
    let err = analyze(&input[..], ReportOptions::default(), &mut out).unwrap_err();
    assert!(matches!(err, ReportError::BadBufferId(0xdead)), "{err:?}");
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Incorrect buffer id: 0xdead\n"), "{text}");
}

#[test]
fn arbitrary_payloads_do_not_panic() {
    bolero::check!()
        .with_type::<(u64, Vec<u8>)>()
        .for_each(|(time_base, payload)| {
            let mut input = Vec::new();
            FileHeader::current(0, 0, 10, 42)
                .write_to(&mut input)
                .unwrap();
            BufferHeader {
                len: payload.len() as u32,
                time_base: *time_base,
                ptr_base: 0,
                obj_base: 0,
                thread_id: THREAD,
                method_base: 0,
            }
            .write_to(&mut input)
            .unwrap();
            input.extend_from_slice(payload);
            let options = ReportOptions {
                traces: true,
                verbose: 1,
                ..Default::default()
            };
            let _ = analyze(&input[..], options, Vec::new());
        });
}
