// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Constants of the on-disk format and the small enumerations carried in events.

pub use crate::varint::LEB128_SIZE;

/// Magic number of the stream header.
pub const LOG_HEADER_ID: u32 = 0x4D50_5A01;
/// Magic number of every buffer record.
pub const BUF_ID: u32 = 0x4D50_4C01;

pub const LOG_VERSION_MAJOR: u8 = 3;
pub const LOG_VERSION_MINOR: u8 = 0;
/// Highest data version this crate reads, and the one it writes.
pub const LOG_DATA_VERSION: u8 = 17;

/// Size of a buffer record header on disk.
pub const BUFFER_HEADER_SIZE: usize = 48;
/// Default payload capacity of a log buffer.
pub const BUFFER_SIZE: usize = 4096 * 16;
/// Maximum number of frames in a backtrace or sample.
pub const MAX_FRAMES: usize = 32;

pub const BYTE_SIZE: usize = 1;
/// Size of the event prefix: tag byte plus worst-case time delta.
pub const EVENT_SIZE: usize = BYTE_SIZE + LEB128_SIZE;

pub mod event_type {
    pub const ALLOC: u8 = 0;
    pub const GC: u8 = 1;
    pub const METADATA: u8 = 2;
    pub const METHOD: u8 = 3;
    pub const EXCEPTION: u8 = 4;
    pub const MONITOR: u8 = 5;
    pub const HEAP: u8 = 6;
    pub const SAMPLE: u8 = 7;
    pub const RUNTIME: u8 = 8;
    /// Only found in streams older than data version 16.
    pub const COVERAGE: u8 = 9;
    pub const META: u8 = 10;
}

pub mod subtype {
    // alloc
    pub const ALLOC_BT: u8 = 1 << 4;

    // gc
    pub const GC_EVENT: u8 = 1 << 4;
    pub const GC_RESIZE: u8 = 2 << 4;
    pub const GC_MOVE: u8 = 3 << 4;
    pub const GC_HANDLE_CREATED: u8 = 4 << 4;
    pub const GC_HANDLE_DESTROYED: u8 = 5 << 4;
    pub const GC_HANDLE_CREATED_BT: u8 = 6 << 4;
    pub const GC_HANDLE_DESTROYED_BT: u8 = 7 << 4;
    pub const GC_FINALIZE_START: u8 = 8 << 4;
    pub const GC_FINALIZE_END: u8 = 9 << 4;
    pub const GC_FINALIZE_OBJECT_START: u8 = 10 << 4;
    pub const GC_FINALIZE_OBJECT_END: u8 = 11 << 4;

    // metadata; a zero subtype is a name event
    pub const END_LOAD: u8 = 2 << 4;
    pub const END_UNLOAD: u8 = 4 << 4;

    // method
    pub const LEAVE: u8 = 1 << 4;
    pub const ENTER: u8 = 2 << 4;
    pub const EXC_LEAVE: u8 = 3 << 4;
    pub const JIT: u8 = 4 << 4;

    // exception, subtype is `tag & 0x70`
    pub const THROW_BT: u8 = 1 << 7;
    pub const CLAUSE: u8 = 1 << 4;
    pub const EXCEPTION_MASK: u8 = 0x70;

    // monitor
    pub const MONITOR_BT: u8 = 1 << 7;

    // heap
    pub const HEAP_START: u8 = 0;
    pub const HEAP_END: u8 = 1 << 4;
    pub const HEAP_OBJECT: u8 = 2 << 4;
    pub const HEAP_ROOT: u8 = 3 << 4;
    pub const HEAP_ROOT_REGISTER: u8 = 4 << 4;
    pub const HEAP_ROOT_UNREGISTER: u8 = 5 << 4;

    // sample
    pub const SAMPLE_HIT: u8 = 0;
    pub const SAMPLE_USYM: u8 = 1 << 4;
    pub const SAMPLE_UBIN: u8 = 2 << 4;
    pub const SAMPLE_COUNTERS_DESC: u8 = 3 << 4;
    pub const SAMPLE_COUNTERS: u8 = 4 << 4;

    // runtime
    pub const JITHELPER: u8 = 1 << 4;

    // coverage
    pub const COVERAGE_ASSEMBLY: u8 = 0;
    pub const COVERAGE_METHOD: u8 = 1 << 4;
    pub const COVERAGE_STATEMENT: u8 = 2 << 4;
    pub const COVERAGE_CLASS: u8 = 3 << 4;

    // meta
    pub const SYNC_POINT: u8 = 0;
    pub const AOT_ID: u8 = 1 << 4;

    pub const MASK: u8 = 0xf0;
}

/// Kind byte following the time delta of metadata events.
pub mod metadata_kind {
    pub const CLASS: u8 = 1;
    pub const IMAGE: u8 = 2;
    pub const ASSEMBLY: u8 = 3;
    pub const DOMAIN: u8 = 4;
    pub const THREAD: u8 = 5;
    pub const CONTEXT: u8 = 6;
    pub const VTABLE: u8 = 7;
}

/// Counter descriptor encodings: the low byte is the type, then section, unit and variance bits.
pub mod counter {
    pub const INT: u64 = 0;
    pub const UINT: u64 = 1;
    pub const WORD: u64 = 2;
    pub const LONG: u64 = 3;
    pub const ULONG: u64 = 4;
    pub const DOUBLE: u64 = 5;
    pub const STRING: u64 = 6;
    pub const TIME_INTERVAL: u64 = 7;

    pub const JIT: u64 = 1 << 8;
    pub const GC: u64 = 1 << 9;
    pub const METADATA: u64 = 1 << 10;
    pub const GENERICS: u64 = 1 << 11;
    pub const SECURITY: u64 = 1 << 12;
    pub const RUNTIME: u64 = 1 << 13;
    pub const SYSTEM: u64 = 1 << 14;
    pub const PERFCOUNTERS: u64 = 1 << 15;
    pub const PROFILER: u64 = 1 << 16;
    pub const INTERP: u64 = 1 << 17;

    pub const RAW: u64 = 0;
    pub const BYTES: u64 = 1 << 24;
    pub const TIME: u64 = 2 << 24;
    pub const COUNT: u64 = 3 << 24;
    pub const PERCENTAGE: u64 = 4 << 24;

    pub const MONOTONIC: u64 = 1 << 28;
    pub const CONSTANT: u64 = 1 << 29;
    pub const VARIABLE: u64 = 1 << 30;

    pub fn section_name(section: u64) -> &'static str {
        match section {
            INTERP => "Mono Interp",
            JIT => "Mono JIT",
            GC => "Mono GC",
            METADATA => "Mono Metadata",
            GENERICS => "Mono Generics",
            SECURITY => "Mono Security",
            RUNTIME => "Mono Runtime",
            SYSTEM => "Mono System",
            PROFILER => "Mono Profiler",
            _ => "<unknown>",
        }
    }

    pub fn type_name(kind: u64) -> &'static str {
        match kind {
            INT => "Int",
            UINT => "UInt",
            WORD => "Word",
            LONG => "Long",
            ULONG => "ULong",
            DOUBLE => "Double",
            STRING => "String",
            TIME_INTERVAL => "Time Interval",
            _ => "<unknown>",
        }
    }

    pub fn unit_name(unit: u64) -> &'static str {
        match unit {
            RAW => "Raw",
            BYTES => "Bytes",
            TIME => "Time",
            COUNT => "Count",
            PERCENTAGE => "Percentage",
            _ => "<unknown>",
        }
    }

    pub fn variance_name(variance: u64) -> &'static str {
        match variance {
            MONOTONIC => "Monotonic",
            CONSTANT => "Constant",
            VARIABLE => "Variable",
            _ => "<unknown>",
        }
    }
}

/// Root kinds found in data versions 13 and 14, and the flags combined with them.
pub mod legacy_root {
    pub const STACK: u64 = 1;
    pub const FINALIZER: u64 = 2;
    pub const HANDLE: u64 = 3;
    pub const OTHER: u64 = 4;
    pub const MISC: u64 = 5;
    pub const PINNING: u64 = 1 << 8;
    pub const WEAKREF: u64 = 2 << 8;
    pub const INTERIOR: u64 = 4 << 8;
    pub const TYPEMASK: u64 = 0xff;

    pub fn name(root_type: u64) -> &'static str {
        match root_type & TYPEMASK {
            STACK => "stack",
            FINALIZER => "finalizer",
            HANDLE => "handle",
            OTHER => "other",
            MISC => "misc",
            _ => "unknown",
        }
    }
}

/// Sample kinds of legacy sample hits. Current data is always [`sample_type::CYCLES`].
pub mod sample_type {
    pub const CYCLES: u64 = 1;
    pub const INSTRUCTIONS: u64 = 2;
    pub const CACHE_MISSES: u64 = 3;
    pub const CACHE_REFS: u64 = 4;
    pub const BRANCHES: u64 = 5;
    pub const BRANCH_MISSES: u64 = 6;

    pub fn name(kind: u64) -> &'static str {
        match kind {
            CYCLES => "cycles",
            INSTRUCTIONS => "instructions retired",
            CACHE_MISSES => "cache misses",
            CACHE_REFS => "cache references",
            BRANCHES => "executed branches",
            BRANCH_MISSES => "unpredicted branches",
            _ => "unknown",
        }
    }
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ty, unknown = $unknown:literal {
            $($variant:ident = $value:literal => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            pub fn from_raw(raw: $repr) -> Option<Self> {
                match raw {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn raw(self) -> $repr {
                self as $repr
            }

            /// Human readable name used in reports; unknown raw values get a placeholder.
            pub fn name_of(raw: $repr) -> &'static str {
                match raw {
                    $($value => $label,)+
                    _ => $unknown,
                }
            }
        }
    };
}

wire_enum! {
    pub enum GcEvent: u8, unknown = "unknown" {
        Start = 0 => "start",
        MarkStart = 1 => "mark start",
        MarkEnd = 2 => "mark end",
        ReclaimStart = 3 => "reclaim start",
        ReclaimEnd = 4 => "reclaim end",
        End = 5 => "end",
        PreStopWorld = 6 => "pre stop",
        PostStopWorld = 7 => "post stop",
        PreStartWorld = 8 => "pre start",
        PostStartWorld = 9 => "post start",
        PreStopWorldLocked = 10 => "pre stop lock",
        PostStartWorldUnlocked = 11 => "post start unlock",
    }
}

wire_enum! {
    pub enum SyncPoint: u8, unknown = "unknown" {
        Periodic = 0 => "periodic",
        WorldStop = 1 => "world stop",
        WorldStart = 2 => "world start",
    }
}

wire_enum! {
    pub enum MonitorEvent: u8, unknown = "invalid" {
        Contention = 1 => "contended",
        Done = 2 => "acquired",
        Fail = 3 => "not taken",
    }
}

wire_enum! {
    /// Exception clause kinds; 3 is unused.
    pub enum ClauseType: u8, unknown = "invalid" {
        Catch = 0 => "catch",
        Filter = 1 => "filter",
        Finally = 2 => "finally",
        Fault = 4 => "fault",
    }
}

wire_enum! {
    pub enum HandleType: u8, unknown = "unknown" {
        Weak = 0 => "weak",
        WeakTrack = 1 => "weaktrack",
        Normal = 2 => "normal",
        Pinned = 3 => "pinned",
    }
}

wire_enum! {
    pub enum CodeBufferType: u8, unknown = "unspecified" {
        Method = 0 => "method",
        MethodTrampoline = 1 => "method trampoline",
        UnboxTrampoline = 2 => "unbox trampoline",
        ImtTrampoline = 3 => "imt trampoline",
        GenericsTrampoline = 4 => "generics trampoline",
        SpecificTrampoline = 5 => "specific trampoline",
        Helper = 6 => "misc helper",
        Monitor = 7 => "monitor/lock",
        DelegateInvoke = 8 => "delegate invoke",
        ExceptionHandling = 9 => "exception handling",
    }
}

wire_enum! {
    /// Origin of a registered GC root range.
    pub enum RootSource: u8, unknown = "unknown" {
        External = 0 => "external",
        Stack = 1 => "stack",
        FinalizerQueue = 2 => "finalizer queue",
        Static = 3 => "static",
        ThreadStatic = 4 => "thread static",
        ContextStatic = 5 => "context static",
        GcHandle = 6 => "gchandle",
        Jit = 7 => "jit",
        Threading = 8 => "threading",
        Domain = 9 => "domain",
        Reflection = 10 => "reflection",
        Marshal = 11 => "marshal",
        ThreadPool = 12 => "threadpool",
        Debugger = 13 => "debugger",
        Handle = 14 => "handle",
        Ephemeron = 15 => "ephemeron",
        ToggleRef = 16 => "toggleref",
    }
}

/// Number of per-clause counters kept by the report (`ClauseType::Fault + 1`).
pub const CLAUSE_SLOTS: usize = ClauseType::Fault as usize + 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_names() {
        assert_eq!(GcEvent::name_of(GcEvent::PreStopWorldLocked.raw()), "pre stop lock");
        assert_eq!(GcEvent::name_of(42), "unknown");
        assert_eq!(ClauseType::from_raw(3), None);
        assert_eq!(ClauseType::name_of(3), "invalid");
        assert_eq!(
            CodeBufferType::from_raw(5),
            Some(CodeBufferType::SpecificTrampoline)
        );
        assert_eq!(CodeBufferType::name_of(200), "unspecified");
        assert_eq!(CLAUSE_SLOTS, 5);
    }

    #[test]
    fn event_prefix_size() {
        assert_eq!(EVENT_SIZE, 11);
        assert_eq!(BUFFER_SIZE, 65536);
    }
}
