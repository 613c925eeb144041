// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! What the profiler needs from the runtime it observes.
//!
//! The profiler never dereferences the pointers it is handed. Names are only asked for when a
//! metadata record has to be written, from the writer and dumper threads.

use crate::counters::RuntimeCounter;
use libdd_mlpd_protocol::HeapRef;

/// One live object reported by a heap walk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapObjectInfo {
    pub obj: u64,
    pub vtable: u64,
    /// Object size in bytes, before heap alignment.
    pub size: u64,
    pub generation: u8,
    /// Outgoing references, by increasing offset.
    pub refs: Vec<HeapRef>,
}

pub trait RuntimeHooks: Send + Sync {
    /// Full name of a method, signature included.
    fn method_name(&self, method: u64) -> String;

    /// Start and size of the native code of a method, if it was compiled.
    fn method_code(&self, _method: u64) -> Option<(u64, u64)> {
        None
    }

    /// The managed method whose code contains `ip`.
    fn find_method(&self, _ip: u64) -> Option<u64> {
        None
    }

    /// Methods of the calling thread's managed stack, innermost first, at most `max_frames`.
    fn walk_stack(&self, _max_frames: usize) -> Vec<u64> {
        Vec::new()
    }

    /// Visits every live object. Called with the world stopped.
    fn walk_heap(&self, _visit: &mut dyn FnMut(&HeapObjectInfo)) {}

    fn max_generation(&self) -> u32 {
        2
    }

    /// Requests a collection of `generation`.
    fn collect(&self, _generation: u32) {}

    /// Wakes the finalizer thread, whose end of run forces pending heap shots.
    fn notify_finalizer(&self) {}

    fn aot_id(&self) -> Option<String> {
        None
    }

    /// Current values of the runtime's own counters.
    fn counters(&self) -> Vec<RuntimeCounter> {
        Vec::new()
    }
}

/// Resolves native instruction pointers to symbol names.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, addr: u64) -> Option<String>;
}

/// Runtime that answers nothing, for embedding without a runtime behind the profiler.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRuntime;

impl RuntimeHooks for NoRuntime {
    fn method_name(&self, method: u64) -> String {
        format!("unknown method {method:#x}")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn resolve(&self, _addr: u64) -> Option<String> {
        None
    }
}
