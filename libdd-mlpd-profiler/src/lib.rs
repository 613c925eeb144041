// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Log profiler for a managed runtime.
//!
//! The runtime reports what happens to it through the emitters of [`Profiler`]: allocations,
//! collections, metadata loads, method calls, exceptions, monitors and samples. Each attached
//! thread encodes its events into a buffer of its own. Filled buffers go through a queue to a
//! writer thread, which serializes them to the output in the `.mlpd` format of
//! [`libdd_mlpd_protocol`], after the JIT records of the methods they reference.
//!
//! ```no_run
//! use libdd_mlpd_profiler::{NoRuntime, NoSymbols, Profiler, ProfilerConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ProfilerConfig {
//!     output: Some("app.mlpd".into()),
//!     ..Default::default()
//! };
//! let profiler = Profiler::start(config, Arc::new(NoRuntime), Arc::new(NoSymbols))?;
//! let thread = profiler.attach_thread(1)?;
//! profiler.thread_start(thread, 1);
//! profiler.gc_alloc(thread, 0x7000, 0x1000_0000, 24);
//! profiler.thread_end(thread, 1);
//! profiler.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod clock;
mod config;
mod counters;
mod dumper;
mod emit;
mod gc;
mod helper;
mod lock;
mod profiler;
mod queue;
mod runtime;
mod semaphore;
mod sink;
mod thread;
mod writer;

pub use buffer::LogBuffer;
pub use config::{EventMask, HeapshotMode, ProfilerConfig};
pub use counters::{EventCountersSnapshot, RuntimeCounter};
pub use dumper::SampleFrame;
pub use lock::BufferLock;
pub use profiler::Profiler;
pub use runtime::{HeapObjectInfo, NoRuntime, NoSymbols, RuntimeHooks, SymbolResolver};
pub use sink::{expand_output_name, resolve_target, OutputSink, DEFAULT_OUTPUT};
pub use thread::{MethodInfo, RegistryFull, ThreadHandle};

pub use libdd_mlpd_protocol::wire::{
    ClauseType, CodeBufferType, GcEvent, HandleType, MonitorEvent, RootSource,
};
