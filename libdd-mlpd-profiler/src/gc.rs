// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collection bracketing and heap shots.
//!
//! When the world is about to stop the collector thread takes the buffer lock exclusively and
//! keeps it until the world restarts. In between it flushes every thread, walks the heap if a
//! shot is due and brackets the pause with sync points, so that no event carrying an object
//! address can straddle a move.

use crate::config::{EventMask, HeapshotMode};
use crate::profiler::{Profiler, Shared};
use crate::runtime::HeapObjectInfo;
use crate::thread::ThreadHandle;
use libdd_mlpd_protocol::wire::{GcEvent, SyncPoint};
use libdd_mlpd_protocol::Event;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

const NANOS_PER_MILLI: u64 = 1_000_000;

#[derive(Debug, Default)]
struct WalkState {
    do_heap_walk: bool,
    /// Major collections seen so far.
    gc_count: u64,
    last_heapshot: u64,
}

#[derive(Debug, Default)]
pub(crate) struct GcState {
    heapshot_requested: AtomicBool,
    /// Whether [`Profiler::gc_roots`] reports are wanted during the current collection.
    roots_enabled: AtomicBool,
    walk: Mutex<WalkState>,
}

impl GcState {
    pub fn request_heapshot(&self) {
        self.heapshot_requested.store(true, Ordering::Release);
    }

    pub fn heapshot_requested(&self) -> bool {
        self.heapshot_requested.load(Ordering::Acquire)
    }

    pub fn roots_enabled(&self) -> bool {
        self.roots_enabled.load(Ordering::Acquire)
    }
}

/// Whether a heap walk is due for a collection, before manual requests are considered.
/// `OnDemand` keeps the previous decision.
fn walk_due(mode: HeapshotMode, state: &WalkState, is_major: bool, now: u64) -> bool {
    match mode {
        HeapshotMode::None => false,
        HeapshotMode::Major => is_major,
        HeapshotMode::OnDemand => state.do_heap_walk,
        HeapshotMode::EveryGcs(n) => state.gc_count % u64::from(n.max(1)) == 0,
        HeapshotMode::EveryMillis(ms) => {
            now.wrapping_sub(state.last_heapshot) / NANOS_PER_MILLI >= ms
        }
    }
}

impl Shared {
    /// Requests a heap shot. It happens at the next major serial collection, which the
    /// finalizer thread forces once it runs.
    pub fn trigger_heapshot(&self) {
        self.gc.request_heapshot();
        self.runtime.notify_finalizer();
    }

    fn process_heapshot(&self) {
        if self.gc.heapshot_requested() {
            self.runtime.collect(self.runtime.max_generation());
        }
    }

    fn walk_heap(&self, handle: ThreadHandle) {
        let mut visit = |object: &HeapObjectInfo| {
            let event = Event::HeapObject {
                obj: object.obj,
                vtable: object.vtable,
                size: (object.size + 7) & !7,
                generation: object.generation,
                refs: object.refs.clone(),
            };
            self.log(handle, &self.counters.heap_objects, event);
        };
        self.runtime.walk_heap(&mut visit);
    }
}

impl Profiler {
    /// Collection progress reported by the runtime on the collector thread.
    pub fn gc_event(
        &self,
        handle: ThreadHandle,
        event: GcEvent,
        generation: u32,
        is_serial: bool,
    ) {
        let shared = &self.shared;
        let is_major = generation == shared.runtime.max_generation();

        if shared.enabled(EventMask::GC) {
            shared.log(
                handle,
                &shared.counters.gc_events,
                Event::GcEvent {
                    event: event.raw(),
                    generation: generation as u8,
                },
            );
        }

        let small_id = handle.small_id();
        match event {
            GcEvent::PreStopWorldLocked => {
                let now = shared.now();
                let walking = {
                    let mut state = shared.gc.walk.lock();
                    state.do_heap_walk = walk_due(shared.heapshot_mode(), &state, is_major, now);
                    // A manual request overrides the mode, but walks only happen in major serial
                    // collections. Others get postponed to the collection the finalizer forces.
                    if is_major && is_serial && shared.gc.heapshot_requested() {
                        state.do_heap_walk = true;
                    } else if state.do_heap_walk && !(is_major && is_serial) {
                        shared.trigger_heapshot();
                        state.do_heap_walk = false;
                    }
                    state.do_heap_walk
                };

                let roots = shared.enabled(EventMask::GC_ROOT)
                    && (shared.config.always_do_root_report || walking);
                shared.gc.roots_enabled.store(roots, Ordering::Release);

                shared.lock.lock_exclusive(small_id);
            }
            GcEvent::PostStopWorld => {
                if shared.enabled(EventMask::ALL_GC) {
                    // The flush visits this thread's slot too, so it runs outside of it.
                    shared.sync_point_flush(small_id);
                    shared.with_log(handle, |ctx| {
                        shared.sync_point_mark(ctx, SyncPoint::WorldStop)
                    });
                }
                if shared.gc.walk.lock().do_heap_walk {
                    shared.log(handle, &shared.counters.heap_starts, Event::HeapStart);
                }
            }
            GcEvent::Start => {
                if is_major {
                    shared.gc.walk.lock().gc_count += 1;
                }
            }
            GcEvent::PreStartWorld => {
                shared.gc.roots_enabled.store(false, Ordering::Release);

                let walking = shared.gc.walk.lock().do_heap_walk;
                if walking {
                    debug_assert!(is_major && is_serial);
                    shared.walk_heap(handle);
                    shared.log(handle, &shared.counters.heap_ends, Event::HeapEnd);

                    let mut state = shared.gc.walk.lock();
                    state.do_heap_walk = false;
                    state.last_heapshot = shared.now();
                    shared.gc.heapshot_requested.store(false, Ordering::Release);
                }

                if shared.enabled(EventMask::ALL_GC) {
                    shared.with_log(handle, |ctx| {
                        shared.sync_point_mark(ctx, SyncPoint::WorldStart)
                    });
                }
            }
            GcEvent::PostStartWorldUnlocked => shared.lock.unlock_exclusive(small_id),
            _ => {}
        }
    }

    pub fn gc_resize(&self, handle: ThreadHandle, new_size: u64) {
        let shared = &self.shared;
        if shared.enabled(EventMask::GC) {
            shared.log(handle, &shared.counters.gc_resizes, Event::GcResize { size: new_size });
        }
    }

    /// Objects moved by the collector, as (old address, new address) pairs.
    pub fn gc_moves(&self, handle: ThreadHandle, objects: &[u64]) {
        let shared = &self.shared;
        if shared.enabled(EventMask::GC_MOVE) {
            let event = Event::GcMove {
                objects: objects.to_vec(),
            };
            shared.log(handle, &shared.counters.gc_moves, event);
        }
    }

    /// Root slots and the objects they hold. Only reported while the collection wants roots,
    /// see [`crate::ProfilerConfig::always_do_root_report`].
    pub fn gc_roots(&self, handle: ThreadHandle, roots: &[(u64, u64)]) {
        let shared = &self.shared;
        if shared.enabled(EventMask::GC_ROOT) && shared.gc.roots_enabled() {
            let event = Event::HeapRoots {
                roots: roots.to_vec(),
            };
            shared.log(handle, &shared.counters.heap_roots, event);
        }
    }

    /// Asks for a heap shot at the next opportunity, as the `heapshot` command does.
    pub fn trigger_heapshot(&self) {
        self.shared.trigger_heapshot();
    }

    pub fn finalize_begin(&self, handle: ThreadHandle) {
        let shared = &self.shared;
        if shared.enabled(EventMask::FINALIZATION) {
            shared.log(handle, &shared.counters.finalize_begins, Event::GcFinalizeStart);
        }
    }

    /// End of a finalizer run. A pending heap shot request collects here.
    pub fn finalize_end(&self, handle: ThreadHandle) {
        let shared = &self.shared;
        shared.process_heapshot();
        if shared.enabled(EventMask::FINALIZATION) {
            shared.log(handle, &shared.counters.finalize_ends, Event::GcFinalizeEnd);
        }
    }

    pub fn finalize_object_begin(&self, handle: ThreadHandle, obj: u64) {
        let shared = &self.shared;
        if shared.enabled(EventMask::FINALIZATION) {
            let event = Event::GcFinalizeObjectStart { obj };
            shared.log(handle, &shared.counters.finalize_object_begins, event);
        }
    }

    pub fn finalize_object_end(&self, handle: ThreadHandle, obj: u64) {
        let shared = &self.shared;
        if shared.enabled(EventMask::FINALIZATION) {
            let event = Event::GcFinalizeObjectEnd { obj };
            shared.log(handle, &shared.counters.finalize_object_ends, event);
        }
    }
}
