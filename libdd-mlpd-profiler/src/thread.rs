// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::LogBuffer;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Small ids live in the high half of the buffer lock word and zero means "nobody".
const MAX_THREADS: usize = u16::MAX as usize;

/// A method seen for the first time by a thread. The writer emits its JIT record before any
/// buffer referencing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub method: u64,
    pub code_start: u64,
    pub code_size: u64,
    /// When the method was registered. The JIT record carries this time.
    pub time: u64,
}

/// Per-thread emission state.
///
/// Runtime threads keep theirs in the [`ThreadRegistry`] and write under the shared buffer
/// lock. The profiler's own threads own a context outright and never take the lock.
#[derive(Debug)]
pub(crate) struct ThreadContext {
    pub thread_id: u64,
    pub small_id: u16,
    pub ended: bool,
    pub call_depth: i64,
    pub buffer: Box<LogBuffer>,
    methods: Vec<MethodInfo>,
    pending: HashMap<u64, usize>,
}

impl ThreadContext {
    pub fn new(thread_id: u64, small_id: u16, now: u64) -> Self {
        Self {
            thread_id,
            small_id,
            ended: false,
            call_depth: 0,
            buffer: LogBuffer::new(thread_id, now, 0),
            methods: Vec::new(),
            pending: HashMap::new(),
        }
    }

    /// Queues `method` for a JIT record unless this buffer already references it. Code bounds
    /// learnt later complete an earlier registration.
    pub fn register_method(&mut self, method: u64, code: Option<(u64, u64)>, now: u64) {
        match self.pending.get(&method) {
            Some(&at) => {
                if let (Some((code_start, code_size)), Some(info)) = (code, self.methods.get_mut(at))
                {
                    info.code_start = code_start;
                    info.code_size = code_size;
                }
            }
            None => {
                let (code_start, code_size) = code.unwrap_or_default();
                self.pending.insert(method, self.methods.len());
                self.methods.push(MethodInfo {
                    method,
                    code_start,
                    code_size,
                    time: now,
                });
            }
        }
    }

    pub fn pending_methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Swaps in an empty buffer and hands back the filled chain and the pending methods.
    pub fn take_buffer(&mut self, now: u64) -> (Box<LogBuffer>, Vec<MethodInfo>) {
        let fresh = LogBuffer::new(self.thread_id, now, 0);
        self.pending.clear();
        (
            std::mem::replace(&mut self.buffer, fresh),
            std::mem::take(&mut self.methods),
        )
    }
}

/// Kernel id of the calling thread, used for the profiler's own threads.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn current_thread_id() -> u64 {
    nix::unistd::gettid().as_raw() as u64
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn current_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

/// Identifies a registered thread. A handle outlives its thread harmlessly: once the slot is
/// reused the generation no longer matches and the handle resolves to nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadHandle {
    index: u32,
    generation: u32,
}

impl ThreadHandle {
    pub fn small_id(&self) -> u16 {
        (self.index + 1) as u16
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot register more than {MAX_THREADS} profiler threads")]
pub struct RegistryFull;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    context: Option<ThreadContext>,
}

/// Arena of per-thread contexts.
///
/// Each slot sits behind its own mutex, shared through an `Arc` so a sync point can walk every
/// slot while threads attach and detach. A thread only ever blocks on its own slot when another
/// thread flushes it under the exclusive buffer lock.
#[derive(Debug, Default)]
pub(crate) struct ThreadRegistry {
    slots: RwLock<Vec<Arc<Mutex<Slot>>>>,
    free: Mutex<Vec<u32>>,
}

impl ThreadRegistry {
    pub fn attach(&self, thread_id: u64, now: u64) -> Result<ThreadHandle, RegistryFull> {
        let index = self.allocate()?;
        let slot = self.slot(index).ok_or(RegistryFull)?;
        let mut slot = slot.lock();
        let handle = ThreadHandle {
            index,
            generation: slot.generation,
        };
        slot.context = Some(ThreadContext::new(thread_id, handle.small_id(), now));
        Ok(handle)
    }

    /// Takes a small id for a profiler thread that keeps its context to itself.
    pub fn reserve(&self) -> Result<u16, RegistryFull> {
        Ok((self.allocate()? + 1) as u16)
    }

    pub fn release(&self, small_id: u16) {
        let Some(index) = u32::from(small_id).checked_sub(1) else {
            return;
        };
        if let Some(slot) = self.slot(index) {
            let mut slot = slot.lock();
            debug_assert!(slot.context.is_none(), "releasing an attached thread's slot");
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.free.lock().push(index);
    }

    fn allocate(&self) -> Result<u32, RegistryFull> {
        match self.free.lock().pop() {
            Some(index) => Ok(index),
            None => {
                let mut slots = self.slots.write();
                if slots.len() >= MAX_THREADS {
                    return Err(RegistryFull);
                }
                slots.push(Arc::default());
                Ok((slots.len() - 1) as u32)
            }
        }
    }

    /// Runs `f` on the context of `handle`.
    ///
    /// Returns `None` when the handle is stale or when the context is already borrowed further
    /// up the calling thread's stack, as happens when resolving a name emits another event.
    pub fn with<R>(
        &self,
        handle: ThreadHandle,
        f: impl FnOnce(&mut ThreadContext) -> R,
    ) -> Option<R> {
        let slot = self.slot(handle.index)?;
        let mut slot = slot.try_lock()?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.context.as_mut().map(f)
    }

    /// Unregisters the thread and returns its context.
    pub fn detach(&self, handle: ThreadHandle) -> Option<ThreadContext> {
        let slot = self.slot(handle.index)?;
        let context = {
            let mut slot = slot.lock();
            if slot.generation != handle.generation {
                return None;
            }
            slot.generation = slot.generation.wrapping_add(1);
            slot.context.take()
        };
        self.free.lock().push(handle.index);
        context
    }

    /// Runs `f` on every attached thread. Callers hold the buffer lock exclusively so none of
    /// them is appending.
    pub fn for_each_attached(&self, mut f: impl FnMut(&mut ThreadContext)) {
        for slot in self.snapshot() {
            if let Some(context) = slot.lock().context.as_mut() {
                f(context);
            }
        }
    }

    /// Handles of every attached thread.
    pub fn attached(&self) -> Vec<ThreadHandle> {
        self.snapshot()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let slot = slot.lock();
                slot.context.as_ref().map(|_| ThreadHandle {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect()
    }

    fn slot(&self, index: u32) -> Option<Arc<Mutex<Slot>>> {
        self.slots.read().get(index as usize).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<Mutex<Slot>>> {
        self.slots.read().clone()
    }
}
