// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicU32, Ordering};

const READERS_MASK: u32 = 0xffff;

/// Writer-biased lock guarding buffer appends.
///
/// Mutator threads take it shared around every append. A collector takes it exclusively before
/// it moves or scans objects so that no event holding a raw object address is half written. A
/// pending exclusive request blocks new shared acquisitions, so a steady stream of appends
/// cannot starve a collection.
///
/// The state word holds the reader count in its low 16 bits and the small id of the exclusive
/// holder in its high 16 bits. Waiting spins and yields, it never parks in the kernel: a thread
/// holding the lock may be the one a stop-the-world handshake is waiting on.
#[derive(Debug, Default)]
pub struct BufferLock {
    state: AtomicU32,
    exclusive_intent: AtomicU32,
}

impl BufferLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            exclusive_intent: AtomicU32::new(0),
        }
    }

    /// Shared acquisition. A no-op for the thread holding the lock exclusively, which keeps
    /// emitting while it runs a collection.
    pub fn lock(&self, small_id: u16) {
        let mine = u32::from(small_id) << 16;
        if self.state.load(Ordering::Acquire) == mine {
            return;
        }

        let backoff = Backoff::new();
        loop {
            let state = self.state.load(Ordering::Acquire);
            if self.exclusive_intent.load(Ordering::Acquire) == 0
                && state >> 16 == 0
                && self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            backoff.snooze();
        }
    }

    pub fn unlock(&self, small_id: u16) {
        let mine = u32::from(small_id) << 16;
        let state = self.state.load(Ordering::Acquire);
        if state == mine {
            return;
        }
        debug_assert!(state >> 16 == 0, "shared unlock while held exclusively");
        debug_assert!(state & READERS_MASK != 0, "shared unlock without readers");
        self.state.fetch_sub(1, Ordering::AcqRel);
    }

    /// Waits for every reader to drain and takes the lock for `small_id`, which must be
    /// non-zero.
    pub fn lock_exclusive(&self, small_id: u16) {
        debug_assert!(small_id != 0);
        let mine = u32::from(small_id) << 16;
        self.exclusive_intent.fetch_add(1, Ordering::AcqRel);

        let backoff = Backoff::new();
        while self
            .state
            .compare_exchange_weak(0, mine, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    pub fn unlock_exclusive(&self, small_id: u16) {
        debug_assert_eq!(self.state.load(Ordering::Acquire), u32::from(small_id) << 16);
        self.state.store(0, Ordering::Release);
        self.exclusive_intent.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_held_exclusively_by(&self, small_id: u16) -> bool {
        self.state.load(Ordering::Acquire) == u32::from(small_id) << 16
    }

    /// True when nobody holds or waits for the lock.
    pub fn is_idle(&self) -> bool {
        self.state.load(Ordering::Acquire) == 0
            && self.exclusive_intent.load(Ordering::Acquire) == 0
    }

    #[cfg(test)]
    fn raw(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32};
    use std::sync::Arc;

    #[test]
    fn exclusive_holder_nests_shared() {
        let lock = BufferLock::new();
        lock.lock_exclusive(3);
        assert!(lock.is_held_exclusively_by(3));
        lock.lock(3);
        lock.unlock(3);
        assert_eq!(lock.raw(), 3 << 16);
        lock.unlock_exclusive(3);
        assert!(lock.is_idle());
    }

    #[test]
    fn readers_count() {
        let lock = BufferLock::new();
        lock.lock(1);
        lock.lock(2);
        assert_eq!(lock.raw(), 2);
        lock.unlock(2);
        lock.unlock(1);
        assert!(lock.is_idle());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn readers_and_exclusive_never_overlap() {
        let lock = Arc::new(BufferLock::new());
        let readers_inside = Arc::new(AtomicI32::new(0));
        let exclusive_inside = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (1..=4u16)
            .map(|id| {
                let lock = lock.clone();
                let readers_inside = readers_inside.clone();
                let exclusive_inside = exclusive_inside.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut rounds = 0u32;
                    while !stop.load(Ordering::Relaxed) {
                        lock.lock(id);
                        readers_inside.fetch_add(1, Ordering::SeqCst);
                        assert!(!exclusive_inside.load(Ordering::SeqCst));
                        assert_eq!(lock.raw() >> 16, 0);
                        readers_inside.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock(id);
                        rounds += 1;
                    }
                    rounds
                })
            })
            .collect();

        for _ in 0..2_000 {
            lock.lock_exclusive(100);
            exclusive_inside.store(true, Ordering::SeqCst);
            assert_eq!(readers_inside.load(Ordering::SeqCst), 0);
            assert_eq!(lock.raw(), 100 << 16);
            exclusive_inside.store(false, Ordering::SeqCst);
            lock.unlock_exclusive(100);
        }
        stop.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
        assert!(lock.is_idle());
    }
}
