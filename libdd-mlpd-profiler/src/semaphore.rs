// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Counting semaphore waking the background threads when their queue gains an entry.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    pub fn post(&self) {
        *self.count.lock() += 1;
        self.available.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Returns false when `timeout` elapsed without a post.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        while *count == 0 {
            if self.available.wait_for(&mut count, timeout).timed_out() {
                if *count == 0 {
                    return false;
                }
                break;
            }
        }
        *count -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn times_out_without_posts() {
        let sem = Semaphore::default();
        assert!(!sem.wait_timeout(Duration::from_millis(10)));
        sem.post();
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(10)));
        sem.wait();
        assert!(!sem.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn wakes_waiters() {
        let sem = Arc::new(Semaphore::default());
        let waiter = {
            let sem = sem.clone();
            std::thread::spawn(move || sem.wait())
        };
        sem.post();
        waiter.join().unwrap();
    }
}
