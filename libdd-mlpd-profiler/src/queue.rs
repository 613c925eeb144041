// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::semaphore::Semaphore;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Multi-producer queue drained by one background thread.
#[derive(Debug)]
pub(crate) struct WorkQueue<T> {
    entries: SegQueue<T>,
    ready: Semaphore,
    running: AtomicBool,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            entries: SegQueue::new(),
            ready: Semaphore::default(),
            running: AtomicBool::new(true),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn push(&self, entry: T) {
        self.entries.push(entry);
        self.ready.post();
    }

    pub fn pop(&self) -> Option<T> {
        self.entries.pop()
    }

    pub fn wait(&self) {
        self.ready.wait();
    }

    /// Returns false when nothing was posted within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.ready.wait_timeout(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Makes the consumer leave its loop and drain what is left.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.ready.post();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn consumer_drains_after_stop() {
        let queue = Arc::new(WorkQueue::default());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while queue.is_running() {
                    queue.wait();
                    if let Some(entry) = queue.pop() {
                        seen.push(entry);
                    }
                }
                while let Some(entry) = queue.pop() {
                    seen.push(entry);
                }
                seen
            })
        };
        for i in 0..100 {
            queue.push(i);
        }
        queue.stop();
        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert_eq!(queue.len(), 0);
    }
}
