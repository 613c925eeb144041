// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use nix::time::{clock_gettime, ClockId};
use std::time::{SystemTime, UNIX_EPOCH};

const OVERHEAD_SAMPLES: u64 = 256;

/// Monotonic clock in nanoseconds. Every event timestamp comes from here.
pub fn now_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => (ts.tv_sec() as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(ts.tv_nsec() as u64),
        // CLOCK_MONOTONIC is always available on the platforms we run on.
        Err(_) => 0,
    }
}

/// Wall clock in milliseconds since the epoch.
pub fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() * 1000)
        .unwrap_or(0)
}

/// Mean cost of one [`now_ns`] call, in nanoseconds.
pub fn timer_overhead() -> u32 {
    let start = now_ns();
    for _ in 0..OVERHEAD_SAMPLES {
        std::hint::black_box(now_ns());
    }
    let elapsed = now_ns().saturating_sub(start);
    (elapsed / OVERHEAD_SAMPLES).min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn wall_clock_is_whole_seconds() {
        assert_eq!(wall_ms() % 1000, 0);
        assert!(wall_ms() > 1_600_000_000_000);
    }
}
