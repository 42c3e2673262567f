// SPDX-License-Identifier: GPL-2.0
//
// Monotonic time source behind a trait so deadline arithmetic stays
// deterministic under test and during stream replay.

use std::sync::atomic::{AtomicI64, Ordering};

use nix::time::{clock_gettime, ClockId};

pub const NSEC_PER_SEC: i64 = 1_000_000_000;

pub trait MonotonicClock: Send + Sync {
    /// Current monotonic time in nanoseconds.
    fn now_ns(&self) -> i64;
}

/// CLOCK_MONOTONIC wrapper used in production.
#[derive(Debug, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now_ns(&self) -> i64 {
        // CLOCK_MONOTONIC is always available on a running kernel.
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)
            .expect("clock_gettime(CLOCK_MONOTONIC) failed");
        ts.tv_sec() * NSEC_PER_SEC + ts.tv_nsec()
    }
}

/// Externally driven clock. Tests set it directly; replay mode advances it
/// from the timestamps carried by the event stream.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(start_ns),
        }
    }

    pub fn set_ns(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::Relaxed);
    }

    pub fn advance_ns(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::Relaxed);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::Relaxed)
    }
}
