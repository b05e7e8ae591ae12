//! Core timing
//!
//! Guest time is derived from the host monotonic clock, expressed in ticks of
//! the console's base clock. `CNTPCT_EL0` and `GetSystemTick` are scaled
//! down from it by [`nx_cpu::host_ticks_to_cntpct`].

use nx_cpu::{host_ticks_to_cntpct, BASE_CLOCK_RATE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Monotonic tick source shared by the kernel and the run loops
#[derive(Debug)]
pub struct CoreTiming {
    start: Instant,
    /// Ticks added on top of the host clock
    skew: AtomicU64,
}

impl Default for CoreTiming {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreTiming {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            skew: AtomicU64::new(0),
        }
    }

    /// Base-clock ticks elapsed since this timer was created
    pub fn ticks(&self) -> u64 {
        let nanos = self.start.elapsed().as_nanos();
        let host = (nanos * BASE_CLOCK_RATE as u128 / NANOS_PER_SECOND).min(u64::MAX as u128) as u64;
        host.saturating_add(self.skew.load(Ordering::Relaxed))
    }

    /// Guest-visible counter value
    pub fn cntpct(&self) -> u64 {
        host_ticks_to_cntpct(self.ticks())
    }

    /// Move guest time forward without waiting
    pub fn advance(&self, ticks: u64) {
        self.skew.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Deadline `ns` nanoseconds from now, in ticks
    pub fn deadline_after_ns(&self, ns: u64) -> u64 {
        self.ticks().saturating_add(ns_to_ticks(ns))
    }

    /// Host time remaining until `deadline`, zero once it has passed
    pub fn until(&self, deadline: u64) -> Duration {
        Duration::from_nanos(ticks_to_ns(deadline.saturating_sub(self.ticks())))
    }
}

pub fn ns_to_ticks(ns: u64) -> u64 {
    (ns as u128 * BASE_CLOCK_RATE as u128 / NANOS_PER_SECOND).min(u64::MAX as u128) as u64
}

pub fn ticks_to_ns(ticks: u64) -> u64 {
    (ticks as u128 * NANOS_PER_SECOND / BASE_CLOCK_RATE as u128).min(u64::MAX as u128) as u64
}
