//! Cross-core translated-code invalidation
//!
//! A store to an executable page on one core has to reach the block caches of
//! every core. Writers publish the range here; each core drains its own queue
//! at block boundaries and at the start of `execute()`.

use nx_core::{CoreIndex, VAddr, NUM_CPU_CORES};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct CoreQueue {
    registered: AtomicBool,
    pending: AtomicBool,
    ranges: Mutex<Vec<(VAddr, u64)>>,
}

/// Per-core queues of code ranges waiting to be invalidated
pub struct InvalidationBus {
    queues: Vec<CoreQueue>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self {
            queues: (0..NUM_CPU_CORES).map(|_| CoreQueue::default()).collect(),
        }
    }

    /// Start delivering invalidations to `core`
    pub fn register(&self, core: CoreIndex) {
        if let Some(queue) = self.queues.get(core) {
            queue.registered.store(true, Ordering::Release);
        }
    }

    /// Stop delivering invalidations to `core` and drop anything queued
    pub fn unregister(&self, core: CoreIndex) {
        if let Some(queue) = self.queues.get(core) {
            queue.registered.store(false, Ordering::Release);
            queue.pending.store(false, Ordering::Release);
            queue.ranges.lock().clear();
        }
    }

    /// Queue `[addr, addr + size)` for every registered core
    pub fn publish(&self, addr: VAddr, size: u64) {
        for core in 0..self.queues.len() {
            self.publish_to(core, addr, size);
        }
    }

    /// Queue `[addr, addr + size)` for a single core
    pub fn publish_to(&self, core: CoreIndex, addr: VAddr, size: u64) {
        let Some(queue) = self.queues.get(core) else {
            return;
        };
        if !queue.registered.load(Ordering::Acquire) {
            return;
        }
        queue.ranges.lock().push((addr, size));
        queue.pending.store(true, Ordering::Release);
    }

    /// Drain the ranges queued for `core`
    pub fn take(&self, core: CoreIndex) -> Vec<(VAddr, u64)> {
        let Some(queue) = self.queues.get(core) else {
            return Vec::new();
        };
        if !queue.pending.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        std::mem::take(&mut *queue.ranges.lock())
    }
}
