//! Guest thread scheduler
//!
//! Priorities run from 0 (highest) to 63 (lowest). Threads of equal priority
//! are served first-in first-out, and each thread may only be picked by the
//! cores in its affinity mask. Sleeping threads sit in a deadline heap and
//! rejoin the back of their ready queue once [`Scheduler::wake_expired`]
//! passes their deadline.
//!
//! The scheduler only tracks ordering. Saving and restoring register state is
//! the run loop's job, so a thread is handed back here (yield, sleep, exit)
//! only after its context has been stored.

use nx_core::error::KernelError;
use nx_core::{CoreIndex, ThreadId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

/// Number of distinct thread priorities
pub const PRIORITY_COUNT: usize = 64;

/// Numerically largest (least urgent) priority
pub const LOWEST_PRIORITY: u32 = PRIORITY_COUNT as u32 - 1;

/// Where a thread is in its scheduling life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingState {
    /// Waiting in its priority queue
    Ready,
    /// Owned by a core's run loop
    Running(CoreIndex),
    /// Parked until the given tick
    Sleeping(u64),
}

#[derive(Debug, Clone)]
struct ScheduledThread {
    priority: u32,
    core_mask: u64,
    state: SchedulingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sleeper {
    deadline: u64,
    seq: u64,
    id: ThreadId,
}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest deadline first out of the max-heap
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority scheduler shared by every core of a system
pub struct Scheduler {
    /// One FIFO per priority level
    ready: Vec<VecDeque<ThreadId>>,
    /// Every thread that has been started and not yet exited
    threads: HashMap<ThreadId, ScheduledThread>,
    /// Sleeping threads ordered by wake-up tick
    sleepers: BinaryHeap<Sleeper>,
    seq: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            ready: (0..PRIORITY_COUNT).map(|_| VecDeque::new()).collect(),
            threads: HashMap::new(),
            sleepers: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Queue a newly started thread behind its priority peers
    pub fn add_thread(
        &mut self,
        id: ThreadId,
        priority: u32,
        core_mask: u64,
    ) -> Result<(), KernelError> {
        if priority > LOWEST_PRIORITY {
            return Err(KernelError::InvalidPriority(priority));
        }
        if core_mask == 0 {
            return Err(KernelError::InvalidCombination);
        }
        if self.threads.contains_key(&id) {
            return Err(KernelError::InvalidState(format!(
                "thread {} is already scheduled",
                id
            )));
        }

        self.threads.insert(
            id,
            ScheduledThread {
                priority,
                core_mask,
                state: SchedulingState::Ready,
            },
        );
        self.ready[priority as usize].push_back(id);

        tracing::debug!(
            "Added thread {} with priority {} (core mask 0x{:x})",
            id,
            priority,
            core_mask
        );
        Ok(())
    }

    /// Forget a thread. Returns whether it was scheduled.
    pub fn remove_thread(&mut self, id: ThreadId) -> bool {
        let Some(thread) = self.threads.remove(&id) else {
            return false;
        };
        if thread.state == SchedulingState::Ready {
            self.ready[thread.priority as usize].retain(|&t| t != id);
        }
        tracing::debug!("Removed thread {}", id);
        true
    }

    /// Hand the most urgent ready thread that may run on `core` to that core
    pub fn next(&mut self, core: CoreIndex) -> Option<ThreadId> {
        let bit = 1u64 << core;
        for queue in self.ready.iter_mut() {
            let Some(position) = queue.iter().position(|id| {
                self.threads
                    .get(id)
                    .is_some_and(|thread| thread.core_mask & bit != 0)
            }) else {
                continue;
            };
            let id = queue.remove(position)?;
            if let Some(thread) = self.threads.get_mut(&id) {
                thread.state = SchedulingState::Running(core);
            }
            tracing::trace!("Scheduled thread {} on core {}", id, core);
            return Some(id);
        }
        None
    }

    /// Return a running thread to the back of its ready queue
    pub fn yield_thread(&mut self, id: ThreadId) {
        if let Some(thread) = self.threads.get_mut(&id) {
            if matches!(thread.state, SchedulingState::Running(_)) {
                thread.state = SchedulingState::Ready;
                self.ready[thread.priority as usize].push_back(id);
                tracing::trace!("Thread {} yielded", id);
            }
        }
    }

    /// Park a running thread until `deadline`
    pub fn sleep_thread(&mut self, id: ThreadId, deadline: u64) {
        if let Some(thread) = self.threads.get_mut(&id) {
            if matches!(thread.state, SchedulingState::Running(_)) {
                thread.state = SchedulingState::Sleeping(deadline);
                self.seq += 1;
                self.sleepers.push(Sleeper {
                    deadline,
                    seq: self.seq,
                    id,
                });
                tracing::trace!("Thread {} sleeping until tick {}", id, deadline);
            }
        }
    }

    /// Make every sleeper whose deadline is at or before `now` ready again.
    /// Returns how many woke.
    pub fn wake_expired(&mut self, now: u64) -> usize {
        let mut woken = 0;
        while let Some(sleeper) = self.sleepers.peek().copied() {
            if sleeper.deadline > now {
                break;
            }
            self.sleepers.pop();

            // Stale entries belong to threads that were removed or re-slept
            if let Some(thread) = self.threads.get_mut(&sleeper.id) {
                if thread.state == SchedulingState::Sleeping(sleeper.deadline) {
                    thread.state = SchedulingState::Ready;
                    self.ready[thread.priority as usize].push_back(sleeper.id);
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Earliest pending wake-up tick
    pub fn next_deadline(&self) -> Option<u64> {
        self.sleepers.peek().map(|sleeper| sleeper.deadline)
    }

    pub fn set_priority(&mut self, id: ThreadId, priority: u32) -> Result<(), KernelError> {
        if priority > LOWEST_PRIORITY {
            return Err(KernelError::InvalidPriority(priority));
        }
        let thread = self
            .threads
            .get_mut(&id)
            .ok_or(KernelError::InvalidThreadId(id))?;

        if thread.state == SchedulingState::Ready && thread.priority != priority {
            self.ready[thread.priority as usize].retain(|&t| t != id);
            self.ready[priority as usize].push_back(id);
        }
        thread.priority = priority;
        tracing::debug!("Thread {} priority changed to {}", id, priority);
        Ok(())
    }

    pub fn priority(&self, id: ThreadId) -> Option<u32> {
        self.threads.get(&id).map(|thread| thread.priority)
    }

    pub fn state(&self, id: ThreadId) -> Option<SchedulingState> {
        self.threads.get(&id).map(|thread| thread.state)
    }

    /// Number of live scheduled threads
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.iter().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CORES: u64 = 0b1111;

    #[test]
    fn test_priority_order() {
        let mut scheduler = Scheduler::new();
        scheduler.add_thread(1, 44, ALL_CORES).unwrap();
        scheduler.add_thread(2, 10, ALL_CORES).unwrap();
        scheduler.add_thread(3, 63, ALL_CORES).unwrap();

        assert_eq!(scheduler.next(0), Some(2));
        assert_eq!(scheduler.next(0), Some(1));
        assert_eq!(scheduler.next(0), Some(3));
        assert_eq!(scheduler.next(0), None);
        assert_eq!(scheduler.state(1), Some(SchedulingState::Running(0)));
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut scheduler = Scheduler::new();
        for id in 1..=3 {
            scheduler.add_thread(id, 44, ALL_CORES).unwrap();
        }

        let first = scheduler.next(0).unwrap();
        assert_eq!(first, 1);
        scheduler.yield_thread(first);
        assert_eq!(scheduler.next(0), Some(2));
        assert_eq!(scheduler.next(0), Some(3));
        assert_eq!(scheduler.next(0), Some(1));
    }

    #[test]
    fn test_core_mask() {
        let mut scheduler = Scheduler::new();
        scheduler.add_thread(1, 0, 0b0100).unwrap();
        scheduler.add_thread(2, 30, ALL_CORES).unwrap();

        assert_eq!(scheduler.next(0), Some(2));
        assert_eq!(scheduler.next(1), None);
        assert_eq!(scheduler.next(2), Some(1));
    }

    #[test]
    fn test_sleep_and_wake() {
        let mut scheduler = Scheduler::new();
        scheduler.add_thread(1, 20, ALL_CORES).unwrap();
        scheduler.add_thread(2, 20, ALL_CORES).unwrap();
        let a = scheduler.next(0).unwrap();
        let b = scheduler.next(1).unwrap();

        scheduler.sleep_thread(a, 500);
        scheduler.sleep_thread(b, 100);
        assert_eq!(scheduler.next_deadline(), Some(100));
        assert_eq!(scheduler.next(0), None);

        assert_eq!(scheduler.wake_expired(99), 0);
        assert_eq!(scheduler.wake_expired(100), 1);
        assert_eq!(scheduler.next(0), Some(b));
        assert_eq!(scheduler.wake_expired(1_000), 1);
        assert_eq!(scheduler.state(a), Some(SchedulingState::Ready));
    }

    #[test]
    fn test_removed_sleeper_does_not_wake() {
        let mut scheduler = Scheduler::new();
        scheduler.add_thread(7, 20, ALL_CORES).unwrap();
        let id = scheduler.next(0).unwrap();
        scheduler.sleep_thread(id, 10);
        assert!(scheduler.remove_thread(id));

        assert_eq!(scheduler.wake_expired(20), 0);
        assert_eq!(scheduler.ready_count(), 0);
        assert_eq!(scheduler.thread_count(), 0);
    }

    #[test]
    fn test_set_priority_requeues_ready_thread() {
        let mut scheduler = Scheduler::new();
        scheduler.add_thread(1, 30, ALL_CORES).unwrap();
        scheduler.add_thread(2, 40, ALL_CORES).unwrap();

        scheduler.set_priority(2, 5).unwrap();
        assert_eq!(scheduler.priority(2), Some(5));
        assert_eq!(scheduler.next(0), Some(2));

        assert_eq!(
            scheduler.set_priority(1, 64),
            Err(KernelError::InvalidPriority(64))
        );
        assert_eq!(
            scheduler.set_priority(99, 1),
            Err(KernelError::InvalidThreadId(99))
        );
    }

    #[test]
    fn test_add_rejects_bad_arguments() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.add_thread(1, 64, ALL_CORES).is_err());
        assert!(scheduler.add_thread(1, 0, 0).is_err());
        scheduler.add_thread(1, 0, ALL_CORES).unwrap();
        assert!(scheduler.add_thread(1, 0, ALL_CORES).is_err());
    }
}
