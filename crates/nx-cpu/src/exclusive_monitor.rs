//! Exclusive monitor for LDXR/STXR style atomics
//!
//! One monitor serves every core of a system. Each core holds at most one
//! reservation: the address, width and value observed by its last exclusive
//! read. An exclusive write commits through
//! [`GuestMemory::compare_exchange_block`] against that value, so any store
//! that changed memory in between makes it fail.
//!
//! All reservation updates happen under a single lock. Plain stores issued by
//! a core while any reservation is live are routed through
//! [`ExclusiveMonitor::guarded_store`], which takes the same lock and breaks
//! the reservations of other cores on the written bytes. Stores the OS layer
//! makes on the guest's behalf use [`ExclusiveMonitor::external_store`].

use nx_core::{CoreIndex, VAddr};
use nx_memory::GuestMemory;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    addr: VAddr,
    size: u64,
    value: u64,
}

impl Reservation {
    fn overlaps(&self, addr: VAddr, size: u64) -> bool {
        self.addr < addr.saturating_add(size) && addr < self.addr.saturating_add(self.size)
    }
}

macro_rules! exclusive_accessors {
    ($($ty:ty => $read:ident, $write:ident, $mem_read:ident, $mem_write:ident;)*) => {
        $(
            /// Read and reserve `addr` for `core`
            pub fn $read(&self, core: CoreIndex, addr: VAddr) -> $ty {
                let mut table = self.reservations.lock();
                let value = self.memory.$mem_read(addr);
                self.reserve(&mut table, core, addr, std::mem::size_of::<$ty>() as u64, value as u64);
                value
            }

            /// Commit `value` if `core` still holds a reservation on `addr`
            /// and memory still holds the reserved value
            pub fn $write(&self, core: CoreIndex, addr: VAddr, value: $ty) -> bool {
                let size = std::mem::size_of::<$ty>() as u64;
                let mut table = self.reservations.lock();
                let Some(expected) = self.take_reservation(&mut table, core, addr, size) else {
                    return false;
                };
                let committed = self.memory.$mem_write(addr, value, expected as $ty);
                if committed {
                    self.break_reservations(&mut table, Some(core), addr, size);
                }
                committed
            }
        )*
    };
}

/// Per-system reservation table
pub struct ExclusiveMonitor {
    memory: Arc<dyn GuestMemory>,
    reservations: Mutex<Vec<Option<Reservation>>>,
    /// Number of `Some` entries in `reservations`
    active: AtomicUsize,
}

impl ExclusiveMonitor {
    pub fn new(memory: Arc<dyn GuestMemory>, core_count: usize) -> Self {
        Self {
            memory,
            reservations: Mutex::new(vec![None; core_count]),
            active: AtomicUsize::new(0),
        }
    }

    /// Number of cores this monitor tracks
    pub fn core_count(&self) -> usize {
        self.reservations.lock().len()
    }

    /// Check if `core` currently holds a reservation
    pub fn is_reserved(&self, core: CoreIndex) -> bool {
        matches!(self.reservations.lock().get(core), Some(Some(_)))
    }

    /// Drop `core`'s reservation unconditionally
    pub fn clear_exclusive(&self, core: CoreIndex) {
        if self.active.load(Ordering::Acquire) == 0 {
            return;
        }
        let mut table = self.reservations.lock();
        if let Some(slot) = table.get_mut(core) {
            if slot.take().is_some() {
                self.active.fetch_sub(1, Ordering::Release);
            }
        }
    }

    exclusive_accessors! {
        u8 => exclusive_read_8, exclusive_write_8, read_8, write_exclusive_8;
        u16 => exclusive_read_16, exclusive_write_16, read_16, write_exclusive_16;
        u32 => exclusive_read_32, exclusive_write_32, read_32, write_exclusive_32;
        u64 => exclusive_read_64, exclusive_write_64, read_64, write_exclusive_64;
    }

    /// Perform a plain store for `core` and break every other core's
    /// reservation on the written bytes.
    pub fn guarded_store<F>(&self, core: CoreIndex, addr: VAddr, size: u64, store: F) -> bool
    where
        F: FnOnce(&dyn GuestMemory) -> bool,
    {
        self.store_and_break(Some(core), addr, size, store)
    }

    /// Perform a store issued by the host on the guest's behalf and break
    /// every reservation on the written bytes, the issuing core's included
    pub fn external_store<F>(&self, addr: VAddr, size: u64, store: F) -> bool
    where
        F: FnOnce(&dyn GuestMemory) -> bool,
    {
        self.store_and_break(None, addr, size, store)
    }

    fn store_and_break<F>(&self, writer: Option<CoreIndex>, addr: VAddr, size: u64, store: F) -> bool
    where
        F: FnOnce(&dyn GuestMemory) -> bool,
    {
        // Lock-free when nothing is reserved. A reservation taken while this
        // store runs is only protected by the value compare on commit, so a
        // write of the value it observed (A -> B -> A) is not detected.
        if self.active.load(Ordering::Acquire) == 0 {
            return store(self.memory.as_ref());
        }
        let mut table = self.reservations.lock();
        let stored = store(self.memory.as_ref());
        if stored {
            self.break_reservations(&mut table, writer, addr, size);
        }
        stored
    }

    fn reserve(
        &self,
        table: &mut [Option<Reservation>],
        core: CoreIndex,
        addr: VAddr,
        size: u64,
        value: u64,
    ) {
        let Some(slot) = table.get_mut(core) else {
            tracing::error!("Exclusive read from core {} outside the monitor's range", core);
            return;
        };
        if slot.is_none() {
            self.active.fetch_add(1, Ordering::Release);
        }
        *slot = Some(Reservation { addr, size, value });
    }

    fn take_reservation(
        &self,
        table: &mut [Option<Reservation>],
        core: CoreIndex,
        addr: VAddr,
        size: u64,
    ) -> Option<u64> {
        let reservation = table.get_mut(core)?.take()?;
        self.active.fetch_sub(1, Ordering::Release);
        (reservation.addr == addr && reservation.size == size).then_some(reservation.value)
    }

    fn break_reservations(
        &self,
        table: &mut [Option<Reservation>],
        writer: Option<CoreIndex>,
        addr: VAddr,
        size: u64,
    ) {
        for (core, slot) in table.iter_mut().enumerate() {
            if Some(core) == writer {
                continue;
            }
            if matches!(slot, Some(r) if r.overlaps(addr, size)) {
                *slot = None;
                self.active.fetch_sub(1, Ordering::Release);
                tracing::trace!("Store by {:?} broke core {}'s reservation at 0x{:x}", writer, core, addr);
            }
        }
    }
}
