//! Guest memory access interface
//!
//! This is the contract the execution engine calls into from inside a
//! translator run. Implementors only provide the four block primitives; the
//! fixed-width accessors are derived from them. All multi-byte values are
//! little-endian, matching AArch64.
//!
//! Accessors never fail loudly: a read of unmapped memory yields 0 and a
//! rejected write yields `false`. Guest code discovered speculatively must not
//! be able to take the host down.

use crate::pages::PageFlags;
use nx_core::VAddr;

macro_rules! fixed_width_accessors {
    ($($ty:ty => $read:ident, $write:ident, $write_exclusive:ident;)*) => {
        $(
            #[inline]
            fn $read(&self, addr: VAddr) -> $ty {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                if self.read_block(addr, &mut buf) {
                    <$ty>::from_le_bytes(buf)
                } else {
                    0
                }
            }

            #[inline]
            fn $write(&self, addr: VAddr, value: $ty) -> bool {
                self.write_block(addr, &value.to_le_bytes())
            }

            /// Commit `value` only if memory still holds `expected`.
            #[inline]
            fn $write_exclusive(&self, addr: VAddr, value: $ty, expected: $ty) -> bool {
                self.compare_exchange_block(addr, &expected.to_le_bytes(), &value.to_le_bytes())
            }
        )*
    };
}

/// Byte-addressable guest memory shared by every core of a process.
///
/// Implementations own their locking. `compare_exchange_block` must be atomic
/// with respect to every `write_block` and every other
/// `compare_exchange_block` on the same bytes.
pub trait GuestMemory: Send + Sync {
    /// Copy guest bytes into `buf`. Returns `false` without touching `buf`
    /// if any byte is unmapped or unreadable.
    fn read_block(&self, addr: VAddr, buf: &mut [u8]) -> bool;

    /// Copy `data` into guest memory. Returns `false` without writing
    /// anything if any byte is unmapped or read-only.
    fn write_block(&self, addr: VAddr, data: &[u8]) -> bool;

    /// Write `new` iff the bytes at `addr` currently equal `expected`.
    fn compare_exchange_block(&self, addr: VAddr, expected: &[u8], new: &[u8]) -> bool;

    /// Protection of the page containing `addr`, `None` if unmapped.
    fn page_flags(&self, addr: VAddr) -> Option<PageFlags>;

    /// True for mapped pages that cannot be written.
    fn is_read_only(&self, addr: VAddr) -> bool {
        matches!(self.page_flags(addr), Some(flags) if !flags.contains(PageFlags::WRITE))
    }

    /// True for mapped pages holding guest code.
    fn is_executable(&self, addr: VAddr) -> bool {
        matches!(self.page_flags(addr), Some(flags) if flags.contains(PageFlags::EXECUTE))
    }

    fixed_width_accessors! {
        u8 => read_8, write_8, write_exclusive_8;
        u16 => read_16, write_16, write_exclusive_16;
        u32 => read_32, write_32, write_exclusive_32;
        u64 => read_64, write_64, write_exclusive_64;
        u128 => read_128, write_128, write_exclusive_128;
    }
}
