//! Page flags and alignment helpers

use crate::constants::PAGE_SIZE;
use bitflags::bitflags;

bitflags! {
    /// Page protection flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Page is readable
        const READ    = 0b0000_0001;
        /// Page is writable
        const WRITE   = 0b0000_0010;
        /// Page is executable
        const EXECUTE = 0b0000_0100;

        /// Read and write access
        const RW  = Self::READ.bits() | Self::WRITE.bits();
        /// Read, write, and execute access
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
        /// Read and execute access
        const RX  = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Check if address is page aligned
pub fn is_page_aligned(addr: u64) -> bool {
    addr % PAGE_SIZE == 0
}

/// Align address down to a page boundary
pub fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

/// Align size up to a page boundary, `None` on overflow
pub fn page_align_up(size: u64) -> Option<u64> {
    size.checked_add(PAGE_SIZE - 1).map(|s| s & !(PAGE_SIZE - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert!(is_page_aligned(0x8000));
        assert!(!is_page_aligned(0x8001));
        assert_eq!(page_align_down(0x1fff), 0x1000);
        assert_eq!(page_align_up(1), Some(0x1000));
        assert_eq!(page_align_up(0x1000), Some(0x1000));
        assert_eq!(page_align_up(u64::MAX), None);
    }

    #[test]
    fn test_composite_flags() {
        assert!(PageFlags::RWX.contains(PageFlags::RX));
        assert!(!PageFlags::RX.contains(PageFlags::WRITE));
        assert_eq!(PageFlags::default(), PageFlags::empty());
    }
}
