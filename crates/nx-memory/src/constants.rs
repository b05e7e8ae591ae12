//! Address space layout of a 39-bit application process

/// Page size shift (4 KiB pages)
pub const PAGE_BITS: u32 = 12;

/// Page size in bytes
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;

/// Mask of the in-page offset bits
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Width of the guest virtual address space
pub const ADDRESS_SPACE_BITS: u32 = 39;

/// Size of the guest virtual address space (512 GiB)
pub const ADDRESS_SPACE_SIZE: u64 = 1 << ADDRESS_SPACE_BITS;

/// Code region (application image)
pub const CODE_REGION_BASE: u64 = 0x0800_0000;
pub const CODE_REGION_SIZE: u64 = 0x7800_0000;

/// Heap region (svcSetHeapSize)
pub const HEAP_REGION_BASE: u64 = 0x0_8000_0000;
pub const HEAP_REGION_SIZE: u64 = 0x1_8000_0000;

/// Heap sizes must be a multiple of this
pub const HEAP_SIZE_ALIGNMENT: u64 = 0x20_0000;

/// Alias region
pub const ALIAS_REGION_BASE: u64 = 0x2_0000_0000;
pub const ALIAS_REGION_SIZE: u64 = 0x10_0000_0000;

/// Thread stacks
pub const STACK_REGION_BASE: u64 = 0x12_0000_0000;
pub const STACK_REGION_SIZE: u64 = 0x8000_0000;

/// Thread-local storage pages
pub const TLS_REGION_BASE: u64 = 0x12_8000_0000;
pub const TLS_REGION_SIZE: u64 = 0x1000_0000;

/// Bytes of TLS owned by each thread (TPIDRRO_EL0 points here)
pub const TLS_ENTRY_SIZE: u64 = 0x200;
