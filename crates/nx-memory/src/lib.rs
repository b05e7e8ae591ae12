//! Guest memory for the oxidized-nx emulator
//!
//! This crate provides the guest memory access interface the CPU core calls
//! into, and a page-table backed 39-bit address space that implements it.

pub mod address_space;
pub mod constants;
pub mod guest;
pub mod pages;

pub use address_space::{AddressSpace, MemoryRegion};
pub use constants::*;
pub use guest::GuestMemory;
pub use pages::PageFlags;
