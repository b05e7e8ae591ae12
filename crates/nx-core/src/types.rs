//! Shared guest-side primitive types

/// Virtual address in guest memory.
pub type VAddr = u64;

/// Kernel process identifier.
pub type ProcessId = u64;

/// Kernel thread identifier.
pub type ThreadId = u64;

/// Kernel object handle as seen by guest code.
pub type Handle = u32;

/// Index of an emulated CPU core (0..N-1).
pub type CoreIndex = usize;

/// Number of CPU cores on the emulated console.
pub const NUM_CPU_CORES: usize = 4;
