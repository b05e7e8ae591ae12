//! Error types for the oxidized-nx emulator
//!
//! Guest-data conditions (unmapped reads, failed store-exclusives, bogus
//! syscall numbers) never surface here; they are resolved through the guest
//! ABI. Everything in this module is a host-side condition.

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    #[error("Host thread failed: {0}")]
    HostThread(String),
}

/// Memory-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Invalid address: 0x{0:016x}")]
    InvalidAddress(u64),

    #[error("Access violation at 0x{addr:016x}: {kind}")]
    AccessViolation { addr: u64, kind: AccessKind },

    #[error("Alignment error: address 0x{addr:016x} not aligned to {align}")]
    AlignmentError { addr: u64, align: u64 },

    #[error("Region at 0x{0:016x} is already mapped")]
    AlreadyMapped(u64),

    #[error("Invalid size: 0x{0:x}")]
    InvalidSize(u64),
}

/// Execution engine errors.
///
/// Every variant is fatal for the `execute()` call that produced it: the
/// affected core moves to the stopped state and must not be resumed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    #[error("Invalid register {register} for {width}-bit access")]
    InvalidRegister { register: String, width: u32 },

    #[error("Unknown translator halt reason: 0x{0:08x}")]
    UnknownHaltReason(u32),

    #[error("Unimplemented instruction at 0x{pc:016x}: 0x{opcode:08x}")]
    UnimplementedInstruction { pc: u64, opcode: u32 },

    #[error("Unimplemented cache operation {op} (address 0x{addr:016x}) at 0x{pc:016x}")]
    CacheOperation { pc: u64, op: &'static str, addr: u64 },

    #[error("Unimplemented instruction synchronization barrier at 0x{pc:016x}")]
    InstructionSynchronizationBarrier { pc: u64 },

    #[error("Unhandled guest exception {exception} at 0x{pc:016x}")]
    Exception { pc: u64, exception: &'static str },

    #[error("Unimplemented 128-bit exclusive access at 0x{pc:016x}")]
    ExclusiveAccess128 { pc: u64 },

    #[error("Core {0} is stopped")]
    CoreStopped(usize),

    #[error("Invalid core index: {0}")]
    InvalidCoreIndex(usize),
}

/// Kernel (HLE) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Unknown syscall: 0x{0:x}")]
    UnknownSyscall(u32),

    #[error("Invalid handle: 0x{0:x}")]
    InvalidHandle(u32),

    #[error("Invalid thread ID: {0}")]
    InvalidThreadId(u64),

    #[error("Invalid priority: {0}")]
    InvalidPriority(u32),

    #[error("Invalid core ID: {0}")]
    InvalidCoreId(i32),

    #[error("Process not found: {0}")]
    ProcessNotFound(u64),

    #[error("Resource limit exceeded")]
    ResourceLimit,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid size: 0x{0:x}")]
    InvalidSize(u64),

    #[error("Invalid address: 0x{0:016x}")]
    InvalidAddress(u64),

    #[error("Invalid enum value: {0}")]
    InvalidEnumValue(u32),

    #[error("Invalid combination of arguments")]
    InvalidCombination,

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Loader handoff errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Invalid module: {0}")]
    InvalidModule(String),

    #[error("Segment at offset 0x{offset:x} (size 0x{size:x}) exceeds the 0x{region:x}-byte image")]
    SegmentOutOfBounds { offset: u64, size: u64, region: u64 },

    #[error("No application process has been created")]
    NoApplicationProcess,

    #[error("An application process already exists")]
    ProcessAlreadyCreated,
}

/// Kind of memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;
