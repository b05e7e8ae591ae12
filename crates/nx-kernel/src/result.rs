//! Horizon result codes
//!
//! A result packs a 9-bit module and a 13-bit description. Zero is success.
//! Supervisor calls return one in `W0`.

use nx_core::error::{KernelError, MemoryError};
use std::fmt;

/// Module number of the kernel
pub const MODULE_KERNEL: u32 = 1;

/// Raw Horizon result value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);

    pub const fn new(module: u32, description: u32) -> Self {
        Self((module & 0x1FF) | ((description & 0x1FFF) << 9))
    }

    pub const fn module(self) -> u32 {
        self.0 & 0x1FF
    }

    pub const fn description(self) -> u32 {
        (self.0 >> 9) & 0x1FFF
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

pub const NOT_IMPLEMENTED: ResultCode = ResultCode::new(MODULE_KERNEL, 33);
pub const INVALID_SIZE: ResultCode = ResultCode::new(MODULE_KERNEL, 101);
pub const INVALID_ADDRESS: ResultCode = ResultCode::new(MODULE_KERNEL, 102);
pub const OUT_OF_RESOURCE: ResultCode = ResultCode::new(MODULE_KERNEL, 103);
pub const OUT_OF_MEMORY: ResultCode = ResultCode::new(MODULE_KERNEL, 104);
pub const HANDLE_TABLE_FULL: ResultCode = ResultCode::new(MODULE_KERNEL, 105);
pub const INVALID_MEMORY_STATE: ResultCode = ResultCode::new(MODULE_KERNEL, 106);
pub const INVALID_MEMORY_RANGE: ResultCode = ResultCode::new(MODULE_KERNEL, 110);
pub const INVALID_PRIORITY: ResultCode = ResultCode::new(MODULE_KERNEL, 112);
pub const INVALID_CORE_ID: ResultCode = ResultCode::new(MODULE_KERNEL, 113);
pub const INVALID_HANDLE: ResultCode = ResultCode::new(MODULE_KERNEL, 114);
pub const INVALID_POINTER: ResultCode = ResultCode::new(MODULE_KERNEL, 115);
pub const INVALID_COMBINATION: ResultCode = ResultCode::new(MODULE_KERNEL, 116);
pub const TIMED_OUT: ResultCode = ResultCode::new(MODULE_KERNEL, 117);
pub const OUT_OF_RANGE: ResultCode = ResultCode::new(MODULE_KERNEL, 119);
pub const INVALID_ENUM_VALUE: ResultCode = ResultCode::new(MODULE_KERNEL, 120);
pub const NOT_FOUND: ResultCode = ResultCode::new(MODULE_KERNEL, 121);
pub const INVALID_STATE: ResultCode = ResultCode::new(MODULE_KERNEL, 125);

impl From<&KernelError> for ResultCode {
    fn from(error: &KernelError) -> Self {
        match error {
            KernelError::UnknownSyscall(_) => NOT_IMPLEMENTED,
            KernelError::InvalidHandle(_) | KernelError::InvalidThreadId(_) => INVALID_HANDLE,
            KernelError::InvalidPriority(_) => INVALID_PRIORITY,
            KernelError::InvalidCoreId(_) => INVALID_CORE_ID,
            KernelError::ProcessNotFound(_) => NOT_FOUND,
            KernelError::ResourceLimit => OUT_OF_RESOURCE,
            KernelError::InvalidState(_) => INVALID_STATE,
            KernelError::InvalidSize(_) => INVALID_SIZE,
            KernelError::InvalidAddress(_) => INVALID_ADDRESS,
            KernelError::InvalidEnumValue(_) => INVALID_ENUM_VALUE,
            KernelError::InvalidCombination => INVALID_COMBINATION,
            KernelError::Memory(MemoryError::OutOfMemory) => OUT_OF_MEMORY,
            KernelError::Memory(MemoryError::InvalidSize(_)) => INVALID_SIZE,
            KernelError::Memory(MemoryError::AlreadyMapped(_)) => INVALID_MEMORY_STATE,
            KernelError::Memory(_) => INVALID_MEMORY_RANGE,
        }
    }
}

impl From<KernelError> for ResultCode {
    fn from(error: KernelError) -> Self {
        Self::from(&error)
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "ResultCode::SUCCESS")
        } else {
            write!(
                f,
                "ResultCode(module={}, desc={}, raw=0x{:x})",
                self.module(),
                self.description(),
                self.0
            )
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}", 2000 + self.module(), self.description())
    }
}
