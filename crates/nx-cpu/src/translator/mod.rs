//! Translator abstraction
//!
//! A [`Translator`] turns guest code into something runnable and executes it
//! against a [`TranslatorEnv`], the callback table the owning core provides.
//! Every callback re-enters the core on the same host thread while
//! [`Translator::run`] is on the stack.
//!
//! `run` returns at a block boundary once any bit is set on its
//! [`HaltHandle`]. Halt requests are never observed mid-block.

pub mod decoder;
mod exec;
mod interpreter;

pub use interpreter::BlockTranslator;

use crate::registers::{RegisterFile, TlsRegisters};
use bitflags::bitflags;
use nx_core::error::CpuError;
use nx_core::{CoreIndex, VAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

bitflags! {
    /// Reasons a translator run loop returned.
    ///
    /// The low bits are the translator's own; the `USER_DEFINED` bits are
    /// free for the embedding core to assign.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TranslatorHalt: u32 {
        const STEP = 1 << 0;
        const CACHE_INVALIDATION = 1 << 1;
        const MEMORY_ABORT = 1 << 2;
        const USER_DEFINED_1 = 1 << 24;
        const USER_DEFINED_2 = 1 << 25;
        const USER_DEFINED_3 = 1 << 26;
        const USER_DEFINED_4 = 1 << 27;
        const USER_DEFINED_5 = 1 << 28;
        const USER_DEFINED_6 = 1 << 29;
        const USER_DEFINED_7 = 1 << 30;
        const USER_DEFINED_8 = 1 << 31;
    }
}

/// Thread-safe request line into a running translator
#[derive(Debug, Clone, Default)]
pub struct HaltHandle(Arc<AtomicU32>);

impl HaltHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run loop to return at its next block boundary
    pub fn request(&self, reason: TranslatorHalt) {
        self.0.fetch_or(reason.bits(), Ordering::AcqRel);
    }

    /// Bits requested so far
    pub fn pending(&self) -> TranslatorHalt {
        TranslatorHalt::from_bits_retain(self.0.load(Ordering::Acquire))
    }

    /// Consume every pending request
    pub fn take(&self) -> TranslatorHalt {
        TranslatorHalt::from_bits_retain(self.0.swap(0, Ordering::AcqRel))
    }
}

/// Exception classes a translator reports through
/// [`TranslatorEnv::exception_raised`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    UnallocatedEncoding,
    ReservedValue,
    UnpredictableInstruction,
    WaitForInterrupt,
    WaitForEvent,
    SendEvent,
    SendEventLocal,
    Yield,
    Breakpoint,
    NoExecuteFault,
}

impl Exception {
    pub fn name(self) -> &'static str {
        match self {
            Self::UnallocatedEncoding => "UnallocatedEncoding",
            Self::ReservedValue => "ReservedValue",
            Self::UnpredictableInstruction => "UnpredictableInstruction",
            Self::WaitForInterrupt => "WaitForInterrupt",
            Self::WaitForEvent => "WaitForEvent",
            Self::SendEvent => "SendEvent",
            Self::SendEventLocal => "SendEventLocal",
            Self::Yield => "Yield",
            Self::Breakpoint => "Breakpoint",
            Self::NoExecuteFault => "NoExecuteFault",
        }
    }
}

/// `DC` maintenance operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCacheOp {
    ZeroByVa,
    InvalidateByVaToPoc,
    InvalidateBySetWay,
    CleanByVaToPoc,
    CleanBySetWay,
    CleanByVaToPou,
    CleanAndInvalidateByVaToPoc,
    CleanAndInvalidateBySetWay,
}

impl DataCacheOp {
    pub fn name(self) -> &'static str {
        match self {
            Self::ZeroByVa => "DC ZVA",
            Self::InvalidateByVaToPoc => "DC IVAC",
            Self::InvalidateBySetWay => "DC ISW",
            Self::CleanByVaToPoc => "DC CVAC",
            Self::CleanBySetWay => "DC CSW",
            Self::CleanByVaToPou => "DC CVAU",
            Self::CleanAndInvalidateByVaToPoc => "DC CIVAC",
            Self::CleanAndInvalidateBySetWay => "DC CISW",
        }
    }
}

/// `IC` maintenance operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionCacheOp {
    InvalidateAllToPou,
    InvalidateAllToPouInnerShareable,
    InvalidateByVaToPou,
}

impl InstructionCacheOp {
    pub fn name(self) -> &'static str {
        match self {
            Self::InvalidateAllToPou => "IC IALLU",
            Self::InvalidateAllToPouInnerShareable => "IC IALLUIS",
            Self::InvalidateByVaToPou => "IC IVAU",
        }
    }
}

/// Fixed per-core translator settings
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub core_index: CoreIndex,
    /// TPIDR_EL0/TPIDRRO_EL0 storage owned by the core
    pub tls: Arc<TlsRegisters>,
    /// Value reported by CNTFRQ_EL0
    pub cntfrq: u64,
    pub max_block_instructions: usize,
}

/// Callback table a translator drives while running guest code
pub trait TranslatorEnv {
    /// Fetch an instruction word; `None` if `addr` is not executable
    fn read_code(&mut self, addr: VAddr) -> Option<u32>;

    fn read_8(&mut self, addr: VAddr) -> u8;
    fn read_16(&mut self, addr: VAddr) -> u16;
    fn read_32(&mut self, addr: VAddr) -> u32;
    fn read_64(&mut self, addr: VAddr) -> u64;
    fn read_128(&mut self, addr: VAddr) -> u128;

    fn write_8(&mut self, addr: VAddr, value: u8) -> bool;
    fn write_16(&mut self, addr: VAddr, value: u16) -> bool;
    fn write_32(&mut self, addr: VAddr, value: u32) -> bool;
    fn write_64(&mut self, addr: VAddr, value: u64) -> bool;
    fn write_128(&mut self, addr: VAddr, value: u128) -> bool;

    fn exclusive_read_8(&mut self, addr: VAddr) -> u8;
    fn exclusive_read_16(&mut self, addr: VAddr) -> u16;
    fn exclusive_read_32(&mut self, addr: VAddr) -> u32;
    fn exclusive_read_64(&mut self, addr: VAddr) -> u64;
    fn exclusive_read_128(&mut self, pc: u64, addr: VAddr) -> Result<u128, CpuError>;

    fn exclusive_write_8(&mut self, addr: VAddr, value: u8) -> bool;
    fn exclusive_write_16(&mut self, addr: VAddr, value: u16) -> bool;
    fn exclusive_write_32(&mut self, addr: VAddr, value: u32) -> bool;
    fn exclusive_write_64(&mut self, addr: VAddr, value: u64) -> bool;
    fn exclusive_write_128(&mut self, pc: u64, addr: VAddr, value: u128) -> Result<bool, CpuError>;

    fn clear_exclusive(&mut self);

    /// `SVC #number`. `regs.pc` already points past the instruction.
    fn call_supervisor(&mut self, number: u32, regs: &mut RegisterFile) -> Result<(), CpuError>;

    fn exception_raised(&mut self, pc: u64, exception: Exception) -> Result<(), CpuError>;

    fn data_cache_operation(&mut self, pc: u64, op: DataCacheOp, addr: VAddr) -> Result<(), CpuError>;

    fn instruction_cache_operation(
        &mut self,
        pc: u64,
        op: InstructionCacheOp,
        addr: VAddr,
    ) -> Result<(), CpuError>;

    fn instruction_synchronization_barrier(&mut self, pc: u64) -> Result<(), CpuError>;

    /// Called for an instruction the translator does not implement
    fn interpreter_fallback(&mut self, pc: u64, opcode: u32) -> Result<(), CpuError>;

    /// Current CNTPCT_EL0 value
    fn cntpct(&mut self) -> u64;

    /// Code ranges other writers modified since the last call
    fn take_invalidations(&mut self) -> Vec<(VAddr, u64)>;
}

/// Guest code executor owned by exactly one core
pub trait Translator: Send {
    /// Run guest code from `registers().pc` until a halt is requested.
    ///
    /// An `Err` is fatal; the register file is left at the faulting
    /// instruction.
    fn run(&mut self, env: &mut dyn TranslatorEnv) -> Result<TranslatorHalt, CpuError>;

    fn halt_handle(&self) -> HaltHandle;

    /// Drop translated code overlapping `[addr, addr + size)`
    fn invalidate_cache_range(&mut self, addr: VAddr, size: u64);

    fn clear_cache(&mut self);

    fn registers(&self) -> &RegisterFile;

    fn registers_mut(&mut self) -> &mut RegisterFile;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_handle_accumulates_and_clears() {
        let handle = HaltHandle::new();
        let remote = handle.clone();

        remote.request(TranslatorHalt::USER_DEFINED_1);
        remote.request(TranslatorHalt::USER_DEFINED_2);
        assert_eq!(
            handle.pending(),
            TranslatorHalt::USER_DEFINED_1 | TranslatorHalt::USER_DEFINED_2
        );
        assert_eq!(
            handle.take(),
            TranslatorHalt::USER_DEFINED_1 | TranslatorHalt::USER_DEFINED_2
        );
        assert!(handle.pending().is_empty());
    }

    #[test]
    fn test_unknown_bits_are_retained() {
        let handle = HaltHandle::new();
        handle.0.store(1 << 12, Ordering::Release);
        assert_eq!(handle.take().bits(), 1 << 12);
    }
}
