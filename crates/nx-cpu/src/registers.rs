//! Guest register file and the named-register façade
//!
//! W and X names are two views of the same 31 general registers: a 32-bit
//! write zero-extends into the 64-bit view. The zero-register names read as
//! 0 and swallow writes. Anything outside a name's width class is a host
//! bug and is reported as [`CpuError::InvalidRegister`].
//!
//! TPIDR_EL0 and TPIDRRO_EL0 are not part of the translator's register file.
//! They live in [`TlsRegisters`], which the core owns and hands to its
//! translator by reference.

use nx_core::error::CpuError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of general-purpose registers (X0-X30)
pub const NUM_GPRS: usize = 31;

/// Number of SIMD/FP vector registers
pub const NUM_VECTOR_REGS: usize = 32;

/// Encoding that selects the zero register (or SP) in an instruction
pub const ZERO_REGISTER_INDEX: u8 = 31;

/// Abstract register names understood by the façade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// 32-bit view of X0-X30
    W(u8),
    /// 64-bit general register
    X(u8),
    Wzr,
    Xzr,
    Sp,
    Pc,
    /// 128-bit SIMD/FP register
    V(u8),
    TpidrEl0,
    TpidrroEl0,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::W(n) => write!(f, "W{}", n),
            Self::X(n) => write!(f, "X{}", n),
            Self::Wzr => write!(f, "WZR"),
            Self::Xzr => write!(f, "XZR"),
            Self::Sp => write!(f, "SP"),
            Self::Pc => write!(f, "PC"),
            Self::V(n) => write!(f, "V{}", n),
            Self::TpidrEl0 => write!(f, "TPIDR_EL0"),
            Self::TpidrroEl0 => write!(f, "TPIDRRO_EL0"),
        }
    }
}

/// Concrete register file driven by a translator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    pub x: [u64; NUM_GPRS],
    pub sp: u64,
    pub pc: u64,
    pub v: [u128; NUM_VECTOR_REGS],
    pub fpcr: u32,
    pub fpsr: u32,
    /// Condition flags in bits 31:28
    pub nzcv: u32,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            x: [0; NUM_GPRS],
            sp: 0,
            pc: 0,
            v: [0; NUM_VECTOR_REGS],
            fpcr: 0,
            fpsr: 0,
            nzcv: 0,
        }
    }
}

impl RegisterFile {
    /// Read an instruction operand where index 31 is XZR
    #[inline]
    pub(crate) fn xzr(&self, index: u8) -> u64 {
        if index == ZERO_REGISTER_INDEX {
            0
        } else {
            self.x[index as usize]
        }
    }

    /// Write an instruction destination where index 31 is XZR
    #[inline]
    pub(crate) fn set_xzr(&mut self, index: u8, value: u64) {
        if index != ZERO_REGISTER_INDEX {
            self.x[index as usize] = value;
        }
    }

    /// Read an instruction operand where index 31 is SP
    #[inline]
    pub(crate) fn xsp(&self, index: u8) -> u64 {
        if index == ZERO_REGISTER_INDEX {
            self.sp
        } else {
            self.x[index as usize]
        }
    }

    /// Write an instruction destination where index 31 is SP
    #[inline]
    pub(crate) fn set_xsp(&mut self, index: u8, value: u64) {
        if index == ZERO_REGISTER_INDEX {
            self.sp = value;
        } else {
            self.x[index as usize] = value;
        }
    }
}

/// Thread-local storage control registers owned by the execution core
#[derive(Debug, Default)]
pub struct TlsRegisters {
    tpidr_el0: AtomicU64,
    tpidrro_el0: AtomicU64,
}

impl TlsRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn tpidr_el0(&self) -> u64 {
        self.tpidr_el0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_tpidr_el0(&self, value: u64) {
        self.tpidr_el0.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn tpidrro_el0(&self) -> u64 {
        self.tpidrro_el0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_tpidrro_el0(&self, value: u64) {
        self.tpidrro_el0.store(value, Ordering::Relaxed);
    }
}

/// Saved guest thread state, used when the kernel switches threads on a core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadContext {
    pub registers: RegisterFile,
    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,
}

/// Named, width-checked access to one core's registers
pub struct RegisterFacade<'a> {
    file: &'a mut RegisterFile,
    tls: &'a TlsRegisters,
}

impl<'a> RegisterFacade<'a> {
    pub fn new(file: &'a mut RegisterFile, tls: &'a TlsRegisters) -> Self {
        Self { file, tls }
    }

    fn invalid(register: Register, width: u32) -> CpuError {
        tracing::error!("Invalid {}-bit register access: {}", width, register);
        CpuError::InvalidRegister {
            register: register.to_string(),
            width,
        }
    }

    /// Read the 32-bit view of a general register
    pub fn get_32(&self, register: Register) -> Result<u32, CpuError> {
        match register {
            Register::W(n) if (n as usize) < NUM_GPRS => Ok(self.file.x[n as usize] as u32),
            Register::Wzr => Ok(0),
            _ => Err(Self::invalid(register, 32)),
        }
    }

    /// Write the 32-bit view of a general register, zero-extending into the
    /// 64-bit view
    pub fn set_32(&mut self, register: Register, value: u32) -> Result<(), CpuError> {
        match register {
            Register::W(n) if (n as usize) < NUM_GPRS => {
                self.file.x[n as usize] = value as u64;
                Ok(())
            }
            Register::Wzr => Ok(()),
            _ => Err(Self::invalid(register, 32)),
        }
    }

    pub fn get_64(&self, register: Register) -> Result<u64, CpuError> {
        match register {
            Register::X(n) if (n as usize) < NUM_GPRS => Ok(self.file.x[n as usize]),
            Register::Xzr => Ok(0),
            Register::Sp => Ok(self.file.sp),
            Register::Pc => Ok(self.file.pc),
            Register::TpidrEl0 => Ok(self.tls.tpidr_el0()),
            Register::TpidrroEl0 => Ok(self.tls.tpidrro_el0()),
            _ => Err(Self::invalid(register, 64)),
        }
    }

    pub fn set_64(&mut self, register: Register, value: u64) -> Result<(), CpuError> {
        match register {
            Register::X(n) if (n as usize) < NUM_GPRS => self.file.x[n as usize] = value,
            Register::Xzr => {}
            Register::Sp => self.file.sp = value,
            Register::Pc => self.file.pc = value,
            Register::TpidrEl0 => self.tls.set_tpidr_el0(value),
            Register::TpidrroEl0 => self.tls.set_tpidrro_el0(value),
            _ => return Err(Self::invalid(register, 64)),
        }
        Ok(())
    }

    /// Read a vector register as `[low, high]` 64-bit halves
    pub fn get_128(&self, register: Register) -> Result<[u64; 2], CpuError> {
        match register {
            Register::V(n) if (n as usize) < NUM_VECTOR_REGS => {
                let value = self.file.v[n as usize];
                Ok([value as u64, (value >> 64) as u64])
            }
            _ => Err(Self::invalid(register, 128)),
        }
    }

    pub fn set_128(&mut self, register: Register, value: [u64; 2]) -> Result<(), CpuError> {
        match register {
            Register::V(n) if (n as usize) < NUM_VECTOR_REGS => {
                self.file.v[n as usize] = value[0] as u128 | (value[1] as u128) << 64;
                Ok(())
            }
            _ => Err(Self::invalid(register, 128)),
        }
    }

    pub fn fpcr(&self) -> u32 {
        self.file.fpcr
    }

    pub fn set_fpcr(&mut self, value: u32) {
        self.file.fpcr = value;
    }

    pub fn fpsr(&self) -> u32 {
        self.file.fpsr
    }

    pub fn set_fpsr(&mut self, value: u32) {
        self.file.fpsr = value;
    }

    /// Snapshot everything a guest thread owns on this core
    pub fn save_context(&self) -> ThreadContext {
        ThreadContext {
            registers: self.file.clone(),
            tpidr_el0: self.tls.tpidr_el0(),
            tpidrro_el0: self.tls.tpidrro_el0(),
        }
    }

    pub fn load_context(&mut self, context: &ThreadContext) {
        *self.file = context.registers.clone();
        self.tls.set_tpidr_el0(context.tpidr_el0);
        self.tls.set_tpidrro_el0(context.tpidrro_el0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_facade<R>(f: impl FnOnce(&mut RegisterFacade<'_>) -> R) -> R {
        let mut file = RegisterFile::default();
        let tls = TlsRegisters::new();
        let mut facade = RegisterFacade::new(&mut file, &tls);
        f(&mut facade)
    }

    #[test]
    fn test_w_write_zero_extends() {
        with_facade(|regs| {
            regs.set_64(Register::X(5), u64::MAX).unwrap();
            regs.set_32(Register::W(5), 0x1234_5678).unwrap();
            assert_eq!(regs.get_64(Register::X(5)).unwrap(), 0x1234_5678);
        });
    }

    #[test]
    fn test_special_registers() {
        with_facade(|regs| {
            regs.set_64(Register::Sp, 0x1000).unwrap();
            regs.set_64(Register::Pc, 0x8000_0000).unwrap();
            regs.set_64(Register::TpidrEl0, 0xAAAA).unwrap();
            regs.set_64(Register::TpidrroEl0, 0xBBBB).unwrap();
            regs.set_fpcr(0x0300_0000);
            regs.set_fpsr(0x1);

            assert_eq!(regs.get_64(Register::Sp).unwrap(), 0x1000);
            assert_eq!(regs.get_64(Register::Pc).unwrap(), 0x8000_0000);
            assert_eq!(regs.get_64(Register::TpidrEl0).unwrap(), 0xAAAA);
            assert_eq!(regs.get_64(Register::TpidrroEl0).unwrap(), 0xBBBB);
            assert_eq!(regs.fpcr(), 0x0300_0000);
            assert_eq!(regs.fpsr(), 0x1);
        });
    }

    #[test]
    fn test_vector_halves() {
        with_facade(|regs| {
            regs.set_128(Register::V(31), [0x1111, 0x2222]).unwrap();
            assert_eq!(regs.get_128(Register::V(31)).unwrap(), [0x1111, 0x2222]);
        });
    }

    #[test]
    fn test_invalid_names_are_errors() {
        with_facade(|regs| {
            assert!(matches!(
                regs.get_32(Register::W(31)),
                Err(CpuError::InvalidRegister { width: 32, .. })
            ));
            assert!(regs.get_64(Register::X(31)).is_err());
            assert!(regs.set_64(Register::X(40), 1).is_err());
            assert!(regs.get_32(Register::X(0)).is_err());
            assert!(regs.get_64(Register::W(0)).is_err());
            assert!(regs.get_128(Register::V(32)).is_err());
            assert!(regs.set_128(Register::X(0), [0, 0]).is_err());
            assert!(regs.set_32(Register::Sp, 0).is_err());
        });
    }

    #[test]
    fn test_context_round_trip() {
        let tls = TlsRegisters::new();
        let mut file = RegisterFile::default();
        let saved = {
            let mut regs = RegisterFacade::new(&mut file, &tls);
            regs.set_64(Register::X(0), 42).unwrap();
            regs.set_64(Register::TpidrroEl0, 0x1_2800_0000).unwrap();
            regs.save_context()
        };

        let mut other = RegisterFile::default();
        let other_tls = TlsRegisters::new();
        RegisterFacade::new(&mut other, &other_tls).load_context(&saved);
        assert_eq!(other.x[0], 42);
        assert_eq!(other_tls.tpidrro_el0(), 0x1_2800_0000);
    }

    proptest! {
        #[test]
        fn prop_w_alias_reads_back_in_x(index in 0u8..31, value in any::<u32>(), junk in any::<u64>()) {
            with_facade(|regs| {
                regs.set_64(Register::X(index), junk).unwrap();
                regs.set_32(Register::W(index), value).unwrap();
                assert_eq!(regs.get_64(Register::X(index)).unwrap(), value as u64);
            });
        }

        #[test]
        fn prop_x_alias_reads_back_low_half_in_w(index in 0u8..31, value in any::<u64>()) {
            with_facade(|regs| {
                regs.set_64(Register::X(index), value).unwrap();
                assert_eq!(regs.get_32(Register::W(index)).unwrap(), value as u32);
            });
        }

        #[test]
        fn prop_zero_registers_discard_writes(value in any::<u64>()) {
            with_facade(|regs| {
                regs.set_64(Register::Xzr, value).unwrap();
                regs.set_32(Register::Wzr, value as u32).unwrap();
                assert_eq!(regs.get_64(Register::Xzr).unwrap(), 0);
                assert_eq!(regs.get_32(Register::Wzr).unwrap(), 0);
                assert!((0..31).all(|i| regs.get_64(Register::X(i)).unwrap() == 0));
            });
        }
    }
}
