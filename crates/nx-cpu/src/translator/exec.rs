//! Instruction semantics for the block translator

use super::decoder::{
    Addressing, BitfieldOp, CondSelectOp, DataProc2Op, Extend, HintOp, Instruction, LogicalOp,
    MemOp, MoveWideOp, ShiftType, SystemRegister,
};
use super::{DataCacheOp, Exception, InstructionCacheOp, TranslatorConfig, TranslatorEnv};
use crate::registers::RegisterFile;
use nx_core::error::CpuError;
use nx_core::VAddr;

/// DC ZVA block size in bytes, matching DCZID_EL0
const ZVA_BLOCK_SIZE: u64 = 64;

/// DCZID_EL0: 2^4 words per DC ZVA
const DCZID_VALUE: u64 = 4;

/// CTR_EL0 reported to the guest
const CTR_VALUE: u64 = 0x8444_C004;

/// Instruction cache line size implied by CTR_EL0.IminLine
const ICACHE_LINE_SIZE: u64 = 4 << (CTR_VALUE & 0xF);

/// Control flow after one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    Next,
    Jump(u64),
    EndBlock,
    /// Drop translated code, `None` meaning all of it, and end the block
    Invalidate(Option<(VAddr, u64)>),
}

/// Executes decoded instructions against one register file
pub(super) struct Executor<'a> {
    pub regs: &'a mut RegisterFile,
    pub env: &'a mut dyn TranslatorEnv,
    pub config: &'a TranslatorConfig,
}

#[inline]
fn nzcv(n: bool, z: bool, c: bool, v: bool) -> u32 {
    (n as u32) << 31 | (z as u32) << 30 | (c as u32) << 29 | (v as u32) << 28
}

#[inline]
fn truncate(sf: bool, value: u64) -> u64 {
    if sf {
        value
    } else {
        value & 0xFFFF_FFFF
    }
}

#[inline]
fn ones(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Sign-extend the low `width` bits of `value`
#[inline]
fn sign_extend(value: u64, width: u32) -> u64 {
    let shift = 64 - width;
    (((value << shift) as i64) >> shift) as u64
}

/// AddWithCarry from the architecture reference; returns the result and NZCV
pub(super) fn add_with_carry(sf: bool, x: u64, y: u64, carry_in: bool) -> (u64, u32) {
    if sf {
        let (partial, c1) = x.overflowing_add(y);
        let (result, c2) = partial.overflowing_add(carry_in as u64);
        let overflow = ((x ^ result) & (y ^ result)) >> 63 != 0;
        (result, nzcv((result as i64) < 0, result == 0, c1 || c2, overflow))
    } else {
        let (x, y) = (x as u32, y as u32);
        let wide = x as u64 + y as u64 + carry_in as u64;
        let result = wide as u32;
        let overflow = ((x ^ result) & (y ^ result)) >> 31 != 0;
        (
            result as u64,
            nzcv((result as i32) < 0, result == 0, wide > u32::MAX as u64, overflow),
        )
    }
}

/// Evaluate a 4-bit condition code against NZCV
pub(super) fn condition_holds(cond: u8, flags: u32) -> bool {
    let n = flags & (1 << 31) != 0;
    let z = flags & (1 << 30) != 0;
    let c = flags & (1 << 29) != 0;
    let v = flags & (1 << 28) != 0;

    let result = match cond >> 1 {
        0 => z,
        1 => c,
        2 => n,
        3 => v,
        4 => c && !z,
        5 => n == v,
        6 => n == v && !z,
        _ => true,
    };

    if cond & 1 != 0 && cond != 0b1111 {
        !result
    } else {
        result
    }
}

pub(super) fn shift_value(sf: bool, value: u64, shift: ShiftType, amount: u32) -> u64 {
    if sf {
        let amount = amount & 63;
        match shift {
            ShiftType::Lsl => value << amount,
            ShiftType::Lsr => value >> amount,
            ShiftType::Asr => ((value as i64) >> amount) as u64,
            ShiftType::Ror => value.rotate_right(amount),
        }
    } else {
        let amount = amount & 31;
        let value = value as u32;
        (match shift {
            ShiftType::Lsl => value << amount,
            ShiftType::Lsr => value >> amount,
            ShiftType::Asr => ((value as i32) >> amount) as u32,
            ShiftType::Ror => value.rotate_right(amount),
        }) as u64
    }
}

fn bitfield(sf: bool, op: BitfieldOp, dst: u64, src: u64, immr: u32, imms: u32) -> u64 {
    let datasize = if sf { 64 } else { 32 };
    let result = if imms >= immr {
        let width = imms - immr + 1;
        let field = (src >> immr) & ones(width);
        match op {
            BitfieldOp::Ubfm => field,
            BitfieldOp::Sbfm => sign_extend(field, width),
            BitfieldOp::Bfm => (dst & !ones(width)) | field,
        }
    } else {
        let width = imms + 1;
        let pos = datasize - immr;
        let field = src & ones(width);
        match op {
            BitfieldOp::Ubfm => field << pos,
            BitfieldOp::Sbfm => sign_extend(field, width) << pos,
            BitfieldOp::Bfm => (dst & !(ones(width) << pos)) | (field << pos),
        }
    };
    truncate(sf, result)
}

fn logical(sf: bool, op: LogicalOp, a: u64, b: u64) -> (u64, Option<u32>) {
    let result = truncate(
        sf,
        match op {
            LogicalOp::And | LogicalOp::Ands => a & b,
            LogicalOp::Orr => a | b,
            LogicalOp::Eor => a ^ b,
        },
    );
    let flags = (op == LogicalOp::Ands).then(|| {
        let negative = if sf { result >> 63 } else { result >> 31 } != 0;
        nzcv(negative, result == 0, false, false)
    });
    (result, flags)
}

fn divide(sf: bool, op: DataProc2Op, a: u64, b: u64) -> u64 {
    if sf {
        match op {
            DataProc2Op::Udiv => a.checked_div(b).unwrap_or(0),
            _ if b == 0 => 0,
            _ => (a as i64).wrapping_div(b as i64) as u64,
        }
    } else {
        let (a, b) = (a as u32, b as u32);
        (match op {
            DataProc2Op::Udiv => a.checked_div(b).unwrap_or(0),
            _ if b == 0 => 0,
            _ => (a as i32).wrapping_div(b as i32) as u32,
        }) as u64
    }
}

impl<'a> Executor<'a> {
    /// Execute `instruction` located at `pc`. `regs.pc` already holds `pc + 4`.
    pub fn execute(&mut self, pc: u64, instruction: &Instruction) -> Result<Flow, CpuError> {
        match *instruction {
            Instruction::MoveWide { sf, op, rd, imm16, shift } => {
                let imm = (imm16 as u64) << shift;
                let value = match op {
                    MoveWideOp::Movz => imm,
                    MoveWideOp::Movn => !imm,
                    MoveWideOp::Movk => (self.regs.xzr(rd) & !(0xFFFFu64 << shift)) | imm,
                };
                self.regs.set_xzr(rd, truncate(sf, value));
            }

            Instruction::AddSubImm { sf, sub, set_flags, rd, rn, imm } => {
                let a = self.regs.xsp(rn);
                let (result, flags) = if sub {
                    add_with_carry(sf, a, !imm, true)
                } else {
                    add_with_carry(sf, a, imm, false)
                };
                if set_flags {
                    self.regs.nzcv = flags;
                    self.regs.set_xzr(rd, result);
                } else {
                    self.regs.set_xsp(rd, result);
                }
            }

            Instruction::AddSubReg { sf, sub, set_flags, rd, rn, rm, shift, amount } => {
                let a = self.regs.xzr(rn);
                let b = shift_value(sf, self.regs.xzr(rm), shift, amount as u32);
                let (result, flags) = if sub {
                    add_with_carry(sf, a, !b, true)
                } else {
                    add_with_carry(sf, a, b, false)
                };
                if set_flags {
                    self.regs.nzcv = flags;
                }
                self.regs.set_xzr(rd, result);
            }

            Instruction::LogicalImm { sf, op, rd, rn, imm } => {
                let (result, flags) = logical(sf, op, self.regs.xzr(rn), imm);
                match flags {
                    Some(flags) => {
                        self.regs.nzcv = flags;
                        self.regs.set_xzr(rd, result);
                    }
                    None => self.regs.set_xsp(rd, result),
                }
            }

            Instruction::LogicalReg { sf, op, invert, rd, rn, rm, shift, amount } => {
                let mut b = shift_value(sf, self.regs.xzr(rm), shift, amount as u32);
                if invert {
                    b = !b;
                }
                let (result, flags) = logical(sf, op, self.regs.xzr(rn), b);
                if let Some(flags) = flags {
                    self.regs.nzcv = flags;
                }
                self.regs.set_xzr(rd, result);
            }

            Instruction::Bitfield { sf, op, rd, rn, immr, imms } => {
                let result = bitfield(
                    sf,
                    op,
                    self.regs.xzr(rd),
                    self.regs.xzr(rn),
                    immr as u32,
                    imms as u32,
                );
                self.regs.set_xzr(rd, result);
            }

            Instruction::CondSelect { sf, op, rd, rn, rm, cond } => {
                let result = if condition_holds(cond, self.regs.nzcv) {
                    self.regs.xzr(rn)
                } else {
                    let b = self.regs.xzr(rm);
                    match op {
                        CondSelectOp::Csel => b,
                        CondSelectOp::Csinc => b.wrapping_add(1),
                        CondSelectOp::Csinv => !b,
                        CondSelectOp::Csneg => b.wrapping_neg(),
                    }
                };
                self.regs.set_xzr(rd, truncate(sf, result));
            }

            Instruction::MulAdd { sf, sub, rd, rn, rm, ra } => {
                let product = self.regs.xzr(rn).wrapping_mul(self.regs.xzr(rm));
                let acc = self.regs.xzr(ra);
                let result = if sub {
                    acc.wrapping_sub(product)
                } else {
                    acc.wrapping_add(product)
                };
                self.regs.set_xzr(rd, truncate(sf, result));
            }

            Instruction::DataProc2 { sf, op, rd, rn, rm } => {
                let a = self.regs.xzr(rn);
                let b = self.regs.xzr(rm);
                let result = match op {
                    DataProc2Op::Udiv | DataProc2Op::Sdiv => divide(sf, op, a, b),
                    DataProc2Op::Lslv => shift_value(sf, a, ShiftType::Lsl, b as u32),
                    DataProc2Op::Lsrv => shift_value(sf, a, ShiftType::Lsr, b as u32),
                    DataProc2Op::Asrv => shift_value(sf, a, ShiftType::Asr, b as u32),
                    DataProc2Op::Rorv => shift_value(sf, a, ShiftType::Ror, b as u32),
                };
                self.regs.set_xzr(rd, result);
            }

            Instruction::Adr { rd, offset, page } => {
                let value = if page {
                    (pc & !0xFFF).wrapping_add((offset << 12) as u64)
                } else {
                    pc.wrapping_add(offset as u64)
                };
                self.regs.set_xzr(rd, value);
            }

            Instruction::Branch { link, offset } => {
                if link {
                    self.regs.x[30] = pc.wrapping_add(4);
                }
                return Ok(Flow::Jump(pc.wrapping_add(offset as u64)));
            }

            Instruction::BranchCond { cond, offset } => {
                if condition_holds(cond, self.regs.nzcv) {
                    return Ok(Flow::Jump(pc.wrapping_add(offset as u64)));
                }
                return Ok(Flow::EndBlock);
            }

            Instruction::CompareBranch { sf, nonzero, rt, offset } => {
                let is_zero = truncate(sf, self.regs.xzr(rt)) == 0;
                if is_zero != nonzero {
                    return Ok(Flow::Jump(pc.wrapping_add(offset as u64)));
                }
                return Ok(Flow::EndBlock);
            }

            Instruction::TestBranch { nonzero, rt, bit, offset } => {
                let set = (self.regs.xzr(rt) >> bit) & 1 != 0;
                if set == nonzero {
                    return Ok(Flow::Jump(pc.wrapping_add(offset as u64)));
                }
                return Ok(Flow::EndBlock);
            }

            Instruction::BranchReg { link, rn } => {
                let target = self.regs.xzr(rn);
                if link {
                    self.regs.x[30] = pc.wrapping_add(4);
                }
                return Ok(Flow::Jump(target));
            }

            Instruction::Ret { rn } => return Ok(Flow::Jump(self.regs.xzr(rn))),

            Instruction::LoadStore { op, size, rt, rn, addressing } => {
                let (addr, writeback) = self.effective_address(rn, addressing);
                self.load_store(op, size, rt, addr);
                if let Some(value) = writeback {
                    self.regs.set_xsp(rn, value);
                }
            }

            Instruction::LoadLiteral { op, size, rt, offset } => {
                self.load_store(op, size, rt, pc.wrapping_add(offset as u64));
            }

            Instruction::LoadStorePair { load, vector, size, rt, rt2, rn, addressing } => {
                let (addr, writeback) = self.effective_address(rn, addressing);
                let second = addr.wrapping_add(1 << size);
                let op = match (load, vector) {
                    (false, false) => MemOp::Store,
                    (true, false) => MemOp::Load,
                    (false, true) => MemOp::StoreVector,
                    (true, true) => MemOp::LoadVector,
                };
                self.load_store(op, size, rt, addr);
                self.load_store(op, size, rt2, second);
                if let Some(value) = writeback {
                    self.regs.set_xsp(rn, value);
                }
            }

            Instruction::LoadExclusive { size, rt, rn } => {
                let addr = self.regs.xsp(rn);
                let value = match size {
                    0 => self.env.exclusive_read_8(addr) as u64,
                    1 => self.env.exclusive_read_16(addr) as u64,
                    2 => self.env.exclusive_read_32(addr) as u64,
                    _ => self.env.exclusive_read_64(addr),
                };
                self.regs.set_xzr(rt, value);
            }

            Instruction::StoreExclusive { size, rs, rt, rn } => {
                let addr = self.regs.xsp(rn);
                let value = self.regs.xzr(rt);
                let committed = match size {
                    0 => self.env.exclusive_write_8(addr, value as u8),
                    1 => self.env.exclusive_write_16(addr, value as u16),
                    2 => self.env.exclusive_write_32(addr, value as u32),
                    _ => self.env.exclusive_write_64(addr, value),
                };
                self.regs.set_xzr(rs, if committed { 0 } else { 1 });
            }

            Instruction::LoadExclusivePair { size, rt, rt2, rn } => {
                let addr = self.regs.xsp(rn);
                if size == 2 {
                    let value = self.env.exclusive_read_64(addr);
                    self.regs.set_xzr(rt, value & 0xFFFF_FFFF);
                    self.regs.set_xzr(rt2, value >> 32);
                } else {
                    let value = self.env.exclusive_read_128(pc, addr)?;
                    self.regs.set_xzr(rt, value as u64);
                    self.regs.set_xzr(rt2, (value >> 64) as u64);
                }
            }

            Instruction::StoreExclusivePair { size, rs, rt, rt2, rn } => {
                let addr = self.regs.xsp(rn);
                let low = self.regs.xzr(rt);
                let high = self.regs.xzr(rt2);
                let committed = if size == 2 {
                    self.env
                        .exclusive_write_64(addr, (low & 0xFFFF_FFFF) | (high << 32))
                } else {
                    self.env
                        .exclusive_write_128(pc, addr, low as u128 | (high as u128) << 64)?
                };
                self.regs.set_xzr(rs, if committed { 0 } else { 1 });
            }

            Instruction::LoadAcquire { size, rt, rn } => {
                let addr = self.regs.xsp(rn);
                self.load_store(MemOp::Load, size, rt, addr);
            }

            Instruction::StoreRelease { size, rt, rn } => {
                let addr = self.regs.xsp(rn);
                self.load_store(MemOp::Store, size, rt, addr);
            }

            Instruction::ClearExclusive => self.env.clear_exclusive(),

            Instruction::Barrier => {}

            Instruction::InstructionBarrier => {
                self.env.instruction_synchronization_barrier(pc)?;
                return Ok(Flow::EndBlock);
            }

            Instruction::Hint(op) => {
                let exception = match op {
                    HintOp::Nop => return Ok(Flow::Next),
                    HintOp::Yield => Exception::Yield,
                    HintOp::Wfe => Exception::WaitForEvent,
                    HintOp::Wfi => Exception::WaitForInterrupt,
                    HintOp::Sev => Exception::SendEvent,
                    HintOp::Sevl => Exception::SendEventLocal,
                };
                self.env.exception_raised(pc, exception)?;
                return Ok(Flow::EndBlock);
            }

            Instruction::DataCache { op, rt } => {
                let addr = self.regs.xzr(rt);
                if op == DataCacheOp::ZeroByVa {
                    let base = addr & !(ZVA_BLOCK_SIZE - 1);
                    for offset in (0..ZVA_BLOCK_SIZE).step_by(8) {
                        self.env.write_64(base + offset, 0);
                    }
                } else {
                    self.env.data_cache_operation(pc, op, addr)?;
                    return Ok(Flow::EndBlock);
                }
            }

            Instruction::InstructionCache { op, rt } => {
                let addr = self.regs.xzr(rt);
                self.env.instruction_cache_operation(pc, op, addr)?;
                return Ok(Flow::Invalidate(match op {
                    InstructionCacheOp::InvalidateByVaToPou => {
                        Some((addr & !(ICACHE_LINE_SIZE - 1), ICACHE_LINE_SIZE))
                    }
                    _ => None,
                }));
            }

            Instruction::Mrs { rt, reg } => {
                let value = match reg {
                    SystemRegister::TpidrEl0 => self.config.tls.tpidr_el0(),
                    SystemRegister::TpidrroEl0 => self.config.tls.tpidrro_el0(),
                    SystemRegister::CntpctEl0 | SystemRegister::CntvctEl0 => self.env.cntpct(),
                    SystemRegister::CntfrqEl0 => self.config.cntfrq,
                    SystemRegister::Fpcr => self.regs.fpcr as u64,
                    SystemRegister::Fpsr => self.regs.fpsr as u64,
                    SystemRegister::Nzcv => self.regs.nzcv as u64,
                    SystemRegister::DczidEl0 => DCZID_VALUE,
                    SystemRegister::CtrEl0 => CTR_VALUE,
                };
                self.regs.set_xzr(rt, value);
            }

            Instruction::Msr { rt, reg } => {
                let value = self.regs.xzr(rt);
                match reg {
                    SystemRegister::TpidrEl0 => self.config.tls.set_tpidr_el0(value),
                    SystemRegister::Fpcr => self.regs.fpcr = value as u32,
                    SystemRegister::Fpsr => self.regs.fpsr = value as u32,
                    SystemRegister::Nzcv => self.regs.nzcv = value as u32 & 0xF000_0000,
                    _ => return self.fallback(pc, instruction),
                }
            }

            Instruction::Svc { imm } => {
                self.env.call_supervisor(imm as u32, self.regs)?;
                return Ok(Flow::EndBlock);
            }

            Instruction::Brk { .. } => {
                self.env.exception_raised(pc, Exception::Breakpoint)?;
                return Ok(Flow::EndBlock);
            }

            Instruction::Udf { .. } => {
                self.env.exception_raised(pc, Exception::UnallocatedEncoding)?;
                return Ok(Flow::EndBlock);
            }

            Instruction::Unknown(_) => return self.fallback(pc, instruction),
        }

        Ok(Flow::Next)
    }

    fn fallback(&mut self, pc: u64, instruction: &Instruction) -> Result<Flow, CpuError> {
        let opcode = match *instruction {
            Instruction::Unknown(raw) => raw,
            _ => 0,
        };
        self.env.interpreter_fallback(pc, opcode)?;
        Ok(Flow::EndBlock)
    }

    /// Address of the access and the base register value to write back
    fn effective_address(&self, rn: u8, addressing: Addressing) -> (u64, Option<u64>) {
        let base = self.regs.xsp(rn);
        match addressing {
            Addressing::Offset(offset) => (base.wrapping_add(offset as u64), None),
            Addressing::PreIndex(offset) => {
                let addr = base.wrapping_add(offset as u64);
                (addr, Some(addr))
            }
            Addressing::PostIndex(offset) => (base, Some(base.wrapping_add(offset as u64))),
            Addressing::Register { rm, extend, shift } => {
                let index = self.regs.xzr(rm);
                let index = match extend {
                    Extend::Uxtw => index & 0xFFFF_FFFF,
                    Extend::Sxtw => index as u32 as i32 as i64 as u64,
                    Extend::Lsl | Extend::Sxtx => index,
                };
                (base.wrapping_add(index << shift), None)
            }
        }
    }

    fn load_store(&mut self, op: MemOp, size: u8, rt: u8, addr: VAddr) {
        match op {
            MemOp::Store => {
                let value = self.regs.xzr(rt);
                match size {
                    0 => self.env.write_8(addr, value as u8),
                    1 => self.env.write_16(addr, value as u16),
                    2 => self.env.write_32(addr, value as u32),
                    _ => self.env.write_64(addr, value),
                };
            }
            MemOp::Load => {
                let value = self.read_sized(size, addr);
                self.regs.set_xzr(rt, value);
            }
            MemOp::LoadSigned { to_64 } => {
                let value = sign_extend(self.read_sized(size, addr), 8 << size);
                self.regs.set_xzr(rt, if to_64 { value } else { value & 0xFFFF_FFFF });
            }
            MemOp::StoreVector => {
                let value = self.regs.v[rt as usize];
                match size {
                    0 => self.env.write_8(addr, value as u8),
                    1 => self.env.write_16(addr, value as u16),
                    2 => self.env.write_32(addr, value as u32),
                    3 => self.env.write_64(addr, value as u64),
                    _ => self.env.write_128(addr, value),
                };
            }
            MemOp::LoadVector => {
                self.regs.v[rt as usize] = match size {
                    0..=3 => self.read_sized(size, addr) as u128,
                    _ => self.env.read_128(addr),
                };
            }
        }
    }

    fn read_sized(&mut self, size: u8, addr: VAddr) -> u64 {
        match size {
            0 => self.env.read_8(addr) as u64,
            1 => self.env.read_16(addr) as u64,
            2 => self.env.read_32(addr) as u64,
            _ => self.env.read_64(addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: u32 = 1 << 31;
    const Z: u32 = 1 << 30;
    const C: u32 = 1 << 29;
    const V: u32 = 1 << 28;

    #[test]
    fn test_add_with_carry_flags() {
        assert_eq!(add_with_carry(true, 1, 2, false), (3, 0));
        assert_eq!(add_with_carry(true, u64::MAX, 1, false), (0, Z | C));
        assert_eq!(add_with_carry(false, 0x7FFF_FFFF, 1, false), (0x8000_0000, N | V));
        // subs w0, w1, w1
        assert_eq!(add_with_carry(false, 5, !5, true), (0, Z | C));
        // 3 - 5 borrows
        let (result, flags) = add_with_carry(true, 3, !5, true);
        assert_eq!(result, (-2i64) as u64);
        assert_eq!(flags, N);
    }

    #[test]
    fn test_conditions() {
        assert!(condition_holds(0b0000, Z));
        assert!(!condition_holds(0b0001, Z));
        assert!(condition_holds(0b1000, C));
        assert!(!condition_holds(0b1000, C | Z));
        assert!(condition_holds(0b1010, N | V));
        assert!(condition_holds(0b1011, N));
        assert!(condition_holds(0b1100, 0));
        assert!(condition_holds(0b1110, 0));
        assert!(condition_holds(0b1111, 0));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(shift_value(true, 1, ShiftType::Lsl, 63), 1 << 63);
        assert_eq!(shift_value(false, 0x8000_0000, ShiftType::Asr, 4), 0xF800_0000);
        assert_eq!(shift_value(false, 1, ShiftType::Ror, 1), 0x8000_0000);
        assert_eq!(shift_value(true, 0xF0, ShiftType::Lsr, 68), 0xF);
    }

    #[test]
    fn test_bitfield_aliases() {
        // ubfx x0, x1, #8, #8
        assert_eq!(bitfield(true, BitfieldOp::Ubfm, 0, 0xABCD, 8, 15), 0xAB);
        // sxtb w0, w1
        assert_eq!(bitfield(false, BitfieldOp::Sbfm, 0, 0x80, 0, 7), 0xFFFF_FF80);
        // lsl w0, w1, #4 (ubfm w0, w1, #28, #27)
        assert_eq!(bitfield(false, BitfieldOp::Ubfm, 0, 0x1234_5678, 28, 27), 0x2345_6780);
        // bfi x0, x1, #8, #4 (bfm x0, x1, #56, #3)
        assert_eq!(bitfield(true, BitfieldOp::Bfm, 0xFFFF, 0x5, 56, 3), 0xF5FF);
    }

    #[test]
    fn test_division_edge_cases() {
        assert_eq!(divide(true, DataProc2Op::Udiv, 10, 0), 0);
        assert_eq!(divide(true, DataProc2Op::Sdiv, i64::MIN as u64, u64::MAX), i64::MIN as u64);
        assert_eq!(divide(false, DataProc2Op::Sdiv, (-9i32) as u32 as u64, 2), (-4i32) as u32 as u64);
    }
}
