//! A64 instruction decoder
//!
//! Covers the integer subset the block translator executes. Everything else
//! decodes to [`Instruction::Unknown`] and goes to the interpreter fallback.

use super::{DataCacheOp, InstructionCacheOp};

/// Shift applied to the second register operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl ShiftType {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

/// Index register extension for register-offset addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extend {
    Uxtw,
    Lsl,
    Sxtw,
    Sxtx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveWideOp {
    Movn,
    Movz,
    Movk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Orr,
    Eor,
    Ands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitfieldOp {
    Sbfm,
    Bfm,
    Ubfm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondSelectOp {
    Csel,
    Csinc,
    Csinv,
    Csneg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProc2Op {
    Udiv,
    Sdiv,
    Lslv,
    Lsrv,
    Asrv,
    Rorv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintOp {
    Nop,
    Yield,
    Wfe,
    Wfi,
    Sev,
    Sevl,
}

/// Load/store flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Store,
    Load,
    /// Sign-extending load into a W (`to_64 == false`) or X register
    LoadSigned { to_64: bool },
    StoreVector,
    LoadVector,
}

/// Effective address computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Offset(i64),
    PreIndex(i64),
    PostIndex(i64),
    Register { rm: u8, extend: Extend, shift: u8 },
}

/// System registers reachable through MRS/MSR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemRegister {
    TpidrEl0,
    TpidrroEl0,
    CntpctEl0,
    CntvctEl0,
    CntfrqEl0,
    Fpcr,
    Fpsr,
    Nzcv,
    DczidEl0,
    CtrEl0,
}

const fn sys_reg(op0: u32, op1: u32, crn: u32, crm: u32, op2: u32) -> u32 {
    (op0 << 14) | (op1 << 11) | (crn << 7) | (crm << 3) | op2
}

impl SystemRegister {
    fn from_encoding(encoding: u32) -> Option<Self> {
        const TPIDR_EL0: u32 = sys_reg(3, 3, 13, 0, 2);
        const TPIDRRO_EL0: u32 = sys_reg(3, 3, 13, 0, 3);
        const CNTPCT_EL0: u32 = sys_reg(3, 3, 14, 0, 1);
        const CNTVCT_EL0: u32 = sys_reg(3, 3, 14, 0, 2);
        const CNTFRQ_EL0: u32 = sys_reg(3, 3, 14, 0, 0);
        const FPCR: u32 = sys_reg(3, 3, 4, 4, 0);
        const FPSR: u32 = sys_reg(3, 3, 4, 4, 1);
        const NZCV: u32 = sys_reg(3, 3, 4, 2, 0);
        const DCZID_EL0: u32 = sys_reg(3, 3, 0, 0, 7);
        const CTR_EL0: u32 = sys_reg(3, 3, 0, 0, 1);

        Some(match encoding {
            TPIDR_EL0 => Self::TpidrEl0,
            TPIDRRO_EL0 => Self::TpidrroEl0,
            CNTPCT_EL0 => Self::CntpctEl0,
            CNTVCT_EL0 => Self::CntvctEl0,
            CNTFRQ_EL0 => Self::CntfrqEl0,
            FPCR => Self::Fpcr,
            FPSR => Self::Fpsr,
            NZCV => Self::Nzcv,
            DCZID_EL0 => Self::DczidEl0,
            CTR_EL0 => Self::CtrEl0,
            _ => return None,
        })
    }

    /// Registers EL0 may write
    fn is_writable(self) -> bool {
        matches!(self, Self::TpidrEl0 | Self::Fpcr | Self::Fpsr | Self::Nzcv)
    }
}

/// Decoded A64 instruction. Register fields are raw 5-bit encodings, so 31
/// means SP or ZR depending on the operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    MoveWide { sf: bool, op: MoveWideOp, rd: u8, imm16: u16, shift: u8 },
    AddSubImm { sf: bool, sub: bool, set_flags: bool, rd: u8, rn: u8, imm: u64 },
    AddSubReg { sf: bool, sub: bool, set_flags: bool, rd: u8, rn: u8, rm: u8, shift: ShiftType, amount: u8 },
    LogicalImm { sf: bool, op: LogicalOp, rd: u8, rn: u8, imm: u64 },
    LogicalReg { sf: bool, op: LogicalOp, invert: bool, rd: u8, rn: u8, rm: u8, shift: ShiftType, amount: u8 },
    Bitfield { sf: bool, op: BitfieldOp, rd: u8, rn: u8, immr: u8, imms: u8 },
    CondSelect { sf: bool, op: CondSelectOp, rd: u8, rn: u8, rm: u8, cond: u8 },
    MulAdd { sf: bool, sub: bool, rd: u8, rn: u8, rm: u8, ra: u8 },
    DataProc2 { sf: bool, op: DataProc2Op, rd: u8, rn: u8, rm: u8 },
    Adr { rd: u8, offset: i64, page: bool },

    Branch { link: bool, offset: i64 },
    BranchCond { cond: u8, offset: i64 },
    CompareBranch { sf: bool, nonzero: bool, rt: u8, offset: i64 },
    TestBranch { nonzero: bool, rt: u8, bit: u8, offset: i64 },
    BranchReg { link: bool, rn: u8 },
    Ret { rn: u8 },

    /// `size` is log2 of the access width in bytes
    LoadStore { op: MemOp, size: u8, rt: u8, rn: u8, addressing: Addressing },
    LoadLiteral { op: MemOp, size: u8, rt: u8, offset: i64 },
    LoadStorePair { load: bool, vector: bool, size: u8, rt: u8, rt2: u8, rn: u8, addressing: Addressing },
    LoadExclusive { size: u8, rt: u8, rn: u8 },
    StoreExclusive { size: u8, rs: u8, rt: u8, rn: u8 },
    /// `size` is the width of each element (2 or 3)
    LoadExclusivePair { size: u8, rt: u8, rt2: u8, rn: u8 },
    StoreExclusivePair { size: u8, rs: u8, rt: u8, rt2: u8, rn: u8 },
    LoadAcquire { size: u8, rt: u8, rn: u8 },
    StoreRelease { size: u8, rt: u8, rn: u8 },

    ClearExclusive,
    Barrier,
    InstructionBarrier,
    Hint(HintOp),
    DataCache { op: DataCacheOp, rt: u8 },
    InstructionCache { op: InstructionCacheOp, rt: u8 },
    Mrs { rt: u8, reg: SystemRegister },
    Msr { rt: u8, reg: SystemRegister },

    Svc { imm: u16 },
    Brk { imm: u16 },
    Udf { imm: u16 },
    Unknown(u32),
}

impl Instruction {
    /// Whether a translated block must end after this instruction
    pub fn ends_block(&self) -> bool {
        match self {
            Self::Branch { .. }
            | Self::BranchCond { .. }
            | Self::CompareBranch { .. }
            | Self::TestBranch { .. }
            | Self::BranchReg { .. }
            | Self::Ret { .. }
            | Self::InstructionBarrier
            | Self::InstructionCache { .. }
            | Self::Svc { .. }
            | Self::Brk { .. }
            | Self::Udf { .. }
            | Self::Unknown(_) => true,
            Self::DataCache { op, .. } => *op != DataCacheOp::ZeroByVa,
            Self::Hint(op) => *op != HintOp::Nop,
            _ => false,
        }
    }
}

#[inline]
fn bits(raw: u32, hi: u32, lo: u32) -> u32 {
    (raw >> lo) & ((1 << (hi - lo + 1)) - 1)
}

#[inline]
fn bit(raw: u32, pos: u32) -> bool {
    (raw >> pos) & 1 != 0
}

#[inline]
fn reg(raw: u32, lo: u32) -> u8 {
    bits(raw, lo + 4, lo) as u8
}

fn sign_extend(value: u32, width: u32) -> i64 {
    let shift = 64 - width;
    ((value as i64) << shift) >> shift
}

/// Expand an N:immr:imms logical immediate. `None` for reserved encodings.
pub fn decode_bit_masks(sf: bool, n: bool, imms: u8, immr: u8) -> Option<u64> {
    if !sf && n {
        return None;
    }
    let combined = ((n as u32) << 6) | (!(imms as u32) & 0x3F);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len == 0 {
        return None;
    }
    let esize = 1u32 << len;
    let levels = esize - 1;
    let s = imms as u32 & levels;
    let r = immr as u32 & levels;
    if s == levels {
        return None;
    }

    let emask = if esize == 64 { u64::MAX } else { (1u64 << esize) - 1 };
    let welem = (1u64 << (s + 1)) - 1;
    let elem = if r == 0 {
        welem
    } else {
        ((welem >> r) | (welem << (esize - r))) & emask
    };

    let mut result = 0u64;
    let mut pos = 0;
    while pos < 64 {
        result |= elem << pos;
        pos += esize;
    }
    Some(if sf { result } else { result & 0xFFFF_FFFF })
}

/// Decode a single instruction word
pub fn decode(raw: u32) -> Instruction {
    match bits(raw, 28, 25) {
        0b1000 | 0b1001 => decode_dp_imm(raw),
        0b1010 | 0b1011 => decode_branch_system(raw),
        0b0100 | 0b0110 | 0b1100 | 0b1110 => decode_load_store(raw),
        0b0101 | 0b1101 => decode_dp_reg(raw),
        0b0000 if bits(raw, 31, 16) == 0 => Instruction::Udf {
            imm: bits(raw, 15, 0) as u16,
        },
        _ => Instruction::Unknown(raw),
    }
}

fn decode_dp_imm(raw: u32) -> Instruction {
    let sf = bit(raw, 31);
    let rd = reg(raw, 0);
    let rn = reg(raw, 5);

    match bits(raw, 25, 23) {
        0b000 | 0b001 => {
            let immlo = bits(raw, 30, 29);
            let immhi = bits(raw, 23, 5);
            Instruction::Adr {
                rd,
                offset: sign_extend((immhi << 2) | immlo, 21),
                page: sf,
            }
        }
        0b010 => {
            let imm12 = bits(raw, 21, 10) as u64;
            let imm = if bit(raw, 22) { imm12 << 12 } else { imm12 };
            Instruction::AddSubImm {
                sf,
                sub: bit(raw, 30),
                set_flags: bit(raw, 29),
                rd,
                rn,
                imm,
            }
        }
        0b100 => {
            let op = logical_op(bits(raw, 30, 29));
            match decode_bit_masks(sf, bit(raw, 22), bits(raw, 15, 10) as u8, bits(raw, 21, 16) as u8) {
                Some(imm) => Instruction::LogicalImm { sf, op, rd, rn, imm },
                None => Instruction::Unknown(raw),
            }
        }
        0b101 => {
            let hw = bits(raw, 22, 21) as u8;
            let op = match bits(raw, 30, 29) {
                0b00 => MoveWideOp::Movn,
                0b10 => MoveWideOp::Movz,
                0b11 => MoveWideOp::Movk,
                _ => return Instruction::Unknown(raw),
            };
            if !sf && hw >= 2 {
                return Instruction::Unknown(raw);
            }
            Instruction::MoveWide {
                sf,
                op,
                rd,
                imm16: bits(raw, 20, 5) as u16,
                shift: hw * 16,
            }
        }
        0b110 => {
            let op = match bits(raw, 30, 29) {
                0b00 => BitfieldOp::Sbfm,
                0b01 => BitfieldOp::Bfm,
                0b10 => BitfieldOp::Ubfm,
                _ => return Instruction::Unknown(raw),
            };
            let immr = bits(raw, 21, 16) as u8;
            let imms = bits(raw, 15, 10) as u8;
            if bit(raw, 22) != sf || (!sf && (immr >= 32 || imms >= 32)) {
                return Instruction::Unknown(raw);
            }
            Instruction::Bitfield { sf, op, rd, rn, immr, imms }
        }
        _ => Instruction::Unknown(raw),
    }
}

fn logical_op(opc: u32) -> LogicalOp {
    match opc {
        0b00 => LogicalOp::And,
        0b01 => LogicalOp::Orr,
        0b10 => LogicalOp::Eor,
        _ => LogicalOp::Ands,
    }
}

fn decode_branch_system(raw: u32) -> Instruction {
    if bits(raw, 30, 26) == 0b00101 {
        return Instruction::Branch {
            link: bit(raw, 31),
            offset: sign_extend(bits(raw, 25, 0), 26) << 2,
        };
    }

    if bits(raw, 30, 25) == 0b011010 {
        return Instruction::CompareBranch {
            sf: bit(raw, 31),
            nonzero: bit(raw, 24),
            rt: reg(raw, 0),
            offset: sign_extend(bits(raw, 23, 5), 19) << 2,
        };
    }

    if bits(raw, 30, 25) == 0b011011 {
        return Instruction::TestBranch {
            nonzero: bit(raw, 24),
            rt: reg(raw, 0),
            bit: ((bits(raw, 31, 31) << 5) | bits(raw, 23, 19)) as u8,
            offset: sign_extend(bits(raw, 18, 5), 14) << 2,
        };
    }

    if bits(raw, 31, 24) == 0b0101_0100 && !bit(raw, 4) {
        return Instruction::BranchCond {
            cond: bits(raw, 3, 0) as u8,
            offset: sign_extend(bits(raw, 23, 5), 19) << 2,
        };
    }

    if bits(raw, 31, 24) == 0b1101_0100 {
        let imm = bits(raw, 20, 5) as u16;
        return match (bits(raw, 23, 21), bits(raw, 4, 0)) {
            (0b000, 0b00001) => Instruction::Svc { imm },
            (0b001, 0b00000) => Instruction::Brk { imm },
            _ => Instruction::Unknown(raw),
        };
    }

    if bits(raw, 31, 25) == 0b1101011 {
        if bits(raw, 20, 10) != 0b11111_000000 || bits(raw, 4, 0) != 0 {
            return Instruction::Unknown(raw);
        }
        let rn = reg(raw, 5);
        return match bits(raw, 24, 21) {
            0b0000 => Instruction::BranchReg { link: false, rn },
            0b0001 => Instruction::BranchReg { link: true, rn },
            0b0010 => Instruction::Ret { rn },
            _ => Instruction::Unknown(raw),
        };
    }

    if bits(raw, 31, 22) == 0b1101010100 {
        return decode_system(raw);
    }

    Instruction::Unknown(raw)
}

fn decode_system(raw: u32) -> Instruction {
    let rt = reg(raw, 0);

    // Hints
    if raw & 0xFFFF_F01F == 0xD503_201F {
        return Instruction::Hint(match bits(raw, 11, 5) {
            1 => HintOp::Yield,
            2 => HintOp::Wfe,
            3 => HintOp::Wfi,
            4 => HintOp::Sev,
            5 => HintOp::Sevl,
            _ => HintOp::Nop,
        });
    }

    // Barriers and CLREX
    if raw & 0xFFFF_F01F == 0xD503_301F {
        return match bits(raw, 7, 5) {
            0b010 => Instruction::ClearExclusive,
            0b100 | 0b101 => Instruction::Barrier,
            0b110 => Instruction::InstructionBarrier,
            _ => Instruction::Unknown(raw),
        };
    }

    // SYS: cache maintenance
    if raw & 0xFFF8_0000 == 0xD508_0000 {
        let op1 = bits(raw, 18, 16);
        let crn = bits(raw, 15, 12);
        let crm = bits(raw, 11, 8);
        let op2 = bits(raw, 7, 5);
        if crn != 7 {
            return Instruction::Unknown(raw);
        }
        let data = match (op1, crm, op2) {
            (3, 4, 1) => Some(DataCacheOp::ZeroByVa),
            (0, 6, 1) => Some(DataCacheOp::InvalidateByVaToPoc),
            (0, 6, 2) => Some(DataCacheOp::InvalidateBySetWay),
            (3, 10, 1) => Some(DataCacheOp::CleanByVaToPoc),
            (0, 10, 2) => Some(DataCacheOp::CleanBySetWay),
            (3, 11, 1) => Some(DataCacheOp::CleanByVaToPou),
            (3, 14, 1) => Some(DataCacheOp::CleanAndInvalidateByVaToPoc),
            (0, 14, 2) => Some(DataCacheOp::CleanAndInvalidateBySetWay),
            _ => None,
        };
        if let Some(op) = data {
            return Instruction::DataCache { op, rt };
        }
        let instruction = match (op1, crm, op2) {
            (0, 5, 0) => Some(InstructionCacheOp::InvalidateAllToPou),
            (0, 1, 0) => Some(InstructionCacheOp::InvalidateAllToPouInnerShareable),
            (3, 5, 1) => Some(InstructionCacheOp::InvalidateByVaToPou),
            _ => None,
        };
        return match instruction {
            Some(op) => Instruction::InstructionCache { op, rt },
            None => Instruction::Unknown(raw),
        };
    }

    // MRS / MSR (register)
    if raw & 0xFFD0_0000 == 0xD510_0000 {
        let read = bit(raw, 21);
        return match SystemRegister::from_encoding(bits(raw, 20, 5)) {
            Some(reg) if read => Instruction::Mrs { rt, reg },
            Some(reg) if reg.is_writable() => Instruction::Msr { rt, reg },
            _ => Instruction::Unknown(raw),
        };
    }

    Instruction::Unknown(raw)
}

fn decode_load_store(raw: u32) -> Instruction {
    let vector = bit(raw, 26);

    // Load/store exclusive and ordered
    if bits(raw, 29, 24) == 0b001000 {
        return decode_exclusive(raw);
    }

    // Load register (literal)
    if bits(raw, 29, 27) == 0b011 && bits(raw, 25, 24) == 0 && !vector {
        let rt = reg(raw, 0);
        let offset = sign_extend(bits(raw, 23, 5), 19) << 2;
        return match bits(raw, 31, 30) {
            0b00 => Instruction::LoadLiteral { op: MemOp::Load, size: 2, rt, offset },
            0b01 => Instruction::LoadLiteral { op: MemOp::Load, size: 3, rt, offset },
            0b10 => Instruction::LoadLiteral { op: MemOp::LoadSigned { to_64: true }, size: 2, rt, offset },
            _ => Instruction::Unknown(raw),
        };
    }

    // Load/store pair
    if bits(raw, 29, 27) == 0b101 {
        return decode_pair(raw);
    }

    // Load/store register
    if bits(raw, 29, 27) == 0b111 {
        return decode_register(raw);
    }

    Instruction::Unknown(raw)
}

fn decode_exclusive(raw: u32) -> Instruction {
    let size = bits(raw, 31, 30) as u8;
    let ordered = bit(raw, 23);
    let load = bit(raw, 22);
    let pair = bit(raw, 21);
    let rs = reg(raw, 16);
    let acquire_release = bit(raw, 15);
    let rt2 = reg(raw, 10);
    let rn = reg(raw, 5);
    let rt = reg(raw, 0);

    match (ordered, pair, load) {
        (false, false, true) => Instruction::LoadExclusive { size, rt, rn },
        (false, false, false) => Instruction::StoreExclusive { size, rs, rt, rn },
        (false, true, true) if size >= 2 => Instruction::LoadExclusivePair { size, rt, rt2, rn },
        (false, true, false) if size >= 2 => Instruction::StoreExclusivePair { size, rs, rt, rt2, rn },
        (true, false, true) if acquire_release => Instruction::LoadAcquire { size, rt, rn },
        (true, false, false) if acquire_release => Instruction::StoreRelease { size, rt, rn },
        _ => Instruction::Unknown(raw),
    }
}

fn decode_pair(raw: u32) -> Instruction {
    let opc = bits(raw, 31, 30);
    let vector = bit(raw, 26);
    let load = bit(raw, 22);
    let rt2 = reg(raw, 10);
    let rn = reg(raw, 5);
    let rt = reg(raw, 0);

    let size = match (vector, opc) {
        (false, 0b00) => 2,
        (false, 0b10) => 3,
        (true, 0b00) => 2,
        (true, 0b01) => 3,
        (true, 0b10) => 4,
        _ => return Instruction::Unknown(raw),
    };
    let offset = sign_extend(bits(raw, 21, 15), 7) << size;
    let addressing = match bits(raw, 24, 23) {
        0b00 | 0b10 => Addressing::Offset(offset),
        0b01 => Addressing::PostIndex(offset),
        _ => Addressing::PreIndex(offset),
    };

    Instruction::LoadStorePair { load, vector, size, rt, rt2, rn, addressing }
}

fn decode_register(raw: u32) -> Instruction {
    let size = bits(raw, 31, 30) as u8;
    let vector = bit(raw, 26);
    let opc = bits(raw, 23, 22);
    let rn = reg(raw, 5);
    let rt = reg(raw, 0);

    let (op, size) = if vector {
        match (size, opc) {
            (s, 0b00) => (MemOp::StoreVector, s),
            (s, 0b01) => (MemOp::LoadVector, s),
            (0, 0b10) => (MemOp::StoreVector, 4),
            (0, 0b11) => (MemOp::LoadVector, 4),
            _ => return Instruction::Unknown(raw),
        }
    } else {
        match (size, opc) {
            (s, 0b00) => (MemOp::Store, s),
            (s, 0b01) => (MemOp::Load, s),
            (0..=2, 0b10) => (MemOp::LoadSigned { to_64: true }, size),
            (0 | 1, 0b11) => (MemOp::LoadSigned { to_64: false }, size),
            _ => return Instruction::Unknown(raw),
        }
    };

    let addressing = if bit(raw, 24) {
        Addressing::Offset((bits(raw, 21, 10) as i64) << size)
    } else if !bit(raw, 21) {
        let imm9 = sign_extend(bits(raw, 20, 12), 9);
        match bits(raw, 11, 10) {
            0b01 => Addressing::PostIndex(imm9),
            0b11 => Addressing::PreIndex(imm9),
            _ => Addressing::Offset(imm9),
        }
    } else if bits(raw, 11, 10) == 0b10 {
        let extend = match bits(raw, 15, 13) {
            0b010 => Extend::Uxtw,
            0b011 => Extend::Lsl,
            0b110 => Extend::Sxtw,
            0b111 => Extend::Sxtx,
            _ => return Instruction::Unknown(raw),
        };
        Addressing::Register {
            rm: reg(raw, 16),
            extend,
            shift: if bit(raw, 12) { size } else { 0 },
        }
    } else {
        return Instruction::Unknown(raw);
    };

    Instruction::LoadStore { op, size, rt, rn, addressing }
}

fn decode_dp_reg(raw: u32) -> Instruction {
    let sf = bit(raw, 31);
    let rd = reg(raw, 0);
    let rn = reg(raw, 5);
    let rm = reg(raw, 16);

    // Logical (shifted register)
    if bits(raw, 28, 24) == 0b01010 {
        let amount = bits(raw, 15, 10) as u8;
        if !sf && amount >= 32 {
            return Instruction::Unknown(raw);
        }
        return Instruction::LogicalReg {
            sf,
            op: logical_op(bits(raw, 30, 29)),
            invert: bit(raw, 21),
            rd,
            rn,
            rm,
            shift: ShiftType::from_bits(bits(raw, 23, 22)),
            amount,
        };
    }

    // Add/subtract (shifted register)
    if bits(raw, 28, 24) == 0b01011 && !bit(raw, 21) {
        let shift = bits(raw, 23, 22);
        let amount = bits(raw, 15, 10) as u8;
        if shift == 0b11 || (!sf && amount >= 32) {
            return Instruction::Unknown(raw);
        }
        return Instruction::AddSubReg {
            sf,
            sub: bit(raw, 30),
            set_flags: bit(raw, 29),
            rd,
            rn,
            rm,
            shift: ShiftType::from_bits(shift),
            amount,
        };
    }

    // Conditional select
    if bits(raw, 29, 21) == 0b0_1101_0100 && !bit(raw, 11) {
        let op = match (bit(raw, 30), bit(raw, 10)) {
            (false, false) => CondSelectOp::Csel,
            (false, true) => CondSelectOp::Csinc,
            (true, false) => CondSelectOp::Csinv,
            (true, true) => CondSelectOp::Csneg,
        };
        return Instruction::CondSelect {
            sf,
            op,
            rd,
            rn,
            rm,
            cond: bits(raw, 15, 12) as u8,
        };
    }

    // Data-processing (2 source)
    if bits(raw, 30, 21) == 0b00_1101_0110 {
        let op = match bits(raw, 15, 10) {
            0b000010 => DataProc2Op::Udiv,
            0b000011 => DataProc2Op::Sdiv,
            0b001000 => DataProc2Op::Lslv,
            0b001001 => DataProc2Op::Lsrv,
            0b001010 => DataProc2Op::Asrv,
            0b001011 => DataProc2Op::Rorv,
            _ => return Instruction::Unknown(raw),
        };
        return Instruction::DataProc2 { sf, op, rd, rn, rm };
    }

    // Data-processing (3 source): MADD/MSUB only
    if bits(raw, 30, 21) == 0b00_1101_1000 {
        return Instruction::MulAdd {
            sf,
            sub: bit(raw, 15),
            rd,
            rn,
            rm,
            ra: reg(raw, 10),
        };
    }

    Instruction::Unknown(raw)
}
