//! Shared fixtures for the execution core tests
#![allow(dead_code)]

use nx_core::config::CpuConfig;
use nx_core::error::CpuError;
use nx_core::{CoreIndex, VAddr};
use nx_cpu::{CoreInfo, CpuManager, MonitorHandle, OperatingSystem, Register, RegisterFacade};
use nx_memory::{AddressSpace, GuestMemory, PageFlags, CODE_REGION_BASE, HEAP_REGION_BASE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const CODE: u64 = CODE_REGION_BASE;
pub const DATA: u64 = HEAP_REGION_BASE;

/// Minimal A64 assembler for the instructions the tests need
pub mod asm {
    pub const NOP: u32 = 0xD503_201F;
    pub const YIELD: u32 = 0xD503_203F;
    pub const ISB: u32 = 0xD503_3FDF;
    pub const RET: u32 = 0xD65F_03C0;

    pub fn movz(rd: u32, imm16: u32, shift: u32) -> u32 {
        0xD280_0000 | (shift / 16) << 21 | (imm16 & 0xFFFF) << 5 | rd
    }

    pub fn movk(rd: u32, imm16: u32, shift: u32) -> u32 {
        0xF280_0000 | (shift / 16) << 21 | (imm16 & 0xFFFF) << 5 | rd
    }

    pub fn sub_x(rd: u32, rn: u32, imm12: u32) -> u32 {
        0xD100_0000 | (imm12 & 0xFFF) << 10 | rn << 5 | rd
    }

    pub fn add_w(rd: u32, rn: u32, imm12: u32) -> u32 {
        0x1100_0000 | (imm12 & 0xFFF) << 10 | rn << 5 | rd
    }

    pub fn add_x(rd: u32, rn: u32, imm12: u32) -> u32 {
        0x9100_0000 | (imm12 & 0xFFF) << 10 | rn << 5 | rd
    }

    pub fn ldxr_w(rt: u32, rn: u32) -> u32 {
        0x885F_7C00 | rn << 5 | rt
    }

    pub fn stxr_w(rs: u32, rt: u32, rn: u32) -> u32 {
        0x8800_7C00 | rs << 16 | rn << 5 | rt
    }

    pub fn ldxr_x(rt: u32, rn: u32) -> u32 {
        0xC85F_7C00 | rn << 5 | rt
    }

    pub fn stxr_x(rs: u32, rt: u32, rn: u32) -> u32 {
        0xC800_7C00 | rs << 16 | rn << 5 | rt
    }

    pub fn ldxp_x(rt: u32, rt2: u32, rn: u32) -> u32 {
        0xC87F_0000 | rt2 << 10 | rn << 5 | rt
    }

    pub fn str_w(rt: u32, rn: u32, offset: u32) -> u32 {
        0xB900_0000 | (offset / 4) << 10 | rn << 5 | rt
    }

    pub fn ldr_w(rt: u32, rn: u32, offset: u32) -> u32 {
        0xB940_0000 | (offset / 4) << 10 | rn << 5 | rt
    }

    pub fn str_x(rt: u32, rn: u32, offset: u32) -> u32 {
        0xF900_0000 | (offset / 8) << 10 | rn << 5 | rt
    }

    pub fn ldr_x(rt: u32, rn: u32, offset: u32) -> u32 {
        0xF940_0000 | (offset / 8) << 10 | rn << 5 | rt
    }

    pub fn b(offset: i32) -> u32 {
        0x1400_0000 | ((offset / 4) as u32 & 0x03FF_FFFF)
    }

    pub fn cbnz_w(rt: u32, offset: i32) -> u32 {
        0x3500_0000 | ((offset / 4) as u32 & 0x7FFFF) << 5 | rt
    }

    pub fn svc(imm: u32) -> u32 {
        0xD400_0001 | (imm & 0xFFFF) << 5
    }

    pub fn brk(imm: u32) -> u32 {
        0xD420_0000 | (imm & 0xFFFF) << 5
    }

    pub fn dc_civac(rt: u32) -> u32 {
        0xD50B_7E20 | rt
    }

    pub fn dc_zva(rt: u32) -> u32 {
        0xD50B_7420 | rt
    }

    pub fn ic_ivau(rt: u32) -> u32 {
        0xD50B_7520 | rt
    }

    pub fn mrs_tpidrro(rt: u32) -> u32 {
        0xD53B_D060 | rt
    }

    pub fn mrs_cntpct(rt: u32) -> u32 {
        0xD53B_E020 | rt
    }
}

/// Records every supervisor call and answers with `X0 = number`
pub struct TestOs {
    pub memory: Arc<AddressSpace>,
    pub calls: Mutex<Vec<(CoreIndex, u32)>>,
    pub ticks: AtomicU64,
}

impl TestOs {
    pub fn new(memory: Arc<AddressSpace>) -> Arc<Self> {
        Arc::new(Self {
            memory,
            calls: Mutex::new(Vec::new()),
            ticks: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> Vec<(CoreIndex, u32)> {
        self.calls.lock().clone()
    }
}

impl OperatingSystem for TestOs {
    fn read_memory(&self, addr: VAddr, buf: &mut [u8]) -> bool {
        self.memory.read_block(addr, buf)
    }

    fn write_memory(&self, addr: VAddr, data: &[u8]) -> bool {
        self.memory.write_block(addr, data)
    }

    fn service_call(
        &self,
        core: CoreIndex,
        number: u32,
        regs: &mut RegisterFacade<'_>,
    ) -> Result<(), CpuError> {
        self.calls.lock().push((core, number));
        regs.set_64(Register::X(0), number as u64)
    }

    fn cpu_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Address space with code at [`CODE`] and one RW page at [`DATA`]
pub struct Harness {
    pub memory: Arc<AddressSpace>,
    pub os: Arc<TestOs>,
    pub manager: CpuManager,
    pub monitor: Option<MonitorHandle>,
}

impl Harness {
    pub fn new(code: &[u32]) -> Self {
        Self::with_code_flags(code, PageFlags::RX)
    }

    pub fn with_code_flags(code: &[u32], flags: PageFlags) -> Self {
        let memory = AddressSpace::new();
        memory.map(CODE, 0x1000, PageFlags::RW).unwrap();
        let bytes: Vec<u8> = code.iter().flat_map(|w| w.to_le_bytes()).collect();
        memory.write(CODE, &bytes).unwrap();
        memory.protect(CODE, 0x1000, flags).unwrap();
        memory.map(DATA, 0x1000, PageFlags::RW).unwrap();

        let os = TestOs::new(memory.clone());
        let manager = CpuManager::new(&CpuConfig::default());
        manager.initialize();
        let monitor = manager.create_exclusive_monitor(memory.clone(), 4);

        Self {
            memory,
            os,
            manager,
            monitor,
        }
    }

    pub fn info(&self) -> CoreInfo {
        CoreInfo {
            memory: self.memory.clone(),
            os: self.os.clone(),
        }
    }

    /// Core `index` wired to this harness' monitor, PC at [`CODE`]
    pub fn core(&self, index: CoreIndex) -> nx_cpu::ExecutionCore {
        let mut core = self
            .manager
            .create_execution_core(self.monitor.as_ref(), self.info(), index)
            .unwrap();
        core.registers().set_64(Register::Pc, CODE).unwrap();
        core.registers().set_64(Register::Sp, DATA + 0x1000).unwrap();
        core
    }
}
