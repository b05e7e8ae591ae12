//! Boot helpers for the kernel tests
#![allow(dead_code)]

use nx_core::config::Config;
use nx_kernel::process::ProcessParams;
use nx_kernel::{Process, System, Thread};
use nx_memory::{
    PageFlags, ALIAS_REGION_BASE, CODE_REGION_BASE, STACK_REGION_BASE,
};
use std::sync::Arc;

pub const CODE: u64 = CODE_REGION_BASE;
/// RW page the guest programs report results into
pub const SCRATCH: u64 = ALIAS_REGION_BASE;
pub const PRIORITY: u32 = 44;

/// A64 encodings used by the guest programs
pub mod asm {
    pub fn movz(rd: u32, imm16: u32, shift: u32) -> u32 {
        0xD280_0000 | (shift / 16) << 21 | (imm16 & 0xFFFF) << 5 | rd
    }

    pub fn movk(rd: u32, imm16: u32, shift: u32) -> u32 {
        0xF280_0000 | (shift / 16) << 21 | (imm16 & 0xFFFF) << 5 | rd
    }

    pub fn add_x(rd: u32, rn: u32, imm12: u32) -> u32 {
        0x9100_0000 | (imm12 & 0xFFF) << 10 | rn << 5 | rd
    }

    /// `mov wd, wm`
    pub fn mov_w(rd: u32, rm: u32) -> u32 {
        0x2A00_03E0 | rm << 16 | rd
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

    pub fn b(offset: i32) -> u32 {
        0x1400_0000 | ((offset / 4) as u32 & 0x03FF_FFFF)
    }

    pub fn svc(imm: u32) -> u32 {
        0xD400_0001 | (imm & 0xFFFF) << 5
    }

    pub const ISB: u32 = 0xD503_3FDF;

    /// `x9 = SCRATCH`
    pub fn load_scratch() -> u32 {
        movz(9, 0x2, 32)
    }
}

pub fn config(multi_core: bool, core_count: usize) -> Config {
    let mut config = Config::default();
    config.cpu.use_multi_core = multi_core;
    config.cpu.core_count = core_count;
    config
}

/// Place routines at their offsets from [`CODE`] in one code page
pub fn layout(routines: &[(u64, &[u32])]) -> Vec<u32> {
    let mut words = vec![0u32; 0x1000 / 4];
    for (offset, code) in routines {
        let start = (*offset / 4) as usize;
        words[start..start + code.len()].copy_from_slice(code);
    }
    words
}

/// System with `code` at [`CODE`], a scratch page and an application
/// process, but no threads yet
pub fn boot(config: Config, code: &[u32]) -> (System, Arc<Process>) {
    let system = System::initialize(config).unwrap();
    let memory = system.memory();

    let bytes: Vec<u8> = code.iter().flat_map(|w| w.to_le_bytes()).collect();
    let code_size = (bytes.len() as u64 + 0xFFF) & !0xFFF;
    memory.map(CODE, code_size, PageFlags::RW).unwrap();
    memory.write(CODE, &bytes).unwrap();
    memory.protect(CODE, code_size, PageFlags::RX).unwrap();
    memory.map(SCRATCH, 0x1000, PageFlags::RW).unwrap();
    memory.map(STACK_REGION_BASE, 0x10000, PageFlags::RW).unwrap();

    let kernel = system.kernel();
    let process = kernel
        .create_application_process(ProcessParams {
            title_id: 0x0100_0000_0000_1000,
            name: "test".to_string(),
            code_base: CODE,
            code_size,
            ideal_core: 0,
            core_mask: kernel.all_cores_mask(),
        })
        .unwrap();
    (system, process)
}

/// Create and start a thread at `entry` pinned to `core`
pub fn spawn(system: &System, process: &Arc<Process>, entry: u64, core: i32) -> Arc<Thread> {
    let kernel = system.kernel();
    let stack_top = STACK_REGION_BASE + 0x1000 * (core as u64 + 1);
    let thread = kernel
        .create_thread(process, entry, 0, stack_top, PRIORITY, core)
        .unwrap();
    kernel.start_thread(&thread).unwrap();
    thread
}

pub fn scratch_32(system: &System, offset: u64) -> u32 {
    let bytes = system.memory().read_bytes(SCRATCH + offset, 4).unwrap();
    u32::from_le_bytes(bytes.try_into().unwrap())
}

pub fn scratch_64(system: &System, offset: u64) -> u64 {
    let bytes = system.memory().read_bytes(SCRATCH + offset, 8).unwrap();
    u64::from_le_bytes(bytes.try_into().unwrap())
}
