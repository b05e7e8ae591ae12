//! Guest programs driven end to end through System::run

mod common;

use common::{asm, boot, config, layout, scratch_32, scratch_64, spawn, CODE, SCRATCH};
use nx_core::error::{CpuError, EmulatorError};
use nx_kernel::process::syscalls::{memory_state, MemoryInfo};
use nx_kernel::process::ProcessState;
use nx_kernel::result;
use nx_kernel::svc_numbers::*;
use nx_cpu::host_ticks_to_cntpct;
use nx_memory::HEAP_REGION_BASE;
use std::time::{Duration, Instant};

#[test]
fn test_exit_process_multi_core() {
    let (mut system, process) = boot(config(true, 4), &[asm::svc(SVC_EXIT_PROCESS)]);
    spawn(&system, &process, CODE, 0);

    system.run().unwrap();
    assert!(system.kernel().is_exited());
    assert_eq!(process.state(), ProcessState::Exited);
    system.shutdown();
}

#[test]
fn test_exit_process_single_core() {
    let (mut system, process) = boot(config(false, 2), &[asm::svc(SVC_EXIT_PROCESS)]);
    spawn(&system, &process, CODE, 1);

    system.run().unwrap();
    assert_eq!(process.state(), ProcessState::Exited);
}

#[test]
fn test_last_thread_exit_ends_process() {
    let (mut system, process) = boot(config(true, 1), &[asm::svc(SVC_EXIT_THREAD)]);
    spawn(&system, &process, CODE, 0);

    system.run().unwrap();
    assert_eq!(process.state(), ProcessState::Exited);
    assert_eq!(system.kernel().scheduler().lock().thread_count(), 0);
}

#[test]
fn test_memory_syscalls_and_unknown_svc() {
    let program = [
        asm::load_scratch(),
        // svcSetHeapSize(0x200000)
        asm::movz(1, 0x20, 16),
        asm::svc(SVC_SET_HEAP_SIZE),
        asm::str_w(0, 9, 0x00),
        asm::str_x(1, 9, 0x08),
        // svcGetInfo(HeapRegionAddress, CURRENT_PROCESS, 0)
        asm::movz(1, 4, 0),
        asm::movz(2, 0x8000, 0),
        asm::movk(2, 0xFFFF, 16),
        asm::movz(3, 0, 0),
        asm::svc(SVC_GET_INFO),
        asm::str_w(0, 9, 0x10),
        asm::str_x(1, 9, 0x18),
        // no such SVC
        asm::svc(0x7F),
        asm::str_w(0, 9, 0x20),
        // svcQueryMemory(SCRATCH + 0x100, 0, CODE)
        asm::add_x(0, 9, 0x100),
        asm::movz(2, 0x0800, 16),
        asm::svc(SVC_QUERY_MEMORY),
        asm::str_w(0, 9, 0x28),
        asm::svc(SVC_EXIT_PROCESS),
    ];
    let (mut system, process) = boot(config(false, 1), &program);
    spawn(&system, &process, CODE, 0);
    system.run().unwrap();

    assert_eq!(scratch_32(&system, 0x00), 0);
    assert_eq!(scratch_64(&system, 0x08), HEAP_REGION_BASE);
    assert_eq!(process.heap_size(), 0x20_0000);
    assert!(system.memory().is_mapped(HEAP_REGION_BASE + 0x1F_F000));

    assert_eq!(scratch_32(&system, 0x10), 0);
    assert_eq!(scratch_64(&system, 0x18), HEAP_REGION_BASE);

    assert_eq!(scratch_32(&system, 0x20), result::NOT_IMPLEMENTED.raw());
    assert_eq!(scratch_32(&system, 0x20), 0x4201);

    assert_eq!(scratch_32(&system, 0x28), 0);
    let bytes = system
        .memory()
        .read_bytes(SCRATCH + 0x100, std::mem::size_of::<MemoryInfo>())
        .unwrap();
    let info: MemoryInfo = bytemuck::pod_read_unaligned(&bytes);
    assert_eq!(info.base_address, CODE);
    assert_eq!(info.size, 0x1000);
    assert_eq!(info.state, memory_state::CODE);
    assert_eq!(info.permission, 0b101);
}

#[test]
fn test_info_handle_and_debug_syscalls() {
    let program = [
        asm::load_scratch(),
        asm::svc(SVC_GET_SYSTEM_TICK),
        asm::str_x(0, 9, 0x00),
        // svcGetProcessId(CURRENT_PROCESS)
        asm::movz(1, 0x8000, 0),
        asm::movk(1, 0xFFFF, 16),
        asm::svc(SVC_GET_PROCESS_ID),
        asm::str_w(0, 9, 0x08),
        asm::str_x(1, 9, 0x10),
        // svcCloseHandle(bogus)
        asm::movz(0, 0x1234, 0),
        asm::svc(SVC_CLOSE_HANDLE),
        asm::str_w(0, 9, 0x18),
        // svcOutputDebugString(unmapped, 4)
        asm::movz(0, 0x10, 0),
        asm::movz(1, 4, 0),
        asm::svc(SVC_OUTPUT_DEBUG_STRING),
        asm::str_w(0, 9, 0x1C),
        // svcOutputDebugString(SCRATCH + 0x100, 5)
        asm::add_x(0, 9, 0x100),
        asm::movz(1, 5, 0),
        asm::svc(SVC_OUTPUT_DEBUG_STRING),
        asm::str_w(0, 9, 0x20),
        asm::svc(SVC_EXIT_PROCESS),
    ];
    let mut config = config(true, 1);
    config.debug.trace_svc = true;
    let (mut system, process) = boot(config, &program);
    assert!(system.kernel().trace_svc());
    system.memory().write(SCRATCH + 0x100, b"hello").unwrap();
    spawn(&system, &process, CODE, 0);

    let before = host_ticks_to_cntpct(system.kernel().timing().ticks());
    system.run().unwrap();
    let after = host_ticks_to_cntpct(system.kernel().timing().ticks());

    let tick = scratch_64(&system, 0x00);
    assert!(before <= tick && tick <= after);
    assert_eq!(scratch_32(&system, 0x08), 0);
    assert_eq!(scratch_64(&system, 0x10), process.pid);
    assert_eq!(scratch_32(&system, 0x18), result::INVALID_HANDLE.raw());
    assert_eq!(scratch_32(&system, 0x1C), result::INVALID_ADDRESS.raw());
    assert_eq!(scratch_32(&system, 0x20), 0);
}

#[test]
fn test_raised_priority_runs_first_after_yield() {
    let main = [
        asm::load_scratch(),
        // svcCreateThread(entry = CODE + 0x100, arg 0, stack, prio 50, core 0)
        asm::movz(1, 0x0100, 0),
        asm::movk(1, 0x0800, 16),
        asm::movz(2, 0, 0),
        asm::movz(3, 0x3000, 0),
        asm::movk(3, 0x12, 32),
        asm::movz(4, 50, 0),
        asm::movz(5, 0, 0),
        asm::svc(SVC_CREATE_THREAD),
        asm::mov_w(19, 1),
        asm::mov_w(0, 19),
        asm::svc(SVC_START_THREAD),
        // svcSetThreadPriority(child, 10) while the child is ready
        asm::mov_w(0, 19),
        asm::movz(1, 10, 0),
        asm::svc(SVC_SET_THREAD_PRIORITY),
        asm::str_w(0, 9, 0x00),
        // svcGetThreadPriority(child)
        asm::mov_w(1, 19),
        asm::svc(SVC_GET_THREAD_PRIORITY),
        asm::str_w(0, 9, 0x04),
        asm::str_x(1, 9, 0x08),
        // yield, then record what the child left behind
        asm::movz(0, 0, 0),
        asm::svc(SVC_SLEEP_THREAD),
        asm::ldr_w(2, 9, 0x10),
        asm::str_w(2, 9, 0x14),
        asm::svc(SVC_EXIT_PROCESS),
    ];
    let child = [
        asm::load_scratch(),
        asm::movz(2, 0x77, 0),
        asm::str_w(2, 9, 0x10),
        asm::svc(SVC_EXIT_THREAD),
    ];
    let mut config = config(false, 1);
    config.cpu.time_slice_us = 1_000_000;
    let (mut system, process) = boot(config, &layout(&[(0, &main[..]), (0x100, &child[..])]));
    spawn(&system, &process, CODE, 0);
    system.run().unwrap();

    assert_eq!(scratch_32(&system, 0x00), 0);
    assert_eq!(scratch_32(&system, 0x04), 0);
    assert_eq!(scratch_64(&system, 0x08), 10);
    // At priority 50 the child would still be queued behind main (44)
    assert_eq!(scratch_32(&system, 0x14), 0x77);
}

#[test]
fn test_thread_created_by_guest_runs_on_its_core() {
    let main = [
        asm::load_scratch(),
        // svcCreateThread(entry = CODE + 0x100, arg = 7, stack, prio 44, core 1)
        asm::movz(1, 0x0100, 0),
        asm::movk(1, 0x0800, 16),
        asm::movz(2, 7, 0),
        asm::movz(3, 0x3000, 0),
        asm::movk(3, 0x12, 32),
        asm::movz(4, 44, 0),
        asm::movz(5, 1, 0),
        asm::svc(SVC_CREATE_THREAD),
        asm::str_w(0, 9, 0x10),
        // svcStartThread(handle)
        asm::mov_w(0, 1),
        asm::svc(SVC_START_THREAD),
        asm::svc(SVC_EXIT_THREAD),
    ];
    let child = [
        asm::load_scratch(),
        asm::str_x(0, 9, 0x00),
        // svcGetThreadId(CURRENT_THREAD)
        asm::movz(1, 0x8001, 0),
        asm::movk(1, 0xFFFF, 16),
        asm::svc(SVC_GET_THREAD_ID),
        asm::str_x(1, 9, 0x08),
        asm::svc(SVC_GET_CURRENT_PROCESSOR_NUMBER),
        asm::str_w(0, 9, 0x18),
        asm::svc(SVC_EXIT_PROCESS),
    ];
    let (mut system, process) = boot(config(true, 2), &layout(&[(0, &main[..]), (0x100, &child[..])]));
    let main_thread = spawn(&system, &process, CODE, 0);
    system.run().unwrap();

    assert_eq!(scratch_32(&system, 0x10), 0);
    assert_eq!(scratch_64(&system, 0x00), 7);
    let child_id = scratch_64(&system, 0x08);
    assert_ne!(child_id, 0);
    assert_ne!(child_id, main_thread.id);
    assert_eq!(scratch_32(&system, 0x18), 1);
}

#[test]
fn test_yield_lets_peer_run() {
    let first = [
        asm::load_scratch(),
        asm::movz(0, 0, 0),
        asm::svc(SVC_SLEEP_THREAD),
        asm::ldr_w(1, 9, 0x00),
        asm::str_w(1, 9, 0x08),
        asm::svc(SVC_EXIT_PROCESS),
    ];
    let second = [
        asm::load_scratch(),
        asm::movz(2, 2, 0),
        asm::str_w(2, 9, 0x00),
        asm::svc(SVC_EXIT_THREAD),
    ];
    let mut config = config(false, 1);
    config.cpu.time_slice_us = 1_000_000;
    let (mut system, process) = boot(config, &layout(&[(0, &first[..]), (0x100, &second[..])]));
    spawn(&system, &process, CODE, 0);
    spawn(&system, &process, CODE + 0x100, 0);
    system.run().unwrap();

    // x9 survived the switch and the peer's store was visible
    assert_eq!(scratch_32(&system, 0x08), 2);
}

#[test]
fn test_sleep_blocks_for_duration() {
    let program = [
        // 2 ms
        asm::movz(0, 0x8480, 0),
        asm::movk(0, 0x1E, 16),
        asm::svc(SVC_SLEEP_THREAD),
        asm::svc(SVC_EXIT_PROCESS),
    ];
    let (mut system, process) = boot(config(true, 1), &program);
    spawn(&system, &process, CODE, 0);

    let start = Instant::now();
    system.run().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(2));
}

#[test]
fn test_preemption_rotates_equal_priority_threads() {
    let spinner = [asm::b(0)];
    let exiter = [asm::svc(SVC_EXIT_PROCESS)];
    let mut config = config(false, 1);
    config.cpu.time_slice_us = 1_000;
    let (mut system, process) = boot(config, &layout(&[(0, &spinner[..]), (0x100, &exiter[..])]));
    spawn(&system, &process, CODE, 0);
    spawn(&system, &process, CODE + 0x100, 0);

    system.run().unwrap();
    assert_eq!(process.state(), ProcessState::Exited);
}

#[test]
fn test_fatal_break_terminates_process() {
    let program = [asm::movz(0, 0, 0), asm::movz(1, 0x1234, 0), asm::svc(SVC_BREAK)];
    let (mut system, process) = boot(config(true, 1), &program);
    spawn(&system, &process, CODE, 0);

    system.run().unwrap();
    let info = system.kernel().break_info().unwrap();
    assert_eq!(info.reason, 0);
    assert_eq!(info.info1, 0x1234);
    assert_eq!(process.state(), ProcessState::Exited);
}

#[test]
fn test_notification_break_continues() {
    let program = [
        asm::load_scratch(),
        asm::movz(0, 0x8000, 16),
        asm::svc(SVC_BREAK),
        asm::str_w(0, 9, 0x00),
        asm::svc(SVC_EXIT_PROCESS),
    ];
    let (mut system, process) = boot(config(true, 1), &program);
    system.memory().write(SCRATCH, &[0xFF; 4]).unwrap();
    spawn(&system, &process, CODE, 0);

    system.run().unwrap();
    assert_eq!(scratch_32(&system, 0x00), 0);
    assert!(system.kernel().break_info().is_none());
}

#[test]
fn test_engine_fault_stops_every_core() {
    let faulting = [asm::ISB];
    let spinner = [asm::b(0)];
    let (mut system, process) = boot(config(true, 2), &layout(&[(0, &faulting[..]), (0x100, &spinner[..])]));
    spawn(&system, &process, CODE + 0x100, 1);
    spawn(&system, &process, CODE, 0);

    let err = system.run().unwrap_err();
    assert!(matches!(
        err,
        EmulatorError::Cpu(CpuError::InstructionSynchronizationBarrier { .. })
    ));
    assert!(system.kernel().is_exited());
}

#[test]
fn test_run_without_threads_fails() {
    let (mut system, _process) = boot(config(true, 1), &[asm::svc(SVC_EXIT_PROCESS)]);
    assert!(matches!(system.run(), Err(EmulatorError::Kernel(_))));
}
