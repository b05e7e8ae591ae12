//! Supervisor call dispatcher
//!
//! Arguments arrive in X0-X7 and results leave in W0 (the [`ResultCode`])
//! plus X1.. for output values, following the Horizon calling convention.
//! A bogus SVC number is the guest's problem: it gets `NOT_IMPLEMENTED` in
//! W0 and execution continues. Only register-façade violations, which are
//! host bugs, come back as `Err`.

use crate::kernel::{BreakInfo, Kernel, SwitchRequest};
use crate::process::syscalls as process_sc;
use crate::result::{self, ResultCode};
use crate::svc_numbers::*;
use crate::thread::syscalls as thread_sc;
use nx_core::error::{CpuError, KernelError};
use nx_core::CoreIndex;
use nx_cpu::{Register, RegisterFacade};

/// Upper bound on a single svcOutputDebugString message
const MAX_DEBUG_STRING: u64 = 0x1000;

/// Bit 31 of the svcBreak reason: report only, keep running
const BREAK_NOTIFICATION_ONLY: u64 = 0x8000_0000;

fn arg(regs: &RegisterFacade<'_>, index: u8) -> Result<u64, CpuError> {
    regs.get_64(Register::X(index))
}

fn set_result(regs: &mut RegisterFacade<'_>, code: ResultCode) -> Result<(), CpuError> {
    regs.set_32(Register::W(0), code.raw())
}

/// W0 = result, X1 = value on success
fn set_outcome(
    regs: &mut RegisterFacade<'_>,
    number: u32,
    outcome: Result<u64, KernelError>,
) -> Result<(), CpuError> {
    match outcome {
        Ok(value) => {
            set_result(regs, ResultCode::SUCCESS)?;
            regs.set_64(Register::X(1), value)
        }
        Err(e) => {
            tracing::debug!("{} failed: {}", svc_name(number), e);
            set_result(regs, ResultCode::from(&e))
        }
    }
}

/// W0 = result
fn set_status(
    regs: &mut RegisterFacade<'_>,
    number: u32,
    outcome: Result<(), KernelError>,
) -> Result<(), CpuError> {
    let code = match outcome {
        Ok(()) => ResultCode::SUCCESS,
        Err(e) => {
            tracing::debug!("{} failed: {}", svc_name(number), e);
            ResultCode::from(&e)
        }
    };
    set_result(regs, code)
}

/// Run supervisor call `number` for the thread on `core`
pub fn dispatch(
    kernel: &Kernel,
    core: CoreIndex,
    number: u32,
    regs: &mut RegisterFacade<'_>,
) -> Result<(), CpuError> {
    if kernel.trace_svc() {
        tracing::info!(
            "Core {} svc 0x{:02x} {} (pc 0x{:x})",
            core,
            number,
            svc_name(number),
            regs.get_64(Register::Pc)?
        );
    } else {
        tracing::trace!("Core {} svc 0x{:02x} {}", core, number, svc_name(number));
    }

    match number {
        SVC_SET_HEAP_SIZE => {
            let size = arg(regs, 1)?;
            let outcome = process_sc::svc_set_heap_size(kernel, core, size);
            set_outcome(regs, number, outcome)?;
        }

        SVC_QUERY_MEMORY => {
            let info_address = arg(regs, 0)?;
            let address = arg(regs, 2)?;
            let outcome = process_sc::svc_query_memory(kernel, info_address, address);
            // X1 carries the page info, always zero here
            set_outcome(regs, number, outcome.map(|()| 0))?;
        }

        SVC_EXIT_PROCESS => {
            tracing::info!("Guest requested process exit on core {}", core);
            kernel.exit_process();
        }

        SVC_CREATE_THREAD => {
            let entry = arg(regs, 1)?;
            let argument = arg(regs, 2)?;
            let stack_top = arg(regs, 3)?;
            let priority = arg(regs, 4)? as u32;
            let ideal_core = arg(regs, 5)? as u32 as i32;
            let outcome = thread_sc::svc_create_thread(
                kernel, core, entry, argument, stack_top, priority, ideal_core,
            );
            set_outcome(regs, number, outcome.map(u64::from))?;
        }

        SVC_START_THREAD => {
            let handle = arg(regs, 0)? as u32;
            let outcome = thread_sc::svc_start_thread(kernel, core, handle);
            set_status(regs, number, outcome)?;
        }

        SVC_EXIT_THREAD => {
            kernel.request_switch(core, SwitchRequest::Exit);
        }

        SVC_SLEEP_THREAD => {
            let ns = arg(regs, 0)? as i64;
            let request = if ns > 0 {
                SwitchRequest::Sleep(kernel.timing().deadline_after_ns(ns as u64))
            } else {
                // 0, -1 and -2 are the yield variants
                SwitchRequest::Yield
            };
            kernel.request_switch(core, request);
        }

        SVC_GET_THREAD_PRIORITY => {
            let handle = arg(regs, 1)? as u32;
            let outcome = thread_sc::svc_get_thread_priority(kernel, core, handle);
            set_outcome(regs, number, outcome.map(u64::from))?;
        }

        SVC_SET_THREAD_PRIORITY => {
            let handle = arg(regs, 0)? as u32;
            let priority = arg(regs, 1)? as u32;
            let outcome = thread_sc::svc_set_thread_priority(kernel, core, handle, priority);
            set_status(regs, number, outcome)?;
        }

        SVC_GET_CURRENT_PROCESSOR_NUMBER => {
            regs.set_32(Register::W(0), core as u32)?;
        }

        SVC_CLOSE_HANDLE => {
            let handle = arg(regs, 0)? as u32;
            let outcome = process_sc::svc_close_handle(kernel, core, handle);
            set_status(regs, number, outcome)?;
        }

        SVC_GET_SYSTEM_TICK => {
            regs.set_64(Register::X(0), kernel.timing().cntpct())?;
        }

        SVC_GET_PROCESS_ID => {
            let handle = arg(regs, 1)? as u32;
            let outcome = process_sc::svc_get_process_id(kernel, core, handle);
            set_outcome(regs, number, outcome)?;
        }

        SVC_GET_THREAD_ID => {
            let handle = arg(regs, 1)? as u32;
            let outcome = thread_sc::svc_get_thread_id(kernel, core, handle);
            set_outcome(regs, number, outcome)?;
        }

        SVC_BREAK => {
            let info = BreakInfo {
                reason: arg(regs, 0)?,
                info1: arg(regs, 1)?,
                info2: arg(regs, 2)?,
            };
            if info.reason & BREAK_NOTIFICATION_ONLY != 0 {
                tracing::info!(
                    "Guest break notification: reason=0x{:x} info1=0x{:x} info2=0x{:x}",
                    info.reason,
                    info.info1,
                    info.info2
                );
                set_result(regs, ResultCode::SUCCESS)?;
            } else {
                tracing::error!(
                    "Guest break on core {}: reason=0x{:x} info1=0x{:x} info2=0x{:x}",
                    core,
                    info.reason,
                    info.info1,
                    info.info2
                );
                kernel.record_break(info);
                kernel.exit_process();
            }
        }

        SVC_OUTPUT_DEBUG_STRING => {
            let address = arg(regs, 0)?;
            let length = arg(regs, 1)?.min(MAX_DEBUG_STRING);
            let outcome = kernel
                .memory()
                .read_bytes(address, length as usize)
                .map_err(|_| KernelError::InvalidAddress(address))
                .map(|bytes| {
                    let text = String::from_utf8_lossy(&bytes);
                    tracing::info!("[guest] {}", text.trim_end());
                });
            set_status(regs, number, outcome)?;
        }

        SVC_GET_INFO => {
            let id = arg(regs, 1)? as u32;
            let handle = arg(regs, 2)? as u32;
            let sub_id = arg(regs, 3)?;
            let outcome = process_sc::svc_get_info(kernel, core, id, handle, sub_id);
            set_outcome(regs, number, outcome)?;
        }

        _ => {
            tracing::warn!(
                "Unimplemented svc 0x{:02x} on core {} (pc 0x{:x})",
                number,
                core,
                regs.get_64(Register::Pc)?
            );
            set_result(regs, result::NOT_IMPLEMENTED)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{KernelObject, ProcessParams, CURRENT_PROCESS_HANDLE, CURRENT_THREAD_HANDLE};
    use crate::thread::Thread;
    use crate::timing::CoreTiming;
    use nx_core::config::Config;
    use nx_cpu::{host_ticks_to_cntpct, InvalidationBus, RegisterFile, TlsRegisters};
    use nx_memory::{AddressSpace, PageFlags, ALIAS_REGION_BASE, CODE_REGION_BASE};
    use std::sync::Arc;

    /// Kernel with an application process whose started thread runs on core 0
    fn setup(config: &Config) -> (Arc<Kernel>, Arc<Thread>) {
        let memory = AddressSpace::new();
        memory.map(ALIAS_REGION_BASE, 0x1000, PageFlags::RW).unwrap();
        let kernel = Kernel::new(
            memory,
            Arc::new(CoreTiming::new()),
            Arc::new(InvalidationBus::new()),
            None,
            config,
        );
        let process = kernel
            .create_application_process(ProcessParams {
                title_id: 0x0100_0000_0000_3000,
                name: "svc".to_string(),
                code_base: CODE_REGION_BASE,
                code_size: 0x1000,
                ideal_core: 0,
                core_mask: 0b1,
            })
            .unwrap();
        let thread = kernel
            .create_thread(&process, CODE_REGION_BASE, 0, 0, 44, 0)
            .unwrap();
        kernel.start_thread(&thread).unwrap();
        kernel.set_current_thread(0, Some(thread.id));
        (kernel, thread)
    }

    fn call(kernel: &Kernel, number: u32, args: &[u64]) -> RegisterFile {
        let mut file = RegisterFile::default();
        file.x[..args.len()].copy_from_slice(args);
        let tls = TlsRegisters::new();
        dispatch(kernel, 0, number, &mut RegisterFacade::new(&mut file, &tls)).unwrap();
        file
    }

    fn w0(file: &RegisterFile) -> u32 {
        file.x[0] as u32
    }

    #[test]
    fn test_get_system_tick_matches_counter() {
        let (kernel, _thread) = setup(&Config::default());
        let before = host_ticks_to_cntpct(kernel.timing().ticks());
        let tick = call(&kernel, SVC_GET_SYSTEM_TICK, &[]).x[0];
        let after = host_ticks_to_cntpct(kernel.timing().ticks());
        assert!(before <= tick && tick <= after);
    }

    #[test]
    fn test_close_handle() {
        let (kernel, thread) = setup(&Config::default());
        let process = kernel.application_process().unwrap();
        let handle = process.add_handle(KernelObject::Thread(thread.id)).unwrap();

        assert_eq!(w0(&call(&kernel, SVC_CLOSE_HANDLE, &[u64::from(handle)])), 0);
        assert!(process.get_handle(handle).is_err());
        assert_eq!(
            w0(&call(&kernel, SVC_CLOSE_HANDLE, &[u64::from(handle)])),
            result::INVALID_HANDLE.raw()
        );
        assert_eq!(
            w0(&call(&kernel, SVC_CLOSE_HANDLE, &[0x1234])),
            result::INVALID_HANDLE.raw()
        );
        // The thread is still running, so closing its handle keeps it alive
        assert!(kernel.threads().get(thread.id).is_ok());
    }

    #[test]
    fn test_get_process_id() {
        let (kernel, thread) = setup(&Config::default());
        let pid = kernel.application_process().unwrap().pid;

        let regs = call(&kernel, SVC_GET_PROCESS_ID, &[0, u64::from(CURRENT_PROCESS_HANDLE)]);
        assert_eq!(w0(&regs), 0);
        assert_eq!(regs.x[1], pid);

        let process = kernel.application_process().unwrap();
        let thread_handle = process.add_handle(KernelObject::Thread(thread.id)).unwrap();
        let regs = call(&kernel, SVC_GET_PROCESS_ID, &[0, u64::from(thread_handle)]);
        assert_eq!(w0(&regs), result::INVALID_HANDLE.raw());
    }

    #[test]
    fn test_set_then_get_thread_priority() {
        let (kernel, thread) = setup(&Config::default());
        let current = u64::from(CURRENT_THREAD_HANDLE);

        assert_eq!(w0(&call(&kernel, SVC_SET_THREAD_PRIORITY, &[current, 20])), 0);
        let regs = call(&kernel, SVC_GET_THREAD_PRIORITY, &[0, current]);
        assert_eq!(w0(&regs), 0);
        assert_eq!(regs.x[1], 20);
        assert_eq!(kernel.scheduler().lock().priority(thread.id), Some(20));

        assert_eq!(
            w0(&call(&kernel, SVC_SET_THREAD_PRIORITY, &[current, 64])),
            result::INVALID_PRIORITY.raw()
        );
        assert_eq!(thread.priority(), 20);
        assert_eq!(
            w0(&call(&kernel, SVC_GET_THREAD_PRIORITY, &[0, 0x4321])),
            result::INVALID_HANDLE.raw()
        );
    }

    #[test]
    fn test_output_debug_string() {
        let (kernel, _thread) = setup(&Config::default());
        kernel.memory().write(ALIAS_REGION_BASE, b"hello\n").unwrap();

        assert_eq!(w0(&call(&kernel, SVC_OUTPUT_DEBUG_STRING, &[ALIAS_REGION_BASE, 6])), 0);
        assert_eq!(
            w0(&call(&kernel, SVC_OUTPUT_DEBUG_STRING, &[0x10, 4])),
            result::INVALID_ADDRESS.raw()
        );
        // A huge length is clamped but still runs off the end of the page
        assert_eq!(
            w0(&call(&kernel, SVC_OUTPUT_DEBUG_STRING, &[ALIAS_REGION_BASE + 6, u64::MAX])),
            result::INVALID_ADDRESS.raw()
        );
    }

    #[test]
    fn test_query_memory_to_unmapped_buffer() {
        let (kernel, _thread) = setup(&Config::default());
        let regs = call(&kernel, SVC_QUERY_MEMORY, &[0x10, 0, ALIAS_REGION_BASE]);
        assert_eq!(w0(&regs), result::INVALID_ADDRESS.raw());
    }

    #[test]
    fn test_unknown_svc_leaves_outputs() {
        let (kernel, _thread) = setup(&Config::default());
        let regs = call(&kernel, 0x55, &[1, 2, 3]);
        assert_eq!(w0(&regs), result::NOT_IMPLEMENTED.raw());
        assert_eq!(regs.x[1], 2);
        assert_eq!(regs.x[2], 3);
    }

    #[test]
    fn test_switching_calls_leave_requests() {
        let (kernel, _thread) = setup(&Config::default());
        call(&kernel, SVC_SLEEP_THREAD, &[0]);
        assert_eq!(kernel.take_switch(0), Some(SwitchRequest::Yield));
        call(&kernel, SVC_SLEEP_THREAD, &[-1i64 as u64]);
        assert_eq!(kernel.take_switch(0), Some(SwitchRequest::Yield));
        call(&kernel, SVC_SLEEP_THREAD, &[1_000_000]);
        assert!(matches!(kernel.take_switch(0), Some(SwitchRequest::Sleep(_))));
        call(&kernel, SVC_EXIT_THREAD, &[]);
        assert_eq!(kernel.take_switch(0), Some(SwitchRequest::Exit));
    }

    #[test]
    fn test_trace_svc_keeps_results() {
        let mut config = Config::default();
        config.debug.trace_svc = true;
        let (kernel, thread) = setup(&config);
        assert!(kernel.trace_svc());

        let regs = call(&kernel, SVC_GET_THREAD_ID, &[0, u64::from(CURRENT_THREAD_HANDLE)]);
        assert_eq!(w0(&regs), 0);
        assert_eq!(regs.x[1], thread.id);
        assert_eq!(w0(&call(&kernel, 0x7E, &[])), result::NOT_IMPLEMENTED.raw());
    }
}
