//! AArch64 execution engine for oxidized-nx
//!
//! This crate owns everything between the guest instruction stream and the
//! host-side operating system layer:
//!
//! - [`ExclusiveMonitor`]: load-exclusive/store-exclusive reservations shared
//!   by every core of a system
//! - [`ExecutionCore`]: one emulated core wrapping a [`Translator`] with a
//!   `Run`/`Halt` state machine and targeted cache invalidation
//! - [`CpuManager`]: the per-system factory for monitors and cores
//! - [`RegisterFacade`]: width-checked access to the guest register file
//!
//! ## Usage
//!
//! ```ignore
//! use nx_cpu::{CoreInfo, CpuManager, Register};
//!
//! let manager = CpuManager::new(&config.cpu);
//! manager.initialize();
//! let monitor = manager.create_exclusive_monitor(memory.clone(), 4);
//! let mut core = manager.create_execution_core(monitor.as_ref(), info, 0)?;
//! core.registers().set_64(Register::Pc, entry)?;
//! let reason = core.execute()?;
//! ```

pub mod counter;
pub mod exclusive_monitor;
pub mod executor;
pub mod invalidation;
pub mod manager;
pub mod os;
pub mod registers;
pub mod translator;

pub use counter::{host_ticks_to_cntpct, BASE_CLOCK_RATE, CNTFREQ};
pub use exclusive_monitor::ExclusiveMonitor;
pub use executor::{CoreHandle, CoreInfo, CoreState, ExecutionCore, HaltReason};
pub use invalidation::InvalidationBus;
pub use manager::{CpuBackend, CpuManager, InterpreterBackend, MonitorHandle};
pub use os::OperatingSystem;
pub use registers::{Register, RegisterFacade, RegisterFile, ThreadContext, TlsRegisters};
pub use translator::{BlockTranslator, HaltHandle, Translator, TranslatorConfig, TranslatorHalt};
