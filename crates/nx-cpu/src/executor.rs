//! Execution core
//!
//! An [`ExecutionCore`] owns one translator and drives it through
//! `execute()`. While the translator runs, every memory, exclusive and
//! supervisor-call hook comes back into [`CoreEnv`] on the same host thread.
//!
//! ```text
//!          execute()               halt / svc / break
//!   Idle ────────────▶ Running ─────────────────────▶ Idle
//!                         │
//!                         │ Stopped halt or CpuError
//!                         ▼
//!                      Stopped (terminal)
//! ```

use crate::counter::host_ticks_to_cntpct;
use crate::exclusive_monitor::ExclusiveMonitor;
use crate::invalidation::InvalidationBus;
use crate::os::OperatingSystem;
use crate::registers::{RegisterFacade, RegisterFile, ThreadContext, TlsRegisters};
use crate::translator::{
    DataCacheOp, Exception, HaltHandle, InstructionCacheOp, Translator, TranslatorEnv,
    TranslatorHalt,
};
use nx_core::error::CpuError;
use nx_core::{CoreIndex, VAddr};
use nx_memory::GuestMemory;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

const HALT_SUPERVISOR_CALL: TranslatorHalt = TranslatorHalt::USER_DEFINED_1;
const HALT_BREAK_LOOP: TranslatorHalt = TranslatorHalt::USER_DEFINED_2;
const HALT_STOPPED: TranslatorHalt = TranslatorHalt::USER_DEFINED_3;

/// Why `execute()` returned to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaltReason {
    /// Host asked the core to yield, e.g. for preemption
    BreakLoop,
    /// The guest issued `SVC` and the service has already run
    SupervisorCall,
    /// The core was shut down and cannot run again
    Stopped,
}

impl HaltReason {
    fn to_halt(self) -> TranslatorHalt {
        match self {
            Self::BreakLoop => HALT_BREAK_LOOP,
            Self::SupervisorCall => HALT_SUPERVISOR_CALL,
            Self::Stopped => HALT_STOPPED,
        }
    }

    /// Map the translator's halt set to a reason.
    ///
    /// `Stopped` wins over everything else. A supervisor call that raced a
    /// break request is reported first and the break is re-armed for the
    /// next run. An empty set or any bit this core never requests is an
    /// engine fault.
    fn from_halt(halt: TranslatorHalt, handle: &HaltHandle) -> Result<Self, CpuError> {
        let known = HALT_SUPERVISOR_CALL | HALT_BREAK_LOOP | HALT_STOPPED;
        if halt.is_empty() || !known.contains(halt) {
            return Err(CpuError::UnknownHaltReason(halt.bits()));
        }
        if halt.contains(HALT_STOPPED) {
            return Ok(Self::Stopped);
        }
        if halt.contains(HALT_SUPERVISOR_CALL) {
            if halt.contains(HALT_BREAK_LOOP) {
                handle.request(HALT_BREAK_LOOP);
            }
            return Ok(Self::SupervisorCall);
        }
        Ok(Self::BreakLoop)
    }
}

/// Lifecycle of a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Idle,
    Running,
    Stopped,
}

/// Collaborators a core borrows from its system
#[derive(Clone)]
pub struct CoreInfo {
    pub memory: Arc<dyn GuestMemory>,
    pub os: Arc<dyn OperatingSystem>,
}

/// Thread-safe control surface of a core
#[derive(Clone)]
pub struct CoreHandle {
    index: CoreIndex,
    halt: HaltHandle,
    bus: Arc<InvalidationBus>,
}

impl CoreHandle {
    pub fn index(&self) -> CoreIndex {
        self.index
    }

    /// Ask the core to return from `execute()` at its next block boundary
    pub fn halt_execution(&self, reason: HaltReason) {
        self.halt.request(reason.to_halt());
    }

    /// Queue a translated-code invalidation for this core only
    pub fn request_cache_invalidation(&self, addr: VAddr, size: u64) {
        self.bus.publish_to(self.index, addr, size);
    }
}

/// One emulated CPU core
pub struct ExecutionCore {
    index: CoreIndex,
    translator: Box<dyn Translator>,
    halt: HaltHandle,
    tls: Arc<TlsRegisters>,
    monitor: Weak<ExclusiveMonitor>,
    memory: Arc<dyn GuestMemory>,
    os: Arc<dyn OperatingSystem>,
    bus: Arc<InvalidationBus>,
    state: CoreState,
}

impl ExecutionCore {
    pub(crate) fn new(
        index: CoreIndex,
        translator: Box<dyn Translator>,
        tls: Arc<TlsRegisters>,
        monitor: Weak<ExclusiveMonitor>,
        info: CoreInfo,
        bus: Arc<InvalidationBus>,
    ) -> Self {
        bus.register(index);
        Self {
            index,
            halt: translator.halt_handle(),
            translator,
            tls,
            monitor,
            memory: info.memory,
            os: info.os,
            bus,
            state: CoreState::Idle,
        }
    }

    pub fn index(&self) -> CoreIndex {
        self.index
    }

    pub fn state(&self) -> CoreState {
        self.state
    }

    /// Whether exclusive instructions on this core reach a live monitor
    pub fn has_monitor(&self) -> bool {
        self.monitor.strong_count() > 0
    }

    pub fn handle(&self) -> CoreHandle {
        CoreHandle {
            index: self.index,
            halt: self.halt.clone(),
            bus: Arc::clone(&self.bus),
        }
    }

    /// Run guest code from the current PC until the translator halts.
    ///
    /// Blocks the calling thread for the whole burst. An `Err` is an engine
    /// fault: the core moves to [`CoreState::Stopped`] with PC left at the
    /// faulting instruction.
    pub fn execute(&mut self) -> Result<HaltReason, CpuError> {
        if self.state == CoreState::Stopped {
            return Err(CpuError::CoreStopped(self.index));
        }
        self.state = CoreState::Running;

        if let Some(monitor) = self.monitor.upgrade() {
            monitor.clear_exclusive(self.index);
        }
        for (addr, size) in self.bus.take(self.index) {
            self.translator.invalidate_cache_range(addr, size);
        }

        let outcome = {
            let mut env = CoreEnv {
                index: self.index,
                memory: self.memory.as_ref(),
                os: self.os.as_ref(),
                monitor: &self.monitor,
                tls: &self.tls,
                bus: &self.bus,
                halt: &self.halt,
            };
            self.translator.run(&mut env)
        };

        match outcome.and_then(|halt| HaltReason::from_halt(halt, &self.halt)) {
            Ok(reason) => {
                self.state = if reason == HaltReason::Stopped {
                    CoreState::Stopped
                } else {
                    CoreState::Idle
                };
                trace!(
                    "Core {} halted with {:?} at pc 0x{:x}",
                    self.index,
                    reason,
                    self.translator.registers().pc
                );
                Ok(reason)
            }
            Err(e) => {
                error!(
                    "Core {} faulted at pc 0x{:x}: {}",
                    self.index,
                    self.translator.registers().pc,
                    e
                );
                self.state = CoreState::Stopped;
                Err(e)
            }
        }
    }

    /// Request an asynchronous return from `execute()`
    pub fn halt_execution(&self, reason: HaltReason) {
        self.halt.request(reason.to_halt());
    }

    /// Drop translated code overlapping `[addr, addr + size)`
    pub fn invalidate_cache_range(&mut self, addr: VAddr, size: u64) {
        debug!("Core {} invalidating 0x{:x}+0x{:x}", self.index, addr, size);
        self.translator.invalidate_cache_range(addr, size);
    }

    pub fn clear_cache(&mut self) {
        self.translator.clear_cache();
    }

    /// Register façade over this core's register file and TLS registers
    pub fn registers(&mut self) -> RegisterFacade<'_> {
        RegisterFacade::new(self.translator.registers_mut(), &self.tls)
    }

    pub fn save_context(&self) -> ThreadContext {
        ThreadContext {
            registers: self.translator.registers().clone(),
            tpidr_el0: self.tls.tpidr_el0(),
            tpidrro_el0: self.tls.tpidrro_el0(),
        }
    }

    pub fn load_context(&mut self, context: &ThreadContext) {
        self.registers().load_context(context);
    }

    /// Current guest CNTPCT_EL0
    pub fn cntpct(&self) -> u64 {
        host_ticks_to_cntpct(self.os.cpu_ticks())
    }
}

impl Drop for ExecutionCore {
    fn drop(&mut self) {
        self.bus.unregister(self.index);
    }
}

/// Hook table handed to the translator for one `execute()` call
struct CoreEnv<'a> {
    index: CoreIndex,
    memory: &'a dyn GuestMemory,
    os: &'a dyn OperatingSystem,
    monitor: &'a Weak<ExclusiveMonitor>,
    tls: &'a TlsRegisters,
    bus: &'a InvalidationBus,
    halt: &'a HaltHandle,
}

impl CoreEnv<'_> {
    /// Plain store that breaks other cores' reservations and keeps every
    /// core's translated code coherent with executable pages
    fn store<F>(&self, addr: VAddr, size: u64, store: F) -> bool
    where
        F: FnOnce(&dyn GuestMemory) -> bool,
    {
        let stored = match self.monitor.upgrade() {
            Some(monitor) => monitor.guarded_store(self.index, addr, size, store),
            None => store(self.memory),
        };
        if !stored {
            warn!(
                "Core {} failed {}-byte write to 0x{:x}",
                self.index, size, addr
            );
        } else if self.memory.is_executable(addr) {
            self.bus.publish(addr, size);
        }
        stored
    }

    fn unimplemented(&self, e: CpuError) -> CpuError {
        error!("Core {}: {}", self.index, e);
        e
    }
}

macro_rules! exclusive_hooks {
    ($($ty:ty => $read:ident, $write:ident, $plain_read:ident;)*) => {
        $(
            fn $read(&mut self, addr: VAddr) -> $ty {
                match self.monitor.upgrade() {
                    Some(monitor) => monitor.$read(self.index, addr),
                    None => self.memory.$plain_read(addr),
                }
            }

            fn $write(&mut self, addr: VAddr, value: $ty) -> bool {
                let Some(monitor) = self.monitor.upgrade() else {
                    return false;
                };
                let committed = monitor.$write(self.index, addr, value);
                if committed && self.memory.is_executable(addr) {
                    self.bus.publish(addr, std::mem::size_of::<$ty>() as u64);
                }
                committed
            }
        )*
    };
}

impl TranslatorEnv for CoreEnv<'_> {
    fn read_code(&mut self, addr: VAddr) -> Option<u32> {
        self.memory
            .is_executable(addr)
            .then(|| self.memory.read_32(addr))
    }

    fn read_8(&mut self, addr: VAddr) -> u8 {
        self.memory.read_8(addr)
    }

    fn read_16(&mut self, addr: VAddr) -> u16 {
        self.memory.read_16(addr)
    }

    fn read_32(&mut self, addr: VAddr) -> u32 {
        self.memory.read_32(addr)
    }

    fn read_64(&mut self, addr: VAddr) -> u64 {
        self.memory.read_64(addr)
    }

    fn read_128(&mut self, addr: VAddr) -> u128 {
        self.memory.read_128(addr)
    }

    fn write_8(&mut self, addr: VAddr, value: u8) -> bool {
        self.store(addr, 1, |mem| mem.write_8(addr, value))
    }

    fn write_16(&mut self, addr: VAddr, value: u16) -> bool {
        self.store(addr, 2, |mem| mem.write_16(addr, value))
    }

    fn write_32(&mut self, addr: VAddr, value: u32) -> bool {
        self.store(addr, 4, |mem| mem.write_32(addr, value))
    }

    fn write_64(&mut self, addr: VAddr, value: u64) -> bool {
        self.store(addr, 8, |mem| mem.write_64(addr, value))
    }

    fn write_128(&mut self, addr: VAddr, value: u128) -> bool {
        self.store(addr, 16, |mem| mem.write_128(addr, value))
    }

    exclusive_hooks! {
        u8 => exclusive_read_8, exclusive_write_8, read_8;
        u16 => exclusive_read_16, exclusive_write_16, read_16;
        u32 => exclusive_read_32, exclusive_write_32, read_32;
        u64 => exclusive_read_64, exclusive_write_64, read_64;
    }

    fn exclusive_read_128(&mut self, pc: u64, _addr: VAddr) -> Result<u128, CpuError> {
        Err(self.unimplemented(CpuError::ExclusiveAccess128 { pc }))
    }

    fn exclusive_write_128(&mut self, pc: u64, _addr: VAddr, _value: u128) -> Result<bool, CpuError> {
        Err(self.unimplemented(CpuError::ExclusiveAccess128 { pc }))
    }

    fn clear_exclusive(&mut self) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.clear_exclusive(self.index);
        }
    }

    fn call_supervisor(&mut self, number: u32, regs: &mut RegisterFile) -> Result<(), CpuError> {
        let mut facade = RegisterFacade::new(regs, self.tls);
        self.os.service_call(self.index, number, &mut facade)?;
        self.halt.request(HALT_SUPERVISOR_CALL);
        Ok(())
    }

    fn exception_raised(&mut self, pc: u64, exception: Exception) -> Result<(), CpuError> {
        match exception {
            Exception::Yield | Exception::WaitForEvent => {
                self.halt.request(HALT_BREAK_LOOP);
                Ok(())
            }
            Exception::SendEvent | Exception::SendEventLocal => Ok(()),
            _ => Err(self.unimplemented(CpuError::Exception {
                pc,
                exception: exception.name(),
            })),
        }
    }

    fn data_cache_operation(&mut self, pc: u64, op: DataCacheOp, addr: VAddr) -> Result<(), CpuError> {
        Err(self.unimplemented(CpuError::CacheOperation {
            pc,
            op: op.name(),
            addr,
        }))
    }

    fn instruction_cache_operation(
        &mut self,
        pc: u64,
        op: InstructionCacheOp,
        addr: VAddr,
    ) -> Result<(), CpuError> {
        Err(self.unimplemented(CpuError::CacheOperation {
            pc,
            op: op.name(),
            addr,
        }))
    }

    fn instruction_synchronization_barrier(&mut self, pc: u64) -> Result<(), CpuError> {
        Err(self.unimplemented(CpuError::InstructionSynchronizationBarrier { pc }))
    }

    fn interpreter_fallback(&mut self, pc: u64, opcode: u32) -> Result<(), CpuError> {
        Err(self.unimplemented(CpuError::UnimplementedInstruction { pc, opcode }))
    }

    fn cntpct(&mut self) -> u64 {
        host_ticks_to_cntpct(self.os.cpu_ticks())
    }

    fn take_invalidations(&mut self) -> Vec<(VAddr, u64)> {
        self.bus.take(self.index)
    }
}
