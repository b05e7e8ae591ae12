//! Operating-system service boundary consumed by the execution cores

use crate::registers::RegisterFacade;
use nx_core::error::CpuError;
use nx_core::{CoreIndex, VAddr};

/// Host-side OS layer a core calls into.
///
/// `service_call` runs on the core's own host thread, from inside
/// [`crate::ExecutionCore::execute`]. Arguments and results travel in guest
/// registers through the façade. The handler may block. An `Err` is treated
/// as an engine fault and stops the core; guest-visible failures belong in
/// the guest's result register instead.
pub trait OperatingSystem: Send + Sync {
    /// Copy guest memory into `buf`
    fn read_memory(&self, addr: VAddr, buf: &mut [u8]) -> bool;

    /// Copy `data` into guest memory
    fn write_memory(&self, addr: VAddr, data: &[u8]) -> bool;

    /// Dispatch supervisor call `number` issued by `core`
    fn service_call(
        &self,
        core: CoreIndex,
        number: u32,
        regs: &mut RegisterFacade<'_>,
    ) -> Result<(), CpuError>;

    /// Monotonic host tick count at the console base clock rate
    fn cpu_ticks(&self) -> u64;
}
