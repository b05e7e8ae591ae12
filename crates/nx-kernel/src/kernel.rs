//! Kernel state shared by every core
//!
//! [`Kernel`] is the [`OperatingSystem`] the execution cores call into. It
//! owns the process and thread tables, the scheduler and the record of which
//! guest thread each core is running. Supervisor calls that give up the core
//! (yield, sleep, exit) leave a [`SwitchRequest`] that the core's run loop
//! applies once the thread's registers have been saved.

use crate::process::{
    KernelObject, Process, ProcessManager, ProcessParams, ProcessState, CURRENT_PROCESS_HANDLE,
    CURRENT_THREAD_HANDLE,
};
use crate::scheduler::{Scheduler, LOWEST_PRIORITY};
use crate::svc;
use crate::thread::{Thread, ThreadManager, ThreadParams, ThreadState};
use crate::timing::CoreTiming;
use nx_core::config::Config;
use nx_core::error::{CpuError, KernelError};
use nx_core::{CoreIndex, Handle, ThreadId, VAddr, NUM_CPU_CORES};
use nx_cpu::{CoreHandle, HaltReason, InvalidationBus, MonitorHandle, OperatingSystem, RegisterFacade};
use nx_memory::{AddressSpace, GuestMemory};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sentinel for "no thread" in the per-core current-thread slots
const NO_THREAD: u64 = 0;

/// What a core's run loop must do with its thread after a supervisor call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchRequest {
    /// Back of the ready queue
    Yield,
    /// Park until the given tick
    Sleep(u64),
    /// The thread is finished
    Exit,
}

/// Guest break recorded by svcBreak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakInfo {
    pub reason: u64,
    pub info1: u64,
    pub info2: u64,
}

/// Horizon kernel (HLE)
pub struct Kernel {
    memory: Arc<AddressSpace>,
    timing: Arc<CoreTiming>,
    /// Reaches every core's translated-code cache
    invalidation: Arc<InvalidationBus>,
    monitor: Option<MonitorHandle>,
    processes: ProcessManager,
    threads: ThreadManager,
    scheduler: Mutex<Scheduler>,
    /// Thread running on each core, [`NO_THREAD`] when idle
    current: [AtomicU64; NUM_CPU_CORES],
    switches: [Mutex<Option<SwitchRequest>>; NUM_CPU_CORES],
    cores: RwLock<Vec<CoreHandle>>,
    application: RwLock<Option<Arc<Process>>>,
    exited: AtomicBool,
    break_info: Mutex<Option<BreakInfo>>,
    /// Wakes idle run loops when work appears
    idle_lock: Mutex<()>,
    idle: Condvar,
    core_count: usize,
    trace_svc: bool,
}

impl Kernel {
    pub fn new(
        memory: Arc<AddressSpace>,
        timing: Arc<CoreTiming>,
        invalidation: Arc<InvalidationBus>,
        monitor: Option<MonitorHandle>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            memory,
            timing,
            invalidation,
            monitor,
            processes: ProcessManager::new(),
            threads: ThreadManager::new(),
            scheduler: Mutex::new(Scheduler::new()),
            current: std::array::from_fn(|_| AtomicU64::new(NO_THREAD)),
            switches: std::array::from_fn(|_| Mutex::new(None)),
            cores: RwLock::new(Vec::new()),
            application: RwLock::new(None),
            exited: AtomicBool::new(false),
            break_info: Mutex::new(None),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            core_count: config.cpu.core_count.clamp(1, NUM_CPU_CORES),
            trace_svc: config.debug.trace_svc,
        })
    }

    pub fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    pub fn timing(&self) -> &CoreTiming {
        &self.timing
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    pub fn scheduler(&self) -> &Mutex<Scheduler> {
        &self.scheduler
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// Affinity mask covering every emulated core
    pub fn all_cores_mask(&self) -> u64 {
        (1u64 << self.core_count) - 1
    }

    pub fn trace_svc(&self) -> bool {
        self.trace_svc
    }

    /// Store into guest memory on the guest's behalf.
    ///
    /// Breaks every exclusive reservation on the written bytes and queues the
    /// range for invalidation on every core when it touches executable pages.
    pub fn write_guest(&self, addr: VAddr, data: &[u8]) -> bool {
        let size = data.len() as u64;
        let stored = match self.monitor.as_ref().and_then(MonitorHandle::get) {
            Some(monitor) => monitor.external_store(addr, size, |memory| memory.write_block(addr, data)),
            None => self.memory.write_block(addr, data),
        };
        if stored && size > 0 {
            let last = addr.saturating_add(size - 1);
            if self.memory.is_executable(addr) || self.memory.is_executable(last) {
                tracing::debug!("OS write to code 0x{:x}+0x{:x}", addr, size);
                self.invalidation.publish(addr, size);
            }
        }
        stored
    }

    /// Give the kernel control over the cores it may need to stop
    pub fn attach_cores(&self, handles: Vec<CoreHandle>) {
        *self.cores.write() = handles;
    }

    /// Create the application process. Only one may exist.
    pub fn create_application_process(
        &self,
        params: ProcessParams,
    ) -> Result<Arc<Process>, KernelError> {
        let mut application = self.application.write();
        if application.is_some() {
            return Err(KernelError::InvalidState(
                "application process already exists".to_string(),
            ));
        }
        let process = self.processes.create(params);
        *application = Some(Arc::clone(&process));
        Ok(process)
    }

    pub fn application_process(&self) -> Option<Arc<Process>> {
        self.application.read().clone()
    }

    /// Create a thread in `process` without starting it
    pub fn create_thread(
        &self,
        process: &Arc<Process>,
        entry: VAddr,
        argument: u64,
        stack_top: VAddr,
        priority: u32,
        ideal_core: i32,
    ) -> Result<Arc<Thread>, KernelError> {
        if priority > LOWEST_PRIORITY {
            return Err(KernelError::InvalidPriority(priority));
        }
        if ideal_core < 0 || ideal_core as usize >= self.core_count {
            return Err(KernelError::InvalidCoreId(ideal_core));
        }
        // New threads are pinned to their ideal core
        let core_mask = 1u64 << ideal_core;
        if process.core_mask & core_mask == 0 {
            return Err(KernelError::InvalidCoreId(ideal_core));
        }

        let tls_address = process.allocate_tls(&self.memory)?;
        let thread = self.threads.create(ThreadParams {
            process_id: process.pid,
            entry,
            argument,
            stack_top,
            priority,
            ideal_core,
            core_mask,
            tls_address,
        });
        process.add_thread(thread.id);
        Ok(thread)
    }

    /// Undo [`Kernel::create_thread`] for a thread that never started
    pub fn destroy_thread(&self, thread: &Thread) {
        if let Ok(process) = self.processes.get(thread.process_id) {
            process.free_tls(thread.tls_address);
            process.remove_thread(thread.id);
        }
        let _ = self.threads.remove(thread.id);
    }

    /// Hand a created thread to the scheduler
    pub fn start_thread(&self, thread: &Thread) -> Result<(), KernelError> {
        if thread.state() != ThreadState::Created {
            return Err(KernelError::InvalidState(format!(
                "thread {} is not startable ({:?})",
                thread.id,
                thread.state()
            )));
        }
        self.scheduler
            .lock()
            .add_thread(thread.id, thread.priority(), thread.core_mask)?;
        thread.set_state(ThreadState::Started);

        if let Ok(process) = self.processes.get(thread.process_id) {
            if process.state() == ProcessState::Created {
                process.set_state(ProcessState::Running);
            }
        }
        self.notify_work();
        Ok(())
    }

    /// Retire a thread that has left its core for good
    pub fn terminate_thread(&self, thread: &Thread) {
        thread.set_state(ThreadState::Terminated);
        self.scheduler.lock().remove_thread(thread.id);

        if let Ok(process) = self.processes.get(thread.process_id) {
            process.free_tls(thread.tls_address);
            process.remove_thread(thread.id);
            if !process.references(KernelObject::Thread(thread.id)) {
                let _ = self.threads.remove(thread.id);
            }
        }
        tracing::debug!("Thread {} terminated", thread.id);
    }

    pub fn current_thread_id(&self, core: CoreIndex) -> Option<ThreadId> {
        let id = self.current.get(core)?.load(Ordering::Acquire);
        (id != NO_THREAD).then_some(id)
    }

    pub fn set_current_thread(&self, core: CoreIndex, id: Option<ThreadId>) {
        if let Some(slot) = self.current.get(core) {
            slot.store(id.unwrap_or(NO_THREAD), Ordering::Release);
        }
    }

    pub fn current_thread(&self, core: CoreIndex) -> Result<Arc<Thread>, KernelError> {
        let id = self
            .current_thread_id(core)
            .ok_or_else(|| KernelError::InvalidState(format!("no thread on core {}", core)))?;
        self.threads.get(id)
    }

    /// Process of the thread running on `core`, or the application process
    /// when the core is idle
    pub fn current_process(&self, core: CoreIndex) -> Result<Arc<Process>, KernelError> {
        if let Ok(thread) = self.current_thread(core) {
            return self.processes.get(thread.process_id);
        }
        self.application_process()
            .ok_or_else(|| KernelError::InvalidState("no application process".to_string()))
    }

    /// Resolve a handle, pseudo-handles included, to a thread
    pub fn resolve_thread(&self, core: CoreIndex, handle: Handle) -> Result<Arc<Thread>, KernelError> {
        if handle == CURRENT_THREAD_HANDLE {
            return self.current_thread(core);
        }
        match self.current_process(core)?.get_handle(handle)? {
            KernelObject::Thread(id) => self.threads.get(id),
            KernelObject::Process(_) => Err(KernelError::InvalidHandle(handle)),
        }
    }

    /// Resolve a handle, pseudo-handles included, to a process
    pub fn resolve_process(&self, core: CoreIndex, handle: Handle) -> Result<Arc<Process>, KernelError> {
        let process = self.current_process(core)?;
        if handle == CURRENT_PROCESS_HANDLE {
            return Ok(process);
        }
        match process.get_handle(handle)? {
            KernelObject::Process(pid) => self.processes.get(pid),
            KernelObject::Thread(_) => Err(KernelError::InvalidHandle(handle)),
        }
    }

    /// Drop the kernel's side of a closed handle
    pub fn release_object(&self, process: &Process, object: KernelObject) {
        if let KernelObject::Thread(id) = object {
            let terminated = self
                .threads
                .get(id)
                .is_ok_and(|thread| thread.state() == ThreadState::Terminated);
            if terminated && !process.references(object) {
                let _ = self.threads.remove(id);
            }
        }
    }

    pub fn request_switch(&self, core: CoreIndex, request: SwitchRequest) {
        if let Some(slot) = self.switches.get(core) {
            *slot.lock() = Some(request);
        }
    }

    pub fn take_switch(&self, core: CoreIndex) -> Option<SwitchRequest> {
        self.switches.get(core)?.lock().take()
    }

    /// Terminate the application and stop every core
    pub fn exit_process(&self) {
        if let Some(process) = self.application_process() {
            if process.state() != ProcessState::Exited {
                process.set_state(ProcessState::Exited);
                tracing::info!("Application process {} exited", process.pid);
            }
        }
        self.shutdown();
    }

    /// Halt every attached core with `Stopped` and release idle run loops
    pub fn shutdown(&self) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        for core in self.cores.read().iter() {
            core.halt_execution(HaltReason::Stopped);
        }
        self.notify_work();
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn record_break(&self, info: BreakInfo) {
        *self.break_info.lock() = Some(info);
    }

    /// Break raised by the guest, if any
    pub fn break_info(&self) -> Option<BreakInfo> {
        *self.break_info.lock()
    }

    /// Block an idle run loop for at most `timeout` or until work appears
    pub fn wait_for_work(&self, timeout: Duration) {
        let mut guard = self.idle_lock.lock();
        if self.is_exited() {
            return;
        }
        self.idle.wait_for(&mut guard, timeout);
    }

    pub fn notify_work(&self) {
        let _guard = self.idle_lock.lock();
        self.idle.notify_all();
    }
}

impl OperatingSystem for Kernel {
    fn read_memory(&self, addr: VAddr, buf: &mut [u8]) -> bool {
        self.memory.read_block(addr, buf)
    }

    fn write_memory(&self, addr: VAddr, data: &[u8]) -> bool {
        self.write_guest(addr, data)
    }

    fn service_call(
        &self,
        core: CoreIndex,
        number: u32,
        regs: &mut RegisterFacade<'_>,
    ) -> Result<(), CpuError> {
        svc::dispatch(self, core, number, regs)
    }

    fn cpu_ticks(&self) -> u64 {
        self.timing.ticks()
    }
}
