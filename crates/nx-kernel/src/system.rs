//! System: owns the address space, kernel, CPU manager and cores, and drives
//! guest threads on them
//!
//! Two run modes exist, chosen by `cpu.use_multi_core` and fixed for the
//! session:
//!
//! - multi-core: one host thread per emulated core, each looping over
//!   `execute()` for whatever guest thread the scheduler hands it
//! - single-core: every core is time-sliced on the calling host thread,
//!   round-robin
//!
//! In both modes a preemption timer halts busy cores with `BreakLoop` every
//! `cpu.time_slice_us`, which sends the running guest thread to the back of
//! its ready queue.

use crate::kernel::{Kernel, SwitchRequest};
use crate::timing::CoreTiming;
use crossbeam::channel::{self, Sender};
use nx_core::config::Config;
use nx_core::error::{CpuError, EmulatorError, KernelError, LoaderError};
use nx_core::{CoreIndex, Result};
use nx_cpu::{CoreHandle, CoreInfo, CpuManager, ExecutionCore, HaltReason, MonitorHandle};
use nx_memory::AddressSpace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Longest an idle core waits before re-checking the scheduler
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Outcome of one scheduling step on a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// A guest thread ran
    Ran,
    /// Nothing was runnable on this core
    Idle,
    /// The core has been stopped
    Finished,
}

/// Per-core "inside execute()" flags read by the preemption timer
type BusyFlags = Arc<Vec<AtomicBool>>;

/// Emulated console
pub struct System {
    config: Config,
    memory: Arc<AddressSpace>,
    kernel: Arc<Kernel>,
    cpu: CpuManager,
    monitor: Option<MonitorHandle>,
    cores: Vec<ExecutionCore>,
    handles: Vec<CoreHandle>,
}

impl System {
    /// Build the address space, kernel, CPU manager, monitor and cores
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate()?;
        let core_count = config.cpu.core_count;

        let memory = AddressSpace::new();
        let timing = Arc::new(CoreTiming::new());

        let cpu = CpuManager::new(&config.cpu);
        if !cpu.initialize() {
            return Err(EmulatorError::Unsupported(format!(
                "CPU backend '{}' failed to initialize",
                cpu.backend_name()
            )));
        }

        let monitor = if config.cpu.exclusive_monitor {
            cpu.create_exclusive_monitor(memory.clone(), core_count)
        } else {
            None
        };
        let kernel = Kernel::new(
            Arc::clone(&memory),
            timing,
            cpu.invalidation_bus(),
            monitor.clone(),
            &config,
        );

        let info = CoreInfo {
            memory: memory.clone(),
            os: kernel.clone(),
        };
        let cores = (0..core_count)
            .map(|index| cpu.create_execution_core(monitor.as_ref(), info.clone(), index))
            .collect::<std::result::Result<Vec<_>, CpuError>>()?;
        let handles: Vec<_> = cores.iter().map(ExecutionCore::handle).collect();
        kernel.attach_cores(handles.clone());

        info!(
            "System initialized: {} core(s), {} mode, {} backend",
            core_count,
            if config.cpu.use_multi_core { "multi-core" } else { "single-core" },
            cpu.backend_name()
        );

        Ok(Self {
            config,
            memory,
            kernel,
            cpu,
            monitor,
            cores,
            handles,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &Arc<AddressSpace> {
        &self.memory
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn cpu_manager(&self) -> &CpuManager {
        &self.cpu
    }

    pub fn monitor(&self) -> Option<&MonitorHandle> {
        self.monitor.as_ref()
    }

    pub fn core_count(&self) -> usize {
        self.handles.len()
    }

    /// Thread-safe control handle for core `index`
    pub fn core_handle(&self, index: CoreIndex) -> Option<&CoreHandle> {
        self.handles.get(index)
    }

    /// Drop translated code for a range on every core, e.g. after the
    /// loader rewrote it
    pub fn invalidate_code(&mut self, addr: u64, size: u64) {
        for core in self.cores.iter_mut() {
            core.invalidate_cache_range(addr, size);
        }
    }

    /// Run guest threads until the application exits or a core faults.
    ///
    /// A fatal engine error stops every other core and is returned.
    pub fn run(&mut self) -> Result<()> {
        if self.kernel.application_process().is_none() {
            return Err(LoaderError::NoApplicationProcess.into());
        }
        if self.kernel.scheduler().lock().thread_count() == 0 {
            return Err(KernelError::InvalidState("no guest thread has been started".to_string()).into());
        }

        let busy: BusyFlags = Arc::new(self.cores.iter().map(|_| AtomicBool::new(false)).collect());
        let period = Duration::from_micros(self.config.cpu.time_slice_us.max(1));
        let (stop, timer) = spawn_preemption_timer(self.handles.clone(), Arc::clone(&busy), period)?;

        let outcome = if self.config.cpu.use_multi_core {
            self.run_multi_core(&busy)
        } else {
            self.run_single_core(&busy)
        };

        drop(stop);
        if timer.join().is_err() {
            error!("Preemption timer panicked");
        }

        match &outcome {
            Ok(()) => info!("System run finished"),
            Err(e) => error!("System run failed: {}", e),
        }
        outcome
    }

    fn run_multi_core(&mut self, busy: &BusyFlags) -> Result<()> {
        let mut workers = Vec::with_capacity(self.cores.len());
        for mut core in self.cores.drain(..) {
            let kernel = Arc::clone(&self.kernel);
            let busy = Arc::clone(busy);
            let worker = thread::Builder::new()
                .name(format!("core-{}", core.index()))
                .spawn(move || {
                    let result = run_core(&kernel, &mut core, &busy);
                    (core, result)
                })?;
            workers.push(worker);
        }

        let mut first_error = None;
        for worker in workers {
            match worker.join() {
                Ok((core, result)) => {
                    self.cores.push(core);
                    if let Err(e) = result {
                        first_error.get_or_insert(EmulatorError::Cpu(e));
                    }
                }
                Err(_) => {
                    self.kernel.shutdown();
                    first_error.get_or_insert(EmulatorError::HostThread(
                        "core thread panicked".to_string(),
                    ));
                }
            }
        }
        self.cores.sort_by_key(ExecutionCore::index);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn run_single_core(&mut self, busy: &BusyFlags) -> Result<()> {
        let kernel = Arc::clone(&self.kernel);
        let mut finished = vec![false; self.cores.len()];

        while !finished.iter().all(|&done| done) {
            let mut ran = false;
            for (core, done) in self.cores.iter_mut().zip(finished.iter_mut()) {
                if *done {
                    continue;
                }
                match step(&kernel, core, busy) {
                    Ok(Step::Ran) => ran = true,
                    Ok(Step::Idle) => {}
                    Ok(Step::Finished) => *done = true,
                    Err(e) => {
                        kernel.shutdown();
                        return Err(e.into());
                    }
                }
            }
            if !ran && !kernel.is_exited() {
                kernel.wait_for_work(idle_timeout(&kernel));
            }
        }
        Ok(())
    }

    /// Stop every core, then release the cores and the exclusive monitor
    pub fn shutdown(&mut self) {
        self.kernel.shutdown();
        for core in self.cores.drain(..) {
            self.cpu.destroy_execution_core(core);
        }
        if let Some(monitor) = self.monitor.take() {
            self.cpu.destroy_exclusive_monitor(&monitor);
        }
        info!("System shut down");
    }
}

/// Issue `BreakLoop` to every busy core each `period` until `stop` is dropped
fn spawn_preemption_timer(
    handles: Vec<CoreHandle>,
    busy: BusyFlags,
    period: Duration,
) -> Result<(Sender<()>, JoinHandle<()>)> {
    let (stop_tx, stop_rx) = channel::bounded::<()>(1);
    let ticker = channel::tick(period);

    let timer = thread::Builder::new()
        .name("preemption".to_string())
        .spawn(move || loop {
            crossbeam::select! {
                recv(ticker) -> _ => {
                    for handle in &handles {
                        if busy[handle.index()].load(Ordering::Acquire) {
                            handle.halt_execution(HaltReason::BreakLoop);
                        }
                    }
                }
                recv(stop_rx) -> _ => return,
            }
        })?;
    Ok((stop_tx, timer))
}

/// Per-core host thread body
fn run_core(kernel: &Kernel, core: &mut ExecutionCore, busy: &[AtomicBool]) -> std::result::Result<(), CpuError> {
    debug!("Core {} run loop started", core.index());
    loop {
        match step(kernel, core, busy) {
            Ok(Step::Ran) => {}
            Ok(Step::Idle) => kernel.wait_for_work(idle_timeout(kernel)),
            Ok(Step::Finished) => break,
            Err(e) => {
                kernel.shutdown();
                return Err(e);
            }
        }
    }
    debug!("Core {} run loop finished", core.index());
    Ok(())
}

fn idle_timeout(kernel: &Kernel) -> Duration {
    match kernel.scheduler().lock().next_deadline() {
        Some(deadline) => kernel.timing().until(deadline).min(IDLE_WAIT),
        None => IDLE_WAIT,
    }
}

/// Pick (or keep) a guest thread for `core`, run it once and apply whatever
/// the burst asked for
fn step(kernel: &Kernel, core: &mut ExecutionCore, busy: &[AtomicBool]) -> std::result::Result<Step, CpuError> {
    let index = core.index();
    if kernel.is_exited() {
        return Ok(Step::Finished);
    }

    let thread = match kernel.current_thread_id(index) {
        Some(id) => kernel.threads().get(id).ok(),
        None => {
            let next = {
                let mut scheduler = kernel.scheduler().lock();
                scheduler.wake_expired(kernel.timing().ticks());
                scheduler.next(index)
            };
            let thread = next.and_then(|id| kernel.threads().get(id).ok());
            if let Some(thread) = &thread {
                core.load_context(&thread.context());
                kernel.set_current_thread(index, Some(thread.id));
                debug!("Core {} switched to thread {}", index, thread.id);
            }
            thread
        }
    };
    let Some(thread) = thread else {
        kernel.set_current_thread(index, None);
        return Ok(Step::Idle);
    };

    busy[index].store(true, Ordering::Release);
    let outcome = core.execute();
    busy[index].store(false, Ordering::Release);

    match outcome? {
        HaltReason::SupervisorCall => match kernel.take_switch(index) {
            None => {}
            Some(SwitchRequest::Yield) => {
                thread.save_context(core.save_context());
                kernel.set_current_thread(index, None);
                kernel.scheduler().lock().yield_thread(thread.id);
            }
            Some(SwitchRequest::Sleep(deadline)) => {
                thread.save_context(core.save_context());
                kernel.set_current_thread(index, None);
                kernel.scheduler().lock().sleep_thread(thread.id, deadline);
            }
            Some(SwitchRequest::Exit) => {
                kernel.set_current_thread(index, None);
                kernel.terminate_thread(&thread);
                if kernel.scheduler().lock().thread_count() == 0 {
                    info!("Last guest thread exited");
                    kernel.exit_process();
                }
            }
        },
        HaltReason::BreakLoop => {
            thread.save_context(core.save_context());
            kernel.set_current_thread(index, None);
            kernel.scheduler().lock().yield_thread(thread.id);
        }
        HaltReason::Stopped => {
            thread.save_context(core.save_context());
            kernel.set_current_thread(index, None);
            return Ok(Step::Finished);
        }
    }
    Ok(Step::Ran)
}
