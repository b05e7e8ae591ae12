//! Guest thread objects

use nx_core::error::KernelError;
use nx_core::{ProcessId, ThreadId, VAddr};
use nx_cpu::ThreadContext;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread life cycle as seen by the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created by CreateThread, not yet started
    Created,
    /// Handed to the scheduler
    Started,
    /// Exited; the object lingers until its handles are closed
    Terminated,
}

/// Parameters for a new guest thread
#[derive(Debug, Clone)]
pub struct ThreadParams {
    pub process_id: ProcessId,
    pub entry: VAddr,
    pub argument: u64,
    pub stack_top: VAddr,
    pub priority: u32,
    /// Preferred core, always a concrete index here
    pub ideal_core: i32,
    pub core_mask: u64,
    pub tls_address: VAddr,
}

#[derive(Debug)]
struct ThreadInner {
    state: ThreadState,
    priority: u32,
    context: ThreadContext,
}

/// Guest thread
#[derive(Debug)]
pub struct Thread {
    pub id: ThreadId,
    pub process_id: ProcessId,
    pub entry: VAddr,
    pub stack_top: VAddr,
    pub ideal_core: i32,
    pub core_mask: u64,
    /// Thread-local region, mirrored into TPIDRRO_EL0
    pub tls_address: VAddr,
    inner: Mutex<ThreadInner>,
}

impl Thread {
    fn new(id: ThreadId, params: ThreadParams) -> Self {
        let mut context = ThreadContext::default();
        context.registers.pc = params.entry;
        context.registers.sp = params.stack_top;
        context.registers.x[0] = params.argument;
        context.tpidrro_el0 = params.tls_address;

        Self {
            id,
            process_id: params.process_id,
            entry: params.entry,
            stack_top: params.stack_top,
            ideal_core: params.ideal_core,
            core_mask: params.core_mask,
            tls_address: params.tls_address,
            inner: Mutex::new(ThreadInner {
                state: ThreadState::Created,
                priority: params.priority,
                context,
            }),
        }
    }

    pub fn state(&self) -> ThreadState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: ThreadState) {
        self.inner.lock().state = state;
    }

    pub fn priority(&self) -> u32 {
        self.inner.lock().priority
    }

    pub fn set_priority(&self, priority: u32) {
        self.inner.lock().priority = priority;
    }

    /// Register state to load when the thread is next scheduled
    pub fn context(&self) -> ThreadContext {
        self.inner.lock().context.clone()
    }

    pub fn save_context(&self, context: ThreadContext) {
        self.inner.lock().context = context;
    }

    /// Overwrite one general register of the saved context
    pub fn set_register(&self, index: usize, value: u64) {
        if let Some(slot) = self.inner.lock().context.registers.x.get_mut(index) {
            *slot = value;
        }
    }
}

/// Thread table
pub struct ThreadManager {
    threads: RwLock<HashMap<ThreadId, Arc<Thread>>>,
    next_id: AtomicU64,
}

impl ThreadManager {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a thread in the [`ThreadState::Created`] state
    pub fn create(&self, params: ThreadParams) -> Arc<Thread> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(Thread::new(id, params));
        self.threads.write().insert(id, Arc::clone(&thread));

        tracing::debug!(
            "Created thread {} entry=0x{:x} sp=0x{:x} tls=0x{:x} priority={}",
            id,
            thread.entry,
            thread.stack_top,
            thread.tls_address,
            thread.priority()
        );
        thread
    }

    pub fn get(&self, id: ThreadId) -> Result<Arc<Thread>, KernelError> {
        self.threads
            .read()
            .get(&id)
            .cloned()
            .ok_or(KernelError::InvalidThreadId(id))
    }

    pub fn remove(&self, id: ThreadId) -> Result<Arc<Thread>, KernelError> {
        self.threads
            .write()
            .remove(&id)
            .ok_or(KernelError::InvalidThreadId(id))
    }

    /// Threads that have not terminated
    pub fn live_count(&self) -> usize {
        self.threads
            .read()
            .values()
            .filter(|thread| thread.state() != ThreadState::Terminated)
            .count()
    }

    pub fn list(&self) -> Vec<ThreadId> {
        let mut ids: Vec<_> = self.threads.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread supervisor calls
pub mod syscalls {
    use super::*;
    use crate::kernel::Kernel;
    use crate::scheduler::LOWEST_PRIORITY;
    use nx_core::{CoreIndex, Handle};

    /// Ideal-core value meaning "the process default core"
    pub const IDEAL_CORE_USE_PROCESS_VALUE: i32 = -2;

    /// svcCreateThread
    pub fn svc_create_thread(
        kernel: &Kernel,
        core: CoreIndex,
        entry: VAddr,
        argument: u64,
        stack_top: VAddr,
        priority: u32,
        ideal_core: i32,
    ) -> Result<Handle, KernelError> {
        if priority > LOWEST_PRIORITY {
            return Err(KernelError::InvalidPriority(priority));
        }
        let process = kernel.current_process(core)?;
        let ideal_core = if ideal_core == IDEAL_CORE_USE_PROCESS_VALUE {
            process.ideal_core
        } else {
            ideal_core
        };

        let thread = kernel.create_thread(&process, entry, argument, stack_top, priority, ideal_core)?;
        match process.add_handle(crate::process::KernelObject::Thread(thread.id)) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                kernel.destroy_thread(&thread);
                Err(e)
            }
        }
    }

    /// svcStartThread
    pub fn svc_start_thread(
        kernel: &Kernel,
        core: CoreIndex,
        handle: Handle,
    ) -> Result<(), KernelError> {
        let thread = kernel.resolve_thread(core, handle)?;
        kernel.start_thread(&thread)
    }

    /// svcGetThreadPriority
    pub fn svc_get_thread_priority(
        kernel: &Kernel,
        core: CoreIndex,
        handle: Handle,
    ) -> Result<u32, KernelError> {
        Ok(kernel.resolve_thread(core, handle)?.priority())
    }

    /// svcSetThreadPriority
    pub fn svc_set_thread_priority(
        kernel: &Kernel,
        core: CoreIndex,
        handle: Handle,
        priority: u32,
    ) -> Result<(), KernelError> {
        if priority > LOWEST_PRIORITY {
            return Err(KernelError::InvalidPriority(priority));
        }
        let thread = kernel.resolve_thread(core, handle)?;
        if thread.state() == ThreadState::Started {
            kernel.scheduler().lock().set_priority(thread.id, priority)?;
        }
        thread.set_priority(priority);
        Ok(())
    }

    /// svcGetThreadId
    pub fn svc_get_thread_id(
        kernel: &Kernel,
        core: CoreIndex,
        handle: Handle,
    ) -> Result<ThreadId, KernelError> {
        Ok(kernel.resolve_thread(core, handle)?.id)
    }
}
