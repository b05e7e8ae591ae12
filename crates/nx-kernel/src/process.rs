//! Processes, their handle tables and per-process memory bookkeeping

use nx_core::error::{KernelError, MemoryError};
use nx_core::{Handle, ProcessId, ThreadId, VAddr};
use nx_memory::{
    AddressSpace, PageFlags, HEAP_REGION_BASE, HEAP_REGION_SIZE, HEAP_SIZE_ALIGNMENT, PAGE_SIZE,
    TLS_ENTRY_SIZE, TLS_REGION_BASE, TLS_REGION_SIZE,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pseudo-handle naming the calling process
pub const CURRENT_PROCESS_HANDLE: Handle = 0xFFFF_8000;

/// Pseudo-handle naming the calling thread
pub const CURRENT_THREAD_HANDLE: Handle = 0xFFFF_8001;

/// Maximum number of handles per process
const MAX_HANDLES: usize = 1024;

/// First process ID handed to applications; lower IDs belong to system
/// modules
pub const FIRST_APPLICATION_PID: ProcessId = 0x51;

const TLS_SLOTS_PER_PAGE: usize = (PAGE_SIZE / TLS_ENTRY_SIZE) as usize;
const MAX_TLS_SLOTS: usize = (TLS_REGION_SIZE / TLS_ENTRY_SIZE) as usize;

/// Object a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelObject {
    Process(ProcessId),
    Thread(ThreadId),
}

/// Handle table: maps guest handles to kernel objects.
/// Handle 0 is never issued.
#[derive(Debug)]
pub struct HandleTable {
    objects: HashMap<Handle, KernelObject>,
    next_handle: Handle,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn add(&mut self, object: KernelObject) -> Result<Handle, KernelError> {
        if self.objects.len() >= MAX_HANDLES {
            return Err(KernelError::ResourceLimit);
        }
        while self.next_handle == 0
            || self.next_handle >= CURRENT_PROCESS_HANDLE
            || self.objects.contains_key(&self.next_handle)
        {
            self.next_handle = self.next_handle.wrapping_add(1);
            if self.next_handle >= CURRENT_PROCESS_HANDLE {
                self.next_handle = 1;
            }
        }

        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.objects.insert(handle, object);
        Ok(handle)
    }

    pub fn get(&self, handle: Handle) -> Result<KernelObject, KernelError> {
        self.objects
            .get(&handle)
            .copied()
            .ok_or(KernelError::InvalidHandle(handle))
    }

    pub fn close(&mut self, handle: Handle) -> Result<KernelObject, KernelError> {
        self.objects
            .remove(&handle)
            .ok_or(KernelError::InvalidHandle(handle))
    }

    /// Whether any handle still refers to `object`
    pub fn references(&self, object: KernelObject) -> bool {
        self.objects.values().any(|&o| o == object)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Process lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Image loaded, main thread not started
    Created,
    Running,
    Exited,
}

/// Parameters for a new process
#[derive(Debug, Clone)]
pub struct ProcessParams {
    pub title_id: u64,
    pub name: String,
    pub code_base: VAddr,
    pub code_size: u64,
    pub ideal_core: i32,
    pub core_mask: u64,
}

#[derive(Debug)]
struct ProcessInner {
    state: ProcessState,
    handles: HandleTable,
    heap_size: u64,
    /// Occupancy of each TLS slot, in address order
    tls_slots: Vec<bool>,
    threads: Vec<ThreadId>,
}

/// Guest process
#[derive(Debug)]
pub struct Process {
    pub pid: ProcessId,
    pub title_id: u64,
    pub name: String,
    pub code_base: VAddr,
    pub code_size: u64,
    pub ideal_core: i32,
    pub core_mask: u64,
    inner: Mutex<ProcessInner>,
}

impl Process {
    fn new(pid: ProcessId, params: ProcessParams) -> Self {
        Self {
            pid,
            title_id: params.title_id,
            name: params.name,
            code_base: params.code_base,
            code_size: params.code_size,
            ideal_core: params.ideal_core,
            core_mask: params.core_mask,
            inner: Mutex::new(ProcessInner {
                state: ProcessState::Created,
                handles: HandleTable::new(),
                heap_size: 0,
                tls_slots: Vec::new(),
                threads: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: ProcessState) {
        self.inner.lock().state = state;
        tracing::debug!("Process {} state -> {:?}", self.pid, state);
    }

    pub fn add_handle(&self, object: KernelObject) -> Result<Handle, KernelError> {
        self.inner.lock().handles.add(object)
    }

    /// Look up a real handle. Pseudo-handles are resolved by the kernel.
    pub fn get_handle(&self, handle: Handle) -> Result<KernelObject, KernelError> {
        self.inner.lock().handles.get(handle)
    }

    pub fn close_handle(&self, handle: Handle) -> Result<KernelObject, KernelError> {
        self.inner.lock().handles.close(handle)
    }

    pub fn references(&self, object: KernelObject) -> bool {
        self.inner.lock().handles.references(object)
    }

    pub fn handle_count(&self) -> usize {
        self.inner.lock().handles.len()
    }

    pub fn add_thread(&self, id: ThreadId) {
        self.inner.lock().threads.push(id);
    }

    pub fn remove_thread(&self, id: ThreadId) {
        self.inner.lock().threads.retain(|&t| t != id);
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.inner.lock().threads.clone()
    }

    pub fn heap_size(&self) -> u64 {
        self.inner.lock().heap_size
    }

    /// Grow or shrink the heap at [`HEAP_REGION_BASE`]. Returns the heap base.
    pub fn set_heap_size(&self, memory: &AddressSpace, size: u64) -> Result<VAddr, KernelError> {
        if size % HEAP_SIZE_ALIGNMENT != 0 {
            return Err(KernelError::InvalidSize(size));
        }
        if size > HEAP_REGION_SIZE {
            return Err(KernelError::Memory(MemoryError::OutOfMemory));
        }

        let mut inner = self.inner.lock();
        let current = inner.heap_size;
        if size > current {
            memory.map(HEAP_REGION_BASE + current, size - current, PageFlags::RW)?;
        } else if size < current {
            memory.unmap(HEAP_REGION_BASE + size, current - size)?;
        }
        inner.heap_size = size;

        tracing::debug!("Process {} heap 0x{:x} -> 0x{:x}", self.pid, current, size);
        Ok(HEAP_REGION_BASE)
    }

    /// Reserve a zeroed thread-local slot, mapping its page on first use
    pub fn allocate_tls(&self, memory: &AddressSpace) -> Result<VAddr, KernelError> {
        let mut inner = self.inner.lock();
        let slot = match inner.tls_slots.iter().position(|used| !used) {
            Some(slot) => slot,
            None if inner.tls_slots.len() < MAX_TLS_SLOTS => {
                inner.tls_slots.push(false);
                inner.tls_slots.len() - 1
            }
            None => return Err(KernelError::ResourceLimit),
        };

        let address = TLS_REGION_BASE + slot as u64 * TLS_ENTRY_SIZE;
        let page = TLS_REGION_BASE + (slot / TLS_SLOTS_PER_PAGE) as u64 * PAGE_SIZE;
        if !memory.is_mapped(page) {
            memory.map(page, PAGE_SIZE, PageFlags::RW)?;
        }
        memory.write(address, &[0u8; TLS_ENTRY_SIZE as usize])?;
        inner.tls_slots[slot] = true;
        Ok(address)
    }

    /// Release a slot returned by [`Process::allocate_tls`]
    pub fn free_tls(&self, address: VAddr) {
        let Some(offset) = address.checked_sub(TLS_REGION_BASE) else {
            return;
        };
        let slot = (offset / TLS_ENTRY_SIZE) as usize;
        if let Some(used) = self.inner.lock().tls_slots.get_mut(slot) {
            *used = false;
        }
    }
}

/// Process table
pub struct ProcessManager {
    processes: RwLock<HashMap<ProcessId, Arc<Process>>>,
    next_pid: AtomicU64,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            next_pid: AtomicU64::new(FIRST_APPLICATION_PID),
        }
    }

    pub fn create(&self, params: ProcessParams) -> Arc<Process> {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let process = Arc::new(Process::new(pid, params));
        self.processes.write().insert(pid, Arc::clone(&process));
        tracing::info!(
            "Created process {} '{}' (title 0x{:016x})",
            pid,
            process.name,
            process.title_id
        );
        process
    }

    pub fn get(&self, pid: ProcessId) -> Result<Arc<Process>, KernelError> {
        self.processes
            .read()
            .get(&pid)
            .cloned()
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    pub fn remove(&self, pid: ProcessId) -> Result<Arc<Process>, KernelError> {
        self.processes
            .write()
            .remove(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    pub fn count(&self) -> usize {
        self.processes.read().len()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Process and memory supervisor calls
pub mod syscalls {
    use super::*;
    use crate::kernel::Kernel;
    use bytemuck::{Pod, Zeroable};
    use nx_core::CoreIndex;
    use nx_memory::{
        ADDRESS_SPACE_SIZE, ALIAS_REGION_BASE, ALIAS_REGION_SIZE, CODE_REGION_BASE,
        CODE_REGION_SIZE, STACK_REGION_BASE, STACK_REGION_SIZE,
    };

    /// Guest `MemoryInfo` as written by svcQueryMemory
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
    pub struct MemoryInfo {
        pub base_address: u64,
        pub size: u64,
        pub state: u32,
        pub attribute: u32,
        pub permission: u32,
        pub ipc_refcount: u32,
        pub device_refcount: u32,
        pub padding: u32,
    }

    /// Subset of the guest `MemoryState` values
    pub mod memory_state {
        pub const FREE: u32 = 0x00;
        pub const CODE: u32 = 0x03;
        pub const CODE_DATA: u32 = 0x04;
        pub const NORMAL: u32 = 0x05;
        pub const STACK: u32 = 0x0B;
        pub const THREAD_LOCAL: u32 = 0x0C;
        pub const INACCESSIBLE: u32 = 0x10;
    }

    /// svcGetInfo IDs
    pub mod info_id {
        pub const CORE_MASK: u32 = 0;
        pub const PRIORITY_MASK: u32 = 1;
        pub const ALIAS_REGION_ADDRESS: u32 = 2;
        pub const ALIAS_REGION_SIZE: u32 = 3;
        pub const HEAP_REGION_ADDRESS: u32 = 4;
        pub const HEAP_REGION_SIZE: u32 = 5;
        pub const TOTAL_MEMORY_SIZE: u32 = 6;
        pub const USED_MEMORY_SIZE: u32 = 7;
        pub const DEBUGGER_ATTACHED: u32 = 8;
        pub const RANDOM_ENTROPY: u32 = 11;
        pub const ASLR_REGION_ADDRESS: u32 = 12;
        pub const ASLR_REGION_SIZE: u32 = 13;
        pub const STACK_REGION_ADDRESS: u32 = 14;
        pub const STACK_REGION_SIZE: u32 = 15;
        pub const PROGRAM_ID: u32 = 18;
        pub const IS_APPLICATION: u32 = 23;
    }

    /// Memory granted to the application
    const TOTAL_MEMORY_SIZE: u64 = 0xCD50_0000;

    fn region_state(base: VAddr, flags: PageFlags) -> u32 {
        let in_region = |start: u64, size: u64| base >= start && base < start + size;
        if in_region(CODE_REGION_BASE, CODE_REGION_SIZE) {
            if flags.contains(PageFlags::EXECUTE) {
                memory_state::CODE
            } else {
                memory_state::CODE_DATA
            }
        } else if in_region(STACK_REGION_BASE, STACK_REGION_SIZE) {
            memory_state::STACK
        } else if in_region(TLS_REGION_BASE, TLS_REGION_SIZE) {
            memory_state::THREAD_LOCAL
        } else {
            memory_state::NORMAL
        }
    }

    /// Describe the region containing `address`
    pub fn query_memory(memory: &AddressSpace, address: VAddr) -> MemoryInfo {
        match memory.query(address) {
            Some(region) if region.mapped => MemoryInfo {
                base_address: region.base,
                size: region.size,
                state: region_state(region.base, region.flags),
                permission: region.flags.bits(),
                ..MemoryInfo::default()
            },
            Some(region) => MemoryInfo {
                base_address: region.base,
                size: region.size,
                state: memory_state::FREE,
                ..MemoryInfo::default()
            },
            None => MemoryInfo {
                base_address: ADDRESS_SPACE_SIZE,
                size: 0u64.wrapping_sub(ADDRESS_SPACE_SIZE),
                state: memory_state::INACCESSIBLE,
                ..MemoryInfo::default()
            },
        }
    }

    /// svcSetHeapSize
    pub fn svc_set_heap_size(
        kernel: &Kernel,
        core: CoreIndex,
        size: u64,
    ) -> Result<VAddr, KernelError> {
        kernel
            .current_process(core)?
            .set_heap_size(kernel.memory(), size)
    }

    /// svcQueryMemory: writes a [`MemoryInfo`] to `info_address`
    pub fn svc_query_memory(
        kernel: &Kernel,
        info_address: VAddr,
        address: VAddr,
    ) -> Result<(), KernelError> {
        let info = query_memory(kernel.memory(), address);
        if !kernel.write_guest(info_address, bytemuck::bytes_of(&info)) {
            return Err(KernelError::InvalidAddress(info_address));
        }
        Ok(())
    }

    /// svcGetProcessId
    pub fn svc_get_process_id(
        kernel: &Kernel,
        core: CoreIndex,
        handle: Handle,
    ) -> Result<ProcessId, KernelError> {
        Ok(kernel.resolve_process(core, handle)?.pid)
    }

    /// svcCloseHandle
    pub fn svc_close_handle(
        kernel: &Kernel,
        core: CoreIndex,
        handle: Handle,
    ) -> Result<(), KernelError> {
        let process = kernel.current_process(core)?;
        let object = process.close_handle(handle)?;
        kernel.release_object(&process, object);
        Ok(())
    }

    /// svcGetInfo
    pub fn svc_get_info(
        kernel: &Kernel,
        core: CoreIndex,
        id: u32,
        handle: Handle,
        sub_id: u64,
    ) -> Result<u64, KernelError> {
        let process = kernel.resolve_process(core, handle)?;
        if id != info_id::RANDOM_ENTROPY && sub_id != 0 {
            return Err(KernelError::InvalidCombination);
        }

        let value = match id {
            info_id::CORE_MASK => process.core_mask,
            info_id::PRIORITY_MASK => u64::MAX,
            info_id::ALIAS_REGION_ADDRESS => ALIAS_REGION_BASE,
            info_id::ALIAS_REGION_SIZE => ALIAS_REGION_SIZE,
            info_id::HEAP_REGION_ADDRESS => HEAP_REGION_BASE,
            info_id::HEAP_REGION_SIZE => HEAP_REGION_SIZE,
            info_id::TOTAL_MEMORY_SIZE => TOTAL_MEMORY_SIZE,
            info_id::USED_MEMORY_SIZE => kernel.memory().mapped_size(),
            info_id::DEBUGGER_ATTACHED => 0,
            info_id::RANDOM_ENTROPY => {
                if sub_id > 3 {
                    return Err(KernelError::InvalidCombination);
                }
                entropy(process.title_id, sub_id)
            }
            info_id::ASLR_REGION_ADDRESS => CODE_REGION_BASE,
            info_id::ASLR_REGION_SIZE => ADDRESS_SPACE_SIZE - CODE_REGION_BASE,
            info_id::STACK_REGION_ADDRESS => STACK_REGION_BASE,
            info_id::STACK_REGION_SIZE => STACK_REGION_SIZE,
            info_id::PROGRAM_ID => process.title_id,
            info_id::IS_APPLICATION => 1,
            _ => return Err(KernelError::InvalidEnumValue(id)),
        };
        Ok(value)
    }

    /// Deterministic per-title entropy word (splitmix64)
    fn entropy(seed: u64, index: u64) -> u64 {
        let mut z = seed
            .wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}
