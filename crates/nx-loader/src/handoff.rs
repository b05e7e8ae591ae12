//! Process creation, module copy-in and main-thread start
//!
//! The three steps run in order on one [`AppLoader`]:
//!
//! 1. [`AppLoader::create_application_process`] carves the code region out
//!    of the address space and registers the process with the kernel
//! 2. [`AppLoader::load_module`] copies the segments in through the guest
//!    write path, applies their final permissions and drops any translated
//!    code covering the region
//! 3. [`AppLoader::start_application_process`] maps the main stack, creates
//!    the main thread and queues it on the scheduler
//!
//! The first burst of guest execution happens in [`System::run`].

use crate::module::{ModuleInfo, ProgramMetadata};
use nx_core::error::{EmulatorError, LoaderError, MemoryError};
use nx_core::{ProcessId, Result, VAddr};
use nx_cpu::CoreHandle;
use nx_kernel::process::{KernelObject, ProcessParams};
use nx_kernel::{Kernel, Process, System, Thread};
use nx_memory::pages::page_align_up;
use nx_memory::{
    AddressSpace, GuestMemory, PageFlags, CODE_REGION_BASE, CODE_REGION_SIZE, STACK_REGION_BASE,
    STACK_REGION_SIZE,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Drives one application from raw segments to a queued main thread
pub struct AppLoader {
    kernel: Arc<Kernel>,
    memory: Arc<AddressSpace>,
    /// Cores whose translated code must be dropped after a load
    cores: Vec<CoreHandle>,
    metadata: ProgramMetadata,
    process: Option<Arc<Process>>,
    /// Absolute entry point of the loaded module
    entry: Option<VAddr>,
}

impl AppLoader {
    pub fn new(system: &System) -> Self {
        Self {
            kernel: Arc::clone(system.kernel()),
            memory: Arc::clone(system.memory()),
            cores: (0..system.core_count())
                .filter_map(|index| system.core_handle(index).cloned())
                .collect(),
            metadata: ProgramMetadata::default(),
            process: None,
            entry: None,
        }
    }

    pub fn process(&self) -> Option<&Arc<Process>> {
        self.process.as_ref()
    }

    pub fn entry_point(&self) -> Option<VAddr> {
        self.entry
    }

    fn require_process(&self) -> Result<Arc<Process>> {
        self.process
            .clone()
            .ok_or(EmulatorError::Loader(LoaderError::NoApplicationProcess))
    }

    /// Reserve `code_size` bytes (page-rounded) at the code region base and
    /// register the application process. Returns where the image must go.
    pub fn create_application_process(
        &mut self,
        code_size: u64,
        metadata: &ProgramMetadata,
    ) -> Result<(VAddr, ProcessId)> {
        if self.process.is_some() || self.kernel.application_process().is_some() {
            return Err(LoaderError::ProcessAlreadyCreated.into());
        }
        let size = page_align_up(code_size)
            .filter(|&size| size > 0 && size <= CODE_REGION_SIZE)
            .ok_or_else(|| {
                LoaderError::InvalidModule(format!("code size 0x{:x} does not fit the code region", code_size))
            })?;

        let base = CODE_REGION_BASE;
        self.memory.map(base, size, PageFlags::RW)?;

        let params = ProcessParams {
            title_id: metadata.title_id,
            name: metadata.name.clone(),
            code_base: base,
            code_size: size,
            ideal_core: metadata.main_thread_core,
            core_mask: self.kernel.all_cores_mask(),
        };
        let process = match self.kernel.create_application_process(params) {
            Ok(process) => process,
            Err(e) => {
                self.memory.unmap(base, size)?;
                return Err(e.into());
            }
        };

        info!(
            "Created application process {} '{}' (title {:016x}), code 0x{:x}..0x{:x}",
            process.pid,
            process.name,
            process.title_id,
            base,
            base + size
        );
        let pid = process.pid;
        self.process = Some(process);
        self.metadata = metadata.clone();
        Ok((base, pid))
    }

    /// Copy `module` to `base` and apply its final page permissions
    pub fn load_module(&mut self, module: &ModuleInfo, base: VAddr) -> Result<()> {
        let process = self.require_process()?;
        module.validate()?;
        if base != process.code_base {
            return Err(LoaderError::InvalidModule(format!(
                "load base 0x{:x} is not the process code base 0x{:x}",
                base, process.code_base
            ))
            .into());
        }
        let image_size = module.image_size();
        if image_size > process.code_size {
            return Err(LoaderError::SegmentOutOfBounds {
                offset: 0,
                size: image_size,
                region: process.code_size,
            }
            .into());
        }

        for segment in [&module.text, &module.rodata, &module.data] {
            if segment.is_empty() {
                continue;
            }
            let addr = base + segment.offset;
            if !self.memory.write_block(addr, &segment.bytes) {
                return Err(MemoryError::InvalidAddress(addr).into());
            }
            debug!("Wrote segment at 0x{:x} (0x{:x} bytes)", addr, segment.len());
        }
        if module.bss_size > 0 {
            let addr = base + module.data.end();
            let zeros = vec![0u8; module.bss_size as usize];
            if !self.memory.write_block(addr, &zeros) {
                return Err(MemoryError::InvalidAddress(addr).into());
            }
        }

        for (kind, range) in module.regions() {
            self.memory
                .protect(base + range.start, range.end - range.start, kind.flags())?;
            debug!(
                "{:?} 0x{:x}..0x{:x} -> {:?}",
                kind,
                base + range.start,
                base + range.end,
                kind.flags()
            );
        }

        for core in &self.cores {
            core.request_cache_invalidation(base, process.code_size);
        }

        let entry = base + module.entry_offset;
        self.entry = Some(entry);
        info!("Loaded module: 0x{:x} bytes, entry 0x{:x}", image_size, entry);
        Ok(())
    }

    /// Map the main stack and queue the main thread at the module entry.
    ///
    /// The thread starts with X0 = 0, X1 = its own handle and SP at the
    /// stack top.
    pub fn start_application_process(&mut self, priority: u32, stack_size: u64) -> Result<Arc<Thread>> {
        let process = self.require_process()?;
        let entry = self
            .entry
            .ok_or_else(|| LoaderError::InvalidModule("no module has been loaded".to_string()))?;

        let stack_size = page_align_up(stack_size)
            .filter(|&size| size > 0)
            .ok_or_else(|| LoaderError::InvalidModule(format!("bad stack size 0x{:x}", stack_size)))?;
        let stack_base = self
            .memory
            .find_free_area(STACK_REGION_BASE, STACK_REGION_SIZE, stack_size)
            .ok_or(MemoryError::OutOfMemory)?;
        self.memory.map(stack_base, stack_size, PageFlags::RW)?;
        let stack_top = stack_base + stack_size;

        let thread = match self.kernel.create_thread(
            &process,
            entry,
            0,
            stack_top,
            priority,
            self.metadata.main_thread_core,
        ) {
            Ok(thread) => thread,
            Err(e) => {
                self.memory.unmap(stack_base, stack_size)?;
                return Err(e.into());
            }
        };
        let handle = match process.add_handle(KernelObject::Thread(thread.id)) {
            Ok(handle) => handle,
            Err(e) => {
                self.kernel.destroy_thread(&thread);
                return Err(e.into());
            }
        };
        thread.set_register(1, u64::from(handle));
        self.kernel.start_thread(&thread)?;

        info!(
            "Main thread {} queued: entry 0x{:x}, priority {}, core {}, stack 0x{:x}..0x{:x}",
            thread.id, entry, priority, thread.ideal_core, stack_base, stack_top
        );
        Ok(thread)
    }

    /// All three handoff steps for a parsed module, using the metadata's
    /// main-thread settings
    pub fn load_application(&mut self, module: &ModuleInfo, metadata: &ProgramMetadata) -> Result<Arc<Thread>> {
        module.validate()?;
        let (base, _) = self.create_application_process(module.image_size(), metadata)?;
        self.load_module(module, base)?;
        self.start_application_process(metadata.main_thread_priority, metadata.main_thread_stack_size)
    }
}
