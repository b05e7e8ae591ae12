//! CPU manager: per-system factory for the exclusive monitor and cores

use crate::counter::CNTFREQ;
use crate::exclusive_monitor::ExclusiveMonitor;
use crate::executor::{CoreInfo, ExecutionCore};
use crate::invalidation::InvalidationBus;
use crate::registers::TlsRegisters;
use crate::translator::{BlockTranslator, Translator, TranslatorConfig};
use nx_core::config::{CpuBackendKind, CpuConfig};
use nx_core::error::CpuError;
use nx_core::{CoreIndex, NUM_CPU_CORES};
use nx_memory::GuestMemory;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Source of translator instances
pub trait CpuBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_translator(&self, config: TranslatorConfig) -> Box<dyn Translator>;
}

/// Built-in block-caching interpreter
#[derive(Debug, Default)]
pub struct InterpreterBackend;

impl CpuBackend for InterpreterBackend {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn create_translator(&self, config: TranslatorConfig) -> Box<dyn Translator> {
        Box::new(BlockTranslator::new(config))
    }
}

/// Non-owning reference to a manager's exclusive monitor
#[derive(Clone)]
pub struct MonitorHandle(Weak<ExclusiveMonitor>);

impl MonitorHandle {
    /// Whether the monitor behind this handle still exists
    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn get(&self) -> Option<Arc<ExclusiveMonitor>> {
        self.0.upgrade()
    }
}

/// Owns at most one [`ExclusiveMonitor`] and builds [`ExecutionCore`]s
pub struct CpuManager {
    backend: Box<dyn CpuBackend>,
    monitor: Mutex<Option<Arc<ExclusiveMonitor>>>,
    invalidation: Arc<InvalidationBus>,
    max_block_instructions: usize,
    initialized: AtomicBool,
}

impl CpuManager {
    pub fn new(config: &CpuConfig) -> Self {
        let backend: Box<dyn CpuBackend> = match config.backend {
            CpuBackendKind::Interpreter => Box::new(InterpreterBackend),
        };
        Self::with_backend(backend, config.max_block_instructions)
    }

    pub fn with_backend(backend: Box<dyn CpuBackend>, max_block_instructions: usize) -> Self {
        Self {
            backend,
            monitor: Mutex::new(None),
            invalidation: Arc::new(InvalidationBus::new()),
            max_block_instructions,
            initialized: AtomicBool::new(false),
        }
    }

    /// Prepare the backend. Safe to call more than once.
    pub fn initialize(&self) -> bool {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!("CPU manager initialized with {} backend", self.backend.name());
        }
        true
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Bus shared by every core built here
    pub fn invalidation_bus(&self) -> Arc<InvalidationBus> {
        Arc::clone(&self.invalidation)
    }

    /// Create the system's monitor. Returns `None` while one already exists.
    pub fn create_exclusive_monitor(
        &self,
        memory: Arc<dyn GuestMemory>,
        core_count: usize,
    ) -> Option<MonitorHandle> {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            warn!("Exclusive monitor already exists for this CPU manager");
            return None;
        }
        let monitor = Arc::new(ExclusiveMonitor::new(memory, core_count));
        let handle = MonitorHandle(Arc::downgrade(&monitor));
        *slot = Some(monitor);
        debug!("Created exclusive monitor for {} cores", core_count);
        Some(handle)
    }

    /// Destroy the monitor if `handle` refers to it. Returns whether it did.
    pub fn destroy_exclusive_monitor(&self, handle: &MonitorHandle) -> bool {
        let mut slot = self.monitor.lock();
        match slot.as_ref() {
            Some(monitor) if Weak::ptr_eq(&Arc::downgrade(monitor), &handle.0) => {
                *slot = None;
                debug!("Destroyed exclusive monitor");
                true
            }
            _ => {
                warn!("Ignoring destroy request for a stale exclusive monitor handle");
                false
            }
        }
    }

    /// Check if `handle` is the monitor this manager currently holds
    pub fn owns_monitor(&self, handle: &MonitorHandle) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|monitor| Weak::ptr_eq(&Arc::downgrade(monitor), &handle.0))
    }

    /// Build core `index`. A handle that is not this manager's live monitor
    /// yields a core with no monitor at all.
    pub fn create_execution_core(
        &self,
        monitor: Option<&MonitorHandle>,
        info: CoreInfo,
        index: CoreIndex,
    ) -> Result<ExecutionCore, CpuError> {
        if index >= NUM_CPU_CORES {
            return Err(CpuError::InvalidCoreIndex(index));
        }

        let monitor = match monitor {
            Some(handle) if self.owns_monitor(handle) => handle.0.clone(),
            Some(_) => {
                warn!("Core {} created without a monitor: handle does not belong to this manager", index);
                Weak::new()
            }
            None => Weak::new(),
        };

        let tls = Arc::new(TlsRegisters::new());
        let translator = self.backend.create_translator(TranslatorConfig {
            core_index: index,
            tls: Arc::clone(&tls),
            cntfrq: CNTFREQ,
            max_block_instructions: self.max_block_instructions,
        });

        debug!("Created execution core {}", index);
        Ok(ExecutionCore::new(
            index,
            translator,
            tls,
            monitor,
            info,
            self.invalidation_bus(),
        ))
    }

    /// Release a core and its translator
    pub fn destroy_execution_core(&self, core: ExecutionCore) {
        debug!("Destroying execution core {}", core.index());
        drop(core);
    }
}
