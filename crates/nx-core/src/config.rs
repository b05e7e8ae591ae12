//! Configuration system for the oxidized-nx emulator

use crate::error::EmulatorError;
use crate::types::NUM_CPU_CORES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub cpu: CpuConfig,
    pub debug: DebugConfig,
}

/// CPU emulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub backend: CpuBackendKind,
    /// One host thread per emulated core; `false` time-slices every core
    /// onto a single host thread.
    pub use_multi_core: bool,
    pub core_count: usize,
    /// Create the per-system exclusive monitor. Without it every
    /// store-exclusive fails.
    pub exclusive_monitor: bool,
    /// Interval between host-issued `BreakLoop` preemptions
    pub time_slice_us: u64,
    /// Upper bound on instructions per translated block
    pub max_block_instructions: usize,
}

/// CPU backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum CpuBackendKind {
    /// Built-in block-caching A64 translator
    #[default]
    Interpreter,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    /// Log every supervisor call at info level
    pub trace_svc: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            backend: CpuBackendKind::default(),
            use_multi_core: true,
            core_count: NUM_CPU_CORES,
            exclusive_monitor: true,
            time_slice_us: 10_000,
            max_block_instructions: 64,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            trace_svc: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self, EmulatorError> {
        let path = Self::config_path();
        let existed = path.exists();
        let config = Self::load_or_default(&path)?;
        if !existed {
            if let Err(e) = config.save() {
                tracing::warn!("Could not write default config to {}: {}", path.display(), e);
            }
        }
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise. A file that exists but
    /// does not parse or validate is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, EmulatorError> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, EmulatorError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| EmulatorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), EmulatorError> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| EmulatorError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject settings the CPU layer cannot honour
    pub fn validate(&self) -> Result<(), EmulatorError> {
        if self.cpu.core_count == 0 || self.cpu.core_count > NUM_CPU_CORES {
            return Err(EmulatorError::Config(format!(
                "cpu.core_count must be between 1 and {}, got {}",
                NUM_CPU_CORES, self.cpu.core_count
            )));
        }
        if self.cpu.max_block_instructions == 0 {
            return Err(EmulatorError::Config(
                "cpu.max_block_instructions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-nx")
            .join("config.toml")
    }
}
