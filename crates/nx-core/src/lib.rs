//! Core emulator logic for the oxidized-nx Switch emulator
//!
//! This crate provides the foundational types, error handling,
//! configuration, and logging infrastructure shared by the CPU,
//! memory, kernel and loader crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::Config;
pub use error::{EmulatorError, Result};
pub use types::*;
