//! Horizon kernel emulation (HLE) for oxidized-nx
//!
//! This crate is the operating-system side of the CPU boundary: it answers
//! supervisor calls issued by the execution cores, owns the process and
//! thread tables and the guest-thread scheduler, and drives the cores from
//! host threads through [`System`].

pub mod kernel;
pub mod process;
pub mod result;
pub mod scheduler;
pub mod svc;
pub mod svc_numbers;
pub mod system;
pub mod thread;
pub mod timing;

pub use kernel::Kernel;
pub use process::{Process, ProcessManager};
pub use result::ResultCode;
pub use scheduler::Scheduler;
pub use system::System;
pub use thread::{Thread, ThreadManager};
pub use timing::CoreTiming;
