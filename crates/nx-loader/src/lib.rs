//! Loader-to-executor handoff for oxidized-nx
//!
//! Binary-format parsing lives outside this crate. A parser hands over a
//! [`ModuleInfo`] (segments already extracted) plus [`ProgramMetadata`], and
//! [`AppLoader`] turns them into a running application: code region carved
//! out, segments copied through the guest write path, permissions applied,
//! main thread queued on the scheduler.

pub mod handoff;
pub mod module;

pub use handoff::AppLoader;
pub use module::{ModuleInfo, ProgramMetadata, Segment};
