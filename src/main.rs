//! Oxidized-NX - Switch CPU/memory/syscall emulator core
//!
//! Loads a flat AArch64 code image at the code region base and runs it until
//! the guest exits or a core hits a fatal engine error.

use anyhow::{bail, Context};
use clap::Parser;
use nx_core::{logging, Config};
use nx_kernel::System;
use nx_loader::{AppLoader, ModuleInfo, ProgramMetadata};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "oxidized-nx", version, about = "Switch CPU/memory/syscall emulator core")]
struct Args {
    /// Flat code image, loaded at the code region base with entry at offset 0
    image: PathBuf,

    /// Time-slice every core onto one host thread
    #[arg(long)]
    single_core: bool,

    /// Number of emulated cores (1-4)
    #[arg(long, value_name = "N")]
    cores: Option<usize>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Program metadata (title id, name, main-thread settings) as TOML
    #[arg(long, value_name = "PATH")]
    metadata: Option<PathBuf>,

    /// Log every supervisor call
    #[arg(long)]
    trace_svc: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load().with_context(|| {
            format!("failed to load config {}", Config::config_path().display())
        })?,
    };
    if args.single_core {
        config.cpu.use_multi_core = false;
    }
    if let Some(cores) = args.cores {
        config.cpu.core_count = cores;
    }
    if args.trace_svc {
        config.debug.trace_svc = true;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    logging::init(config.debug.log_level);
    tracing::info!("Starting Oxidized-NX");

    let metadata = match &args.metadata {
        Some(path) => ProgramMetadata::load(path)
            .with_context(|| format!("failed to load metadata {}", path.display()))?,
        None => ProgramMetadata::default(),
    };
    let image = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    if image.is_empty() {
        bail!("{} is empty", args.image.display());
    }

    let mut system = System::initialize(config)?;
    let mut loader = AppLoader::new(&system);
    loader
        .load_application(&ModuleInfo::flat(image), &metadata)
        .context("failed to hand the image over to the kernel")?;

    let outcome = system.run();
    let break_info = system.kernel().break_info();
    system.shutdown();
    outcome?;

    if let Some(info) = break_info {
        bail!(
            "guest raised svcBreak: reason 0x{:x}, info 0x{:x} 0x{:x}",
            info.reason,
            info.info1,
            info.info2
        );
    }
    tracing::info!("Guest exited cleanly");
    Ok(())
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
