//! # hwsim Emulator Binary
//!
//! Loads a machine description, runs the simulation core and prints a JSON
//! status snapshot of every object on exit.
//!
//! # Usage
//!
//! ```bash
//! # Run threaded until Ctrl-C
//! hwsim --config config/machine.toml
//!
//! # Run threaded for two seconds
//! hwsim --config config/machine.toml --duration-ms 2000
//!
//! # Deterministic offline run: advance 500000 controller ticks
//! hwsim --config config/machine.toml --stepped 500000
//!
//! # Verbose JSON logs
//! hwsim --config config/machine.toml -v --json
//! ```

use clap::Parser;
use hwsim_common::config::ConfigLoader;
use hwsim_common::machine::MachineConfig;
use hwsim_core::SimCore;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// hwsim - motion controller hardware emulator
#[derive(Parser, Debug)]
#[command(name = "hwsim")]
#[command(version)]
#[command(about = "Concurrent hardware emulator core with virtual clock and object scheduler")]
#[command(long_about = None)]
struct Args {
    /// Path to machine configuration file (machine.toml)
    #[arg(short, long, default_value = "machine.toml")]
    config: PathBuf,

    /// Stop the threaded run after this many milliseconds
    #[arg(short, long, value_name = "MS")]
    duration_ms: Option<u64>,

    /// Run stepped for this many controller ticks instead of starting threads
    #[arg(long, value_name = "TICKS", conflicts_with = "duration_ms")]
    stepped: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("hwsim failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let machine = MachineConfig::load(&args.config);
    setup_tracing(&args, machine.as_ref().ok());

    info!("hwsim v{} starting...", env!("CARGO_PKG_VERSION"));
    let machine = machine?;
    info!("Loaded machine configuration from {:?}", args.config);
    let core = SimCore::from_machine_config(&machine)?;

    match args.stepped {
        Some(ticks) => {
            let now = core.step(ticks)?;
            info!(
                "Stepped {} ticks (runtime {} ms)",
                ticks,
                now.runtime_ns / 1_000_000
            );
        }
        None => run_threaded(&core, args.duration_ms)?,
    }

    println!("{}", serde_json::to_string_pretty(&core.report())?);
    info!("hwsim shutdown complete");
    Ok(())
}

fn run_threaded(core: &SimCore, duration_ms: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    core.start(None)?;
    let deadline = duration_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let stats = core.clock_stats();
    info!(
        "Clock: {} loops, {} overruns (max {}us)",
        stats.loops, stats.overruns, stats.max_overrun_us
    );
    core.stop()?;
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the machine's
/// log rules. Logs go to stderr so stdout carries only the status report.
///
/// Object loggers gate their own output through `LogFilter`; their events
/// are let through down to the most verbose level any rule asks for.
fn setup_tracing(args: &Args, machine: Option<&MachineConfig>) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Some(machine) = machine {
        let objects = machine.most_verbose_level().as_tracing();
        match format!("hwsim_core::logging={objects}").parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("hwsim: ignoring object log level {objects}: {e}"),
        }
    }

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
