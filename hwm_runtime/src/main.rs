//! # Hardware Module Binary
//!
//! Runs one hardware module next to a realtime controller.
//!
//! # Usage
//!
//! ```bash
//! # Loopback module, normal scheduling
//! hardware_module --module-config-file config/loopback.toml
//!
//! # Realtime threads pinned to core 3
//! hardware_module --module-config-file config/loopback.toml --realtime --realtime-core 3
//!
//! # JSON logs at debug level
//! hardware_module --module-config-file config/loopback.toml -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use hwm_common::config::ModuleConfig;
use hwm_common::consts::SHUTDOWN_POLL_INTERVAL;
use hwm_common::exit_code::HardwareModuleExitCode;
use hwm_runtime::main_util::{self, ShutdownCause};
use hwm_runtime::{HardwareModuleRuntime, LoopbackModule, ModuleRegistry};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Hardware module runtime
#[derive(Parser, Debug)]
#[command(name = "hardware_module")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Runs a hardware module and serves its lifecycle triggers")]
#[command(long_about = None)]
struct Args {
    /// Path to the module configuration (TOML).
    #[arg(long, value_name = "FILE")]
    module_config_file: PathBuf,

    /// Module type to instantiate.
    #[arg(long, default_value = LoopbackModule::TYPE_NAME)]
    module: String,

    /// Run the runtime threads with SCHED_FIFO.
    #[arg(long)]
    realtime: bool,

    /// CPU for the realtime threads if the config names none.
    #[arg(long, value_name = "N")]
    realtime_core: Option<usize>,

    /// Overrides `shared_memory_namespace` of the config.
    #[arg(long, value_name = "NS")]
    shared_memory_namespace: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(code) => {
            info!("Hardware module shutdown complete with code {code}");
            std::process::exit(code.code());
        }
        Err(e) => {
            error!("Hardware module main failed: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<HardwareModuleExitCode, Box<dyn std::error::Error>> {
    let mut config = match ModuleConfig::load_validated(&args.module_config_file) {
        Ok(config) => config,
        Err(e) => {
            setup_tracing(args, "info");
            return Err(format!(
                "Failed to load module config {}: {e}",
                args.module_config_file.display()
            )
            .into());
        }
    };
    setup_tracing(args, config.log_level.as_filter());
    info!("Hardware module v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Some(namespace) = &args.shared_memory_namespace {
        config.shared_memory_namespace = namespace.clone();
    }
    info!("Shared memory namespace: '{}'", config.shared_memory_namespace);

    let shutdown_requested = main_util::install_shutdown_handler()?;
    let scheduling = main_util::setup_rt_scheduling(&config, args.realtime, args.realtime_core)?;

    let module = ModuleRegistry::with_builtin_modules().create_module(&args.module)?;
    info!("Creating hardware module '{}' of type '{}'", config.name, args.module);
    let mut runtime = HardwareModuleRuntime::create(module, config)?;

    let run_failed = match runtime.run(scheduling.use_realtime, &scheduling.cpu_affinity) {
        Ok(()) => false,
        Err(e) => {
            error!("Error running hardware module: {e}");
            true
        }
    };

    info!("Running until receiving shutdown signal");
    let cause = main_util::wait_for_shutdown(
        &shutdown_requested,
        || runtime.hardware_module_state().code,
        SHUTDOWN_POLL_INTERVAL,
    );
    if cause == ShutdownCause::FatalFault {
        error!("Hardware module is fatally faulted: {}", runtime.hardware_module_state());
    }

    info!("Stopping hardware module. Shutting down ...");
    if let Err(e) = runtime.stop() {
        error!("Failed to stop hardware module: {e}");
    }
    Ok(main_util::exit_code(cause, run_failed))
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: &str) {
    let level = if args.verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
