//! Process-level helpers for the `hardware_module` binary.

use crate::error::{ErrorKind, HwmError, HwmResult};
use hwm_common::config::ModuleConfig;
use hwm_common::exit_code::HardwareModuleExitCode;
use hwm_common::state::StateCode;
use nix::sys::mman::{MlockAllFlags, mlockall};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Scheduling the runtime threads are started with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtScheduling {
    /// SCHED_FIFO for the runtime threads.
    pub use_realtime: bool,
    /// CPUs the realtime threads are pinned to.
    pub cpu_affinity: Vec<usize>,
}

/// Resolve CPU affinity and lock memory for realtime operation.
///
/// Cores come from `[realtime] realtime_cores`, else from `realtime_core`
/// (the `--realtime-core` flag), else none. Realtime scheduling without any
/// core is a configuration error.
pub fn setup_rt_scheduling(
    config: &ModuleConfig,
    use_realtime: bool,
    realtime_core: Option<usize>,
) -> HwmResult<RtScheduling> {
    let mut cpu_affinity = if !config.realtime.realtime_cores.is_empty() {
        info!("Reading realtime cores from config");
        config.realtime.realtime_cores.clone()
    } else if let Some(core) = realtime_core {
        info!("Reading realtime core from flag");
        vec![core]
    } else {
        Vec::new()
    };
    cpu_affinity.sort_unstable();
    cpu_affinity.dedup();

    if let Some(online) = online_cpu_count() {
        if let Some(bad) = cpu_affinity.iter().find(|&&cpu| cpu >= online) {
            return Err(HwmError::invalid_argument(format!(
                "Realtime core {bad} does not exist ({online} CPUs online)"
            )));
        }
    }

    if !use_realtime {
        return Ok(RtScheduling {
            use_realtime,
            cpu_affinity,
        });
    }

    if cpu_affinity.is_empty() {
        return Err(HwmError::invalid_argument(
            "A realtime configuration needs at least one realtime core",
        ));
    }
    info!("Configuring hardware module with realtime options, cores {cpu_affinity:?}");
    if let Err(e) = mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        warn!("mlockall failed: {e}");
    }
    Ok(RtScheduling {
        use_realtime,
        cpu_affinity,
    })
}

/// Number of online CPUs, `None` if the kernel does not say.
pub fn online_cpu_count() -> Option<usize> {
    // SAFETY: sysconf has no memory safety preconditions.
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    usize::try_from(count).ok().filter(|&n| n > 0)
}

/// Set by SIGINT/SIGTERM.
pub fn install_shutdown_handler() -> HwmResult<Arc<AtomicBool>> {
    let requested = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&requested);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| HwmError::new(ErrorKind::Internal, format!("Unable to install signal handler: {e}")))?;
    Ok(requested)
}

/// What ended [`wait_for_shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Shutdown was requested.
    Signal,
    /// The module became `FatallyFaulted`.
    FatalFault,
}

/// Poll every `interval` until `shutdown_requested` is set or `state`
/// reports `FatallyFaulted`.
pub fn wait_for_shutdown(
    shutdown_requested: &AtomicBool,
    state: impl Fn() -> StateCode,
    interval: Duration,
) -> ShutdownCause {
    loop {
        if shutdown_requested.load(Ordering::SeqCst) {
            return ShutdownCause::Signal;
        }
        if state() == StateCode::FatallyFaulted {
            return ShutdownCause::FatalFault;
        }
        std::thread::sleep(interval);
    }
}

/// Exit code of a process that stopped for `cause`.
///
/// A module whose `run` failed exits with `FatalFaultDuringInit` however it
/// was stopped.
pub fn exit_code(cause: ShutdownCause, run_failed: bool) -> HardwareModuleExitCode {
    match (cause, run_failed) {
        (_, true) => HardwareModuleExitCode::FatalFaultDuringInit,
        (ShutdownCause::FatalFault, false) => HardwareModuleExitCode::FatalFaultDuringExec,
        (ShutdownCause::Signal, false) => HardwareModuleExitCode::NormalShutdown,
    }
}
