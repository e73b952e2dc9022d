//! Thread creation with optional realtime scheduling.
//!
//! Scheduling is applied from inside the new thread before the body runs;
//! a failure is reported back to the spawner and the body is skipped.

use crate::error::{ShmError, ShmResult};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::debug;

/// Scheduling options for a spawned thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadOptions {
    /// Thread name.
    pub name: Option<String>,
    /// SCHED_FIFO priority; `None` keeps the default scheduler.
    pub realtime_priority: Option<i32>,
    /// CPUs the thread may run on; empty keeps the inherited mask.
    pub affinity: Vec<usize>,
}

impl ThreadOptions {
    /// Options with a thread name only.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Builder: set the thread name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: use SCHED_FIFO with `priority`.
    pub fn with_realtime_priority(mut self, priority: i32) -> Self {
        self.realtime_priority = Some(priority);
        self
    }

    /// Builder: pin to `cpus`.
    pub fn with_affinity(mut self, cpus: impl IntoIterator<Item = usize>) -> Self {
        self.affinity = cpus.into_iter().collect();
        self
    }

    /// Whether any realtime setting is requested.
    pub fn is_realtime(&self) -> bool {
        self.realtime_priority.is_some()
    }
}

/// Apply `options` to the calling thread.
pub fn apply_to_current_thread(options: &ThreadOptions) -> ShmResult<()> {
    if !options.affinity.is_empty() {
        set_affinity(&options.affinity)?;
    }
    if let Some(priority) = options.realtime_priority {
        set_fifo_scheduler(priority)?;
    }
    Ok(())
}

/// Spawn `body` on a new thread configured by `options`.
pub fn spawn_with_options<F>(options: &ThreadOptions, body: F) -> ShmResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = std::thread::Builder::new();
    if let Some(name) = &options.name {
        builder = builder.name(name.clone());
    }

    let (setup_tx, setup_rx) = mpsc::sync_channel::<ShmResult<()>>(1);
    let thread_options = options.clone();
    let handle = builder.spawn(move || {
        let setup = apply_to_current_thread(&thread_options);
        let ok = setup.is_ok();
        let _ = setup_tx.send(setup);
        if ok {
            body();
        }
    })?;

    match setup_rx.recv() {
        Ok(Ok(())) => {
            debug!(
                "Started thread {:?} (priority {:?}, affinity {:?})",
                options.name, options.realtime_priority, options.affinity
            );
            Ok(handle)
        }
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(ShmError::ThreadSetup {
                reason: "thread exited before reporting its setup".to_string(),
            })
        }
    }
}

fn set_affinity(cpus: &[usize]) -> ShmResult<()> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    for &cpu in cpus {
        cpuset.set(cpu).map_err(|e| ShmError::ThreadSetup {
            reason: format!("CpuSet::set({cpu}) failed: {e}"),
        })?;
    }
    sched_setaffinity(Pid::from_raw(0), &cpuset).map_err(|e| ShmError::ThreadSetup {
        reason: format!("sched_setaffinity failed: {e}"),
    })
}

fn set_fifo_scheduler(priority: i32) -> ShmResult<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: plain syscall wrapper; `param` outlives the call.
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::from_raw_os_error(ret);
        return Err(ShmError::ThreadSetup {
            reason: format!("pthread_setschedparam(SCHED_FIFO, {priority}) failed: {err}"),
        });
    }
    Ok(())
}
