//! Workspace-wide constants.
//!
//! Single source of truth for segment limits, reserved interface names and
//! timing defaults. Imported by all crates.

use std::time::Duration;

// ─── Shared Memory Limits ───────────────────────────────────────────

/// Maximum segment name length in bytes, including the terminating NUL.
pub const MAX_SEGMENT_NAME_LEN: usize = 64;

/// Maximum number of segments a single manager may own.
pub const MAX_SEGMENTS: usize = 200;

/// Maximum length of a payload type id in bytes, including the terminating NUL.
pub const MAX_TYPE_ID_LEN: usize = 64;

/// Capacity of a fault message in bytes.
pub const FAULT_MESSAGE_CAPACITY: usize = 256;

/// Default directory holding shared memory segment files.
pub const DEFAULT_SHM_ROOT: &str = "/dev/shm";

// ─── Reserved Interfaces ────────────────────────────────────────────

/// Cycle counter published by the supervising controller.
pub const ICON_STATE_INTERFACE_NAME: &str = "icon_state";

/// Lifecycle state of this hardware module.
pub const HARDWARE_MODULE_STATE_INTERFACE_NAME: &str = "hardware_module_state";

/// Directory of all advertised interfaces.
pub const MODULE_INFO_NAME: &str = "hardware_module_info";

/// Lockstep segment used when the module drives the realtime clock.
pub const REALTIME_CLOCK_NAME: &str = "realtime_clock";

// ─── Lifecycle Requests ─────────────────────────────────────────────

/// Number of transition requests that may be queued at once.
pub const REQUEST_QUEUE_CAPACITY: usize = 10;

/// Preallocated completion slots (queued requests plus waiters holding a result).
pub const REQUEST_SLOT_COUNT: usize = 2 * REQUEST_QUEUE_CAPACITY;

/// How long a non-realtime caller waits for the cycle thread to apply a request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Threads & Polling ──────────────────────────────────────────────

/// Wait slice of a remote trigger server before re-checking its running flag.
pub const TRIGGER_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Interval at which the main loop checks for a shutdown request.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default SCHED_FIFO priority for realtime server threads.
pub const DEFAULT_RT_PRIORITY: i32 = 80;
