//! Driver contract.
//!
//! This module defines:
//! - `HardwareModuleInterface` trait - lifecycle callbacks every driver implements
//! - `DriverError` / `Severity` - how a callback reports failure
//! - `ModuleFactory` type alias - constructor used by the module registry

use crate::error::HwmError;
use crate::handle::HandleError;
use crate::init_context::InitContext;
use hwm_common::state::{FaultMessage, StateCode, fault_message};
use std::fmt::Write;
use thiserror::Error;

/// How bad a driver failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Recoverable; the module goes to `Faulted` and waits for `clear_faults`.
    Fault,
    /// Unrecoverable; the module goes to `FatallyFaulted` and the process
    /// has to be restarted.
    Fatal,
}

impl Severity {
    /// State a failure of this severity leads to.
    #[inline]
    pub const fn state(self) -> StateCode {
        match self {
            Self::Fault => StateCode::Faulted,
            Self::Fatal => StateCode::FatallyFaulted,
        }
    }
}

/// Failure reported by a driver callback.
///
/// The message has fixed capacity so that realtime callbacks can build
/// errors without allocating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    /// Severity.
    pub severity: Severity,
    /// Description, surfaced on the `hardware_module_state` interface.
    pub message: FaultMessage,
}

impl DriverError {
    /// Recoverable failure.
    pub fn fault(message: &str) -> Self {
        Self {
            severity: Severity::Fault,
            message: fault_message(message),
        }
    }

    /// Unrecoverable failure.
    pub fn fatal(message: &str) -> Self {
        Self {
            severity: Severity::Fatal,
            message: fault_message(message),
        }
    }

    /// Whether this failure is unrecoverable.
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl From<HandleError> for DriverError {
    fn from(e: HandleError) -> Self {
        let mut message = FaultMessage::new();
        // Overflow only truncates.
        let _ = write!(message, "{e}");
        Self {
            severity: Severity::Fault,
            message,
        }
    }
}

impl From<HwmError> for DriverError {
    fn from(e: HwmError) -> Self {
        Self::fault(&e.to_string())
    }
}

/// Result of a driver callback.
pub type DriverResult<T = ()> = Result<T, DriverError>;

/// Constructor registered for a module type.
pub type ModuleFactory = fn() -> Box<dyn HardwareModuleInterface>;

/// Trait implemented by every hardware module.
///
/// The runtime calls `init` once with exclusive access, then shares the
/// module between the trigger threads; all later callbacks take `&self`.
/// State the cycle thread mutates needs interior mutability.
///
/// # Lifecycle
///
/// 1. `init()` - advertise interfaces, connect to the hardware
/// 2. `prepare()` (optional) and `activate()` - the controller starts cycling
/// 3. `read_status()` every cycle, `apply_command()` while motion is enabled
/// 4. `enable_motion()` / `disable_motion()` / `clear_faults()` on request
/// 5. `deactivate()` - the controller stopped cycling
/// 6. `shutdown()` - the process is stopping
///
/// # Timing Contracts
///
/// | Operation | Blocking allowed | Heap allocation |
/// |-----------|------------------|-----------------|
/// | `init()`, `prepare()`, `shutdown()` | yes | yes |
/// | `enable_motion()`, `disable_motion()`, `clear_faults()` | yes | yes |
/// | `activate()`, `deactivate()` | no | no |
/// | `enabled()`, `disabled()` | no | no |
/// | `read_status()`, `apply_command()` | no | no |
///
/// `shutdown()` must make any blocked callback return; the runtime only
/// joins its threads afterwards.
pub trait HardwareModuleInterface: Send + Sync {
    /// Advertise interfaces and set up communication with the hardware.
    fn init(&mut self, _context: &mut InitContext<'_>) -> DriverResult {
        Ok(())
    }

    /// Get ready for activation. May block.
    fn prepare(&self) -> DriverResult {
        Ok(())
    }

    /// The controller connected and starts its cycle.
    fn activate(&self) -> DriverResult;

    /// The controller stopped cycling. A later `activate` must succeed.
    fn deactivate(&self) -> DriverResult;

    /// Prepare to receive commands. May block; `read_status` keeps being
    /// called meanwhile.
    fn enable_motion(&self) -> DriverResult {
        Ok(())
    }

    /// First cycle with motion enabled.
    fn enabled(&self) -> DriverResult {
        Ok(())
    }

    /// Stop accepting commands. May block.
    fn disable_motion(&self) -> DriverResult {
        Ok(())
    }

    /// Last cycle with motion enabled.
    fn disabled(&self) -> DriverResult {
        Ok(())
    }

    /// Recover from a fault. May block.
    fn clear_faults(&self) -> DriverResult {
        Ok(())
    }

    /// The process is stopping. Must unblock every pending callback.
    fn shutdown(&self) -> DriverResult {
        Ok(())
    }

    /// Read the hardware and publish state interfaces.
    fn read_status(&self) -> DriverResult;

    /// Apply the command interfaces to the hardware.
    fn apply_command(&self) -> DriverResult;
}
