//! Lifecycle state codes of a hardware module.
//!
//! `StateCode` uses `#[repr(u8)]` so it can be stored in an atomic and in the
//! `hardware_module_state` shared memory record without conversion tables.
//! Fault messages use a fixed-capacity string so that the cycle thread can
//! produce them without touching the heap.

use crate::consts::FAULT_MESSAGE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-capacity fault message. Longer input is truncated on a char boundary.
pub type FaultMessage = heapless::String<FAULT_MESSAGE_CAPACITY>;

/// Builds a [`FaultMessage`] from `text`, truncating what does not fit.
pub fn fault_message(text: &str) -> FaultMessage {
    let mut message = FaultMessage::new();
    for c in text.chars() {
        if message.push(c).is_err() {
            break;
        }
    }
    message
}

/// Lifecycle state of a hardware module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum StateCode {
    /// Initialized, not talking to the hardware.
    #[default]
    Deactivated = 0,
    /// `activate` is running.
    Activating = 1,
    /// Active, motion disabled.
    Activated = 2,
    /// `enable_motion` is running.
    MotionEnabling = 3,
    /// Commands are applied every cycle.
    MotionEnabled = 4,
    /// `disable_motion` is running.
    MotionDisabling = 5,
    /// Recoverable fault, leave via `clear_faults`.
    Faulted = 6,
    /// `clear_faults` is running.
    ClearingFaults = 7,
    /// `deactivate` is running.
    Deactivating = 8,
    /// `init` failed. Terminal.
    InitFailed = 9,
    /// Unrecoverable fault. Terminal, requires a process restart.
    FatallyFaulted = 10,
    /// `prepare` is running.
    Preparing = 11,
    /// Prepared for activation.
    Prepared = 12,
}

impl StateCode {
    /// Every state code, in numeric order.
    pub const ALL: [StateCode; 13] = [
        Self::Deactivated,
        Self::Activating,
        Self::Activated,
        Self::MotionEnabling,
        Self::MotionEnabled,
        Self::MotionDisabling,
        Self::Faulted,
        Self::ClearingFaults,
        Self::Deactivating,
        Self::InitFailed,
        Self::FatallyFaulted,
        Self::Preparing,
        Self::Prepared,
    ];

    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Deactivated),
            1 => Some(Self::Activating),
            2 => Some(Self::Activated),
            3 => Some(Self::MotionEnabling),
            4 => Some(Self::MotionEnabled),
            5 => Some(Self::MotionDisabling),
            6 => Some(Self::Faulted),
            7 => Some(Self::ClearingFaults),
            8 => Some(Self::Deactivating),
            9 => Some(Self::InitFailed),
            10 => Some(Self::FatallyFaulted),
            11 => Some(Self::Preparing),
            12 => Some(Self::Prepared),
            _ => None,
        }
    }

    /// Human readable name, e.g. `MotionEnabled`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deactivated => "Deactivated",
            Self::Activating => "Activating",
            Self::Activated => "Activated",
            Self::MotionEnabling => "MotionEnabling",
            Self::MotionEnabled => "MotionEnabled",
            Self::MotionDisabling => "MotionDisabling",
            Self::Faulted => "Faulted",
            Self::ClearingFaults => "ClearingFaults",
            Self::Deactivating => "Deactivating",
            Self::InitFailed => "InitFailed",
            Self::FatallyFaulted => "FatallyFaulted",
            Self::Preparing => "Preparing",
            Self::Prepared => "Prepared",
        }
    }

    /// States that can only be left by restarting the process.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::InitFailed | Self::FatallyFaulted)
    }

    /// States describing a fault of either severity.
    #[inline]
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            Self::Faulted | Self::FatallyFaulted | Self::InitFailed
        )
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state together with its fault message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardwareModuleState {
    /// State code.
    pub code: StateCode,
    /// Message describing the fault, empty otherwise.
    pub message: FaultMessage,
}

impl HardwareModuleState {
    /// Create a state with a (possibly truncated) message.
    pub fn new(code: StateCode, message: &str) -> Self {
        Self {
            code,
            message: fault_message(message),
        }
    }
}

impl fmt::Display for HardwareModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}
