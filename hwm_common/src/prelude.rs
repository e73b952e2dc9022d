//! Prelude module for common re-exports.
//!
//! ```rust
//! use hwm_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, ModuleConfig, RealtimeConfig};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::exit_code::HardwareModuleExitCode;
pub use crate::state::{FaultMessage, HardwareModuleState, StateCode, fault_message};

// ─── Reserved Names ─────────────────────────────────────────────────
pub use crate::consts::{
    HARDWARE_MODULE_STATE_INTERFACE_NAME, ICON_STATE_INTERFACE_NAME, MODULE_INFO_NAME,
};
