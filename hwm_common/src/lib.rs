//! Hardware Module Common Library
//!
//! Shared constants, configuration loading and lifecycle state codes used by
//! every crate of the hardware module workspace.
//!
//! # Module Structure
//!
//! - [`config`] - Module configuration types and the TOML loader trait
//! - [`consts`] - Limits, reserved interface names and default paths
//! - [`exit_code`] - Process exit codes consumed by the supervising process manager
//! - [`state`] - Lifecycle state codes and fault messages
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use hwm_common::prelude::*;
//!
//! let state = HardwareModuleState::new(StateCode::Faulted, "encoder lost");
//! assert_eq!(state.code, StateCode::Faulted);
//! ```

pub mod config;
pub mod consts;
pub mod exit_code;
pub mod prelude;
pub mod state;
