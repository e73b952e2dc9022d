//! # Hardware Module Runtime
//!
//! Hosts one hardware driver in its own process and exposes it to a
//! realtime controller through shared memory.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────── hardware_module process ─────────────────────────┐
//!                    │                                                                           │
//!  controller ──────►│ trigger threads ──► CallbackHandler ──► HardwareModuleInterface (driver)  │
//!  (other process)   │                        │    ▲                    │                        │
//!                    │                        ▼    │ requests           │ advertise / handles    │
//!                    │                   StateMirror                    ▼                        │
//!                    │                        │             HardwareInterfaceRegistry            │
//!                    └────────────────────────┼──────────────────────────┼───────────────────────┘
//!                                             ▼                          ▼
//!                               hardware_module_state        <ns>.<module>.<interface> segments
//! ```
//!
//! ## Lifecycle
//!
//! `Deactivated → Activating → Activated → MotionEnabling → MotionEnabled`,
//! with `Faulted`/`ClearingFaults` for recoverable failures and the terminal
//! `FatallyFaulted` and `InitFailed`. [`state_guard::classify`] is the full
//! table.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hwm_common::config::ModuleConfig;
//! use hwm_runtime::{HardwareModuleRuntime, ModuleRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let module = ModuleRegistry::with_builtin_modules().create_module("loopback")?;
//! let mut runtime = HardwareModuleRuntime::create(module, ModuleConfig::new("arm"))?;
//! runtime.run(false, &[])?;
//! // ... controller drives the module through its triggers ...
//! runtime.stop()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod callback_handler;
pub mod double_buffer;
pub mod error;
pub mod handle;
pub mod init_context;
pub mod interfaces;
pub mod loopback;
pub mod main_util;
pub mod module;
pub mod module_registry;
pub mod realtime_clock;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod state_guard;
pub mod state_mirror;
pub mod validator;

pub use callback_handler::CallbackHandler;
pub use error::{ErrorKind, HwmError, HwmResult};
pub use handle::{
    HandleError, InterfaceHandle, MutableHandle, MutableStrictHandle, ReadOnlyHandle,
    StrictHandle,
};
pub use init_context::InitContext;
pub use interfaces::{HardwareModuleStatePayload, IconState};
pub use loopback::LoopbackModule;
pub use module::{DriverError, DriverResult, HardwareModuleInterface, Severity};
pub use module_registry::ModuleRegistry;
pub use realtime_clock::RealtimeClock;
pub use registry::HardwareInterfaceRegistry;
pub use runtime::HardwareModuleRuntime;
pub use state_guard::{TransitionKind, classify};
pub use validator::CommandValidator;
