//! # Hardware Module Shared Memory
//!
//! Typed shared memory segments and the interprocess primitives a hardware
//! module uses to talk to its supervising realtime controller.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐         ┌──────────────────────────────┐
//! │  Hardware Module     │         │  <root>/<ns>.<module>.<name> │
//! │                      │ create  │ ┌──────────────────────────┐ │
//! │ SharedMemoryManager  ├────────►│ │ SegmentHeader            │ │
//! │   add_segment<T>()   │         │ │  type_id, schema_version │ │
//! │   get / get_mut      │         │ │  update_counter          │ │
//! │                      │         │ │  last_updated_cycle/time │ │
//! │ RemoteTriggerServer  │         │ ├──────────────────────────┤ │
//! │   <name>.req/.res    │         │ │ payload T (#[repr(C)])   │ │
//! └──────────────────────┘         │ └──────────────────────────┘ │
//!                                  └──────────────┬───────────────┘
//!                                                 │ attach
//!                                  ┌──────────────▼───────────────┐
//!                                  │  Controller / tools          │
//!                                  │  ReadOnlyMemorySegment<T>    │
//!                                  │  RemoteTriggerClient         │
//!                                  └──────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hwm_shared_memory::{SegmentPayload, SharedMemoryManager};
//!
//! #[repr(C)]
//! struct Temperature {
//!     celsius: f64,
//! }
//!
//! unsafe impl SegmentPayload for Temperature {
//!     const TYPE_ID: &'static str = "demo.Temperature";
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = SharedMemoryManager::create("/dev/shm", "", "sensor")?;
//! manager.add_segment("temperature", false, Temperature { celsius: 21.0 })?;
//!
//! let mut writer = manager.get_mut::<Temperature>("temperature")?;
//! writer.value_mut().celsius = 22.5;
//! writer.updated_at(1_000, 1);
//!
//! let reader = manager.get::<Temperature>("temperature")?;
//! assert_eq!(reader.header().num_updates(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Consistency
//!
//! There is no cross-process lock. One process writes a segment, any number
//! read it; readers use `update_counter` and `last_updated_cycle` to decide
//! whether what they read is current.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod futex;
pub mod header;
pub mod lockstep;
pub mod manager;
pub mod payload;
pub mod platform;
pub mod segment;
pub mod segment_info;
pub mod thread;
pub mod trigger;

pub use error::{ShmError, ShmResult};
pub use futex::BinaryFutex;
pub use header::SegmentHeader;
pub use lockstep::Lockstep;
pub use manager::{SharedMemoryManager, segment_path, verify_name};
pub use payload::SegmentPayload;
pub use segment::{ReadOnlyMemorySegment, ReadWriteMemorySegment, segment_size};
pub use segment_info::{SegmentInfo, SegmentName};
pub use thread::{ThreadOptions, spawn_with_options};
pub use trigger::{RemoteTriggerClient, RemoteTriggerServer};

/// Initialize tracing for tests and tools
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
