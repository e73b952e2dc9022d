//! Cycle clock driven by the module.
//!
//! Some hardware dictates the control rate (e.g. a bus master that cycles on
//! its own). Such a module sets `drives_realtime_clock` and ticks the
//! controller through the `realtime_clock` lockstep segment instead of
//! waiting for the controller's `read_status` trigger.

use crate::error::HwmResult;
use hwm_common::consts::REALTIME_CLOCK_NAME;
use hwm_shared_memory::{Lockstep, ReadWriteMemorySegment, SharedMemoryManager};
use std::time::{Duration, Instant};
use tracing::debug;

/// Driving side of the `realtime_clock` lockstep.
pub struct RealtimeClock {
    segment: ReadWriteMemorySegment<Lockstep>,
}

impl RealtimeClock {
    /// Create the `realtime_clock` segment in `manager`.
    pub fn create(manager: &mut SharedMemoryManager) -> HwmResult<Self> {
        manager.add_segment(REALTIME_CLOCK_NAME, false, Lockstep::new())?;
        let segment = manager.get_mut::<Lockstep>(REALTIME_CLOCK_NAME)?;
        debug!("Realtime clock of module '{}' created", manager.module_name());
        Ok(Self { segment })
    }

    /// Start one controller cycle at `time_ns` and wait until it is done.
    pub fn tick_blocking_with_timeout(&self, time_ns: u64, timeout: Duration) -> HwmResult<()> {
        let lockstep = self.segment.value();
        lockstep.begin_tick(time_ns)?;
        lockstep.wait_tick_done(timeout)?;
        Ok(())
    }

    /// Like [`tick_blocking_with_timeout`](Self::tick_blocking_with_timeout)
    /// with an absolute deadline.
    pub fn tick_blocking_with_deadline(&self, time_ns: u64, deadline: Instant) -> HwmResult<()> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        self.tick_blocking_with_timeout(time_ns, timeout)
    }

    /// Ticks started so far.
    pub fn tick_count(&self) -> u64 {
        self.segment.value().tick_count()
    }

    /// Drop pending ticks. Must not run concurrently with a tick.
    pub fn reset(&self) {
        self.segment.value().reset();
    }

    /// Wake and fail both sides; used on shutdown.
    pub fn close(&self) {
        self.segment.value().close();
    }
}
