//! Two-party lockstep over a shared memory segment.
//!
//! The driving side starts a tick and waits until the following side
//! reports it done. Used when a hardware module, not the controller, owns
//! the cycle clock.

use crate::error::ShmResult;
use crate::futex::BinaryFutex;
use crate::payload::SegmentPayload;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lockstep record.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Lockstep {
    tick: BinaryFutex,
    done: BinaryFutex,
    tick_count: AtomicU64,
    tick_time_ns: AtomicU64,
}

unsafe impl SegmentPayload for Lockstep {
    const TYPE_ID: &'static str = "hwm.Lockstep";
}

impl Lockstep {
    /// Fresh lockstep with no tick pending.
    pub const fn new() -> Self {
        Self {
            tick: BinaryFutex::new(false),
            done: BinaryFutex::new(false),
            tick_count: AtomicU64::new(0),
            tick_time_ns: AtomicU64::new(0),
        }
    }

    // ─── Driving side ───────────────────────────────────────────────

    /// Start tick number `tick_count() + 1` at `time_ns`.
    pub fn begin_tick(&self, time_ns: u64) -> ShmResult<()> {
        self.tick_time_ns.store(time_ns, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Release);
        self.tick.post()
    }

    /// Wait until the follower finished the current tick.
    pub fn wait_tick_done(&self, timeout: Duration) -> ShmResult<()> {
        self.done.wait_for(timeout)
    }

    // ─── Following side ─────────────────────────────────────────────

    /// Wait for the next tick; returns its number.
    pub fn wait_for_tick(&self, timeout: Duration) -> ShmResult<u64> {
        self.tick.wait_for(timeout)?;
        Ok(self.tick_count())
    }

    /// Report the current tick done.
    pub fn finish_tick(&self) -> ShmResult<()> {
        self.done.post()
    }

    // ─── Both ───────────────────────────────────────────────────────

    /// Number of ticks started so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Acquire)
    }

    /// Time passed to the last `begin_tick` [ns].
    pub fn last_tick_time_ns(&self) -> u64 {
        self.tick_time_ns.load(Ordering::Acquire)
    }

    /// Drop pending posts and reopen closed futexes.
    pub fn reset(&self) {
        self.tick.reset();
        self.done.reset();
    }

    /// Wake and fail every waiter on both sides.
    pub fn close(&self) {
        self.tick.close();
        self.done.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn tick_roundtrip_between_threads() {
        let lockstep = Arc::new(Lockstep::new());
        let follower = {
            let lockstep = Arc::clone(&lockstep);
            std::thread::spawn(move || {
                for expected in 1..=3 {
                    let tick = lockstep.wait_for_tick(Duration::from_secs(5)).unwrap();
                    assert_eq!(tick, expected);
                    lockstep.finish_tick().unwrap();
                }
            })
        };

        for i in 1..=3u64 {
            lockstep.begin_tick(i * 1_000).unwrap();
            lockstep.wait_tick_done(Duration::from_secs(5)).unwrap();
        }
        follower.join().unwrap();
        assert_eq!(lockstep.tick_count(), 3);
        assert_eq!(lockstep.last_tick_time_ns(), 3_000);
    }

    #[test]
    fn close_fails_waiters() {
        let lockstep = Lockstep::new();
        lockstep.close();
        assert!(lockstep.wait_for_tick(Duration::from_millis(10)).is_err());
        lockstep.reset();
        assert!(lockstep.begin_tick(1).is_ok());
    }
}
