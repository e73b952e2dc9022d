//! Authoritative module state and its two published copies.
//!
//! ```text
//!                      set_state_directly()
//!                              │
//!            ┌─────────────────┼──────────────────────┐
//!            ▼                 ▼                      ▼
//!     AtomicU8 code     hardware_module_state    DoubleBuffer
//!     (cycle thread)    segment (controller)     (non-realtime readers)
//! ```
//!
//! Writers serialize on a short internal lock; the lock is only held while
//! the three copies are updated, never across a driver callback. Readers
//! of the atomic code and of the double buffer never take it.

use crate::double_buffer::DoubleBuffer;
use crate::error::HwmResult;
use crate::handle::{MutableHandle, ReadOnlyHandle};
use crate::interfaces::{HardwareModuleStatePayload, IconState};
use crate::registry::HardwareInterfaceRegistry;
use crate::state_guard::{TransitionKind, classify};
use hwm_common::consts::HARDWARE_MODULE_STATE_INTERFACE_NAME;
use hwm_common::state::{HardwareModuleState, StateCode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{error, info};

/// Current state of one hardware module.
pub struct StateMirror {
    code: AtomicU8,
    /// Time of the last published change [ns since `epoch`].
    update_time_ns: AtomicU64,
    epoch: Instant,
    /// Shared memory copy; the lock also makes this the only writer of
    /// `snapshot`.
    published: Mutex<MutableHandle<HardwareModuleStatePayload>>,
    snapshot: DoubleBuffer<HardwareModuleStatePayload>,
    icon_state: ReadOnlyHandle<IconState>,
}

impl StateMirror {
    /// Advertise `hardware_module_state` on `registry` and start out
    /// `Deactivated`.
    pub fn create(registry: &mut HardwareInterfaceRegistry) -> HwmResult<Self> {
        let published = registry.advertise_mutable_interface(
            HARDWARE_MODULE_STATE_INTERFACE_NAME,
            HardwareModuleStatePayload::default(),
        )?;
        let icon_state = registry.icon_state()?;
        Ok(Self {
            code: AtomicU8::new(StateCode::Deactivated as u8),
            update_time_ns: AtomicU64::new(0),
            epoch: Instant::now(),
            published: Mutex::new(published),
            snapshot: DoubleBuffer::new(HardwareModuleStatePayload::default()),
            icon_state,
        })
    }

    /// Monotonic time on the clock used for update and request timestamps.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Current state code. Lock-free.
    #[inline]
    pub fn current_state_code(&self) -> StateCode {
        StateCode::from_u8(self.code.load(Ordering::Acquire)).unwrap_or(StateCode::FatallyFaulted)
    }

    /// Time of the last published change.
    #[inline]
    pub fn update_time_ns(&self) -> u64 {
        self.update_time_ns.load(Ordering::Acquire)
    }

    /// Latest published state. Lock-free, never blocks the cycle thread.
    pub fn hardware_module_state(&self) -> HardwareModuleState {
        self.snapshot.read().to_state()
    }

    /// Switch to `state` with `message` and publish it.
    ///
    /// Without `force` only transitions the guard classifies as allowed go
    /// through. A state and message identical to the current ones are not
    /// published again. Returns `true` if the state code changed.
    ///
    /// `silent` suppresses all logging; the cycle thread uses it when
    /// applying queued requests.
    pub fn set_state_directly(
        &self,
        state: StateCode,
        message: &str,
        force: bool,
        silent: bool,
    ) -> bool {
        let (current, kind) = {
            let mut published = self.published.lock();
            let current = self.current_state_code();
            let kind = if force {
                TransitionKind::Allowed
            } else {
                classify(current, state)
            };
            if kind == TransitionKind::Allowed
                && !self.publish_locked(&mut published, current, state, message)
            {
                return false;
            }
            (current, kind)
        };

        // Log outside the lock, the cycle thread takes it too.
        match kind {
            TransitionKind::Allowed => {
                let changed = current != state;
                if !silent && changed {
                    info!("Switching from {current} to {state} with message '{message}'");
                }
                changed
            }
            TransitionKind::NoOp => false,
            TransitionKind::Prohibited => {
                if !silent {
                    error!("Switching from {current} to {state} is prohibited!");
                }
                false
            }
        }
    }

    /// Write `state` to all three copies. Returns `false` if state and
    /// message equal the current ones and nothing was written.
    fn publish_locked(
        &self,
        published: &mut MutableHandle<HardwareModuleStatePayload>,
        current: StateCode,
        state: StateCode,
        message: &str,
    ) -> bool {
        let previous = self.snapshot.read();
        if current == state && previous.message() == message {
            return false;
        }

        let now = self.now_ns();
        self.code.store(state as u8, Ordering::Release);
        self.update_time_ns.store(now, Ordering::Release);

        let payload = HardwareModuleStatePayload::new(state, message);
        if let Ok(value) = published.value_mut() {
            *value = payload;
            let cycle = self
                .icon_state
                .value()
                .map_or(IconState::NO_CYCLE, |icon| icon.current_cycle);
            let _ = published.updated_at(now, cycle);
        }
        // SAFETY: the caller holds the `published` lock, so this is the only
        // writer.
        unsafe { self.snapshot.write(payload) };
        true
    }
}
