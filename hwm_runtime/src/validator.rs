//! Cycle freshness checks.
//!
//! The controller stamps `icon_state` with the current cycle before it calls
//! `apply_command`. A command interface written in that same cycle carries
//! the same number in its header; anything else means the command is stale.

use crate::error::HwmResult;
use crate::handle::{HandleError, InterfaceHandle, ReadOnlyHandle};
use crate::interfaces::IconState;
use crate::registry::HardwareInterfaceRegistry;

/// Check that `handle` was written in the cycle `icon_state` reports.
///
/// Fails with [`HandleError::IconStateInconsistent`] when the `icon_state`
/// header and payload disagree (the controller is mid-write or never wrote),
/// and with [`HandleError::NotUpdatedThisCycle`] when `handle` is stale.
#[inline]
pub fn was_updated_this_cycle<H: InterfaceHandle + ?Sized>(
    icon_state: &ReadOnlyHandle<IconState>,
    handle: &H,
) -> Result<(), HandleError> {
    let icon_cycle = icon_state.value()?.current_cycle;
    if icon_state.last_updated_cycle()? != icon_cycle {
        return Err(HandleError::IconStateInconsistent);
    }
    let command_cycle = handle.last_updated_cycle()?;
    if command_cycle != icon_cycle {
        return Err(HandleError::NotUpdatedThisCycle {
            icon_cycle,
            command_cycle,
        });
    }
    Ok(())
}

/// Owns an `icon_state` handle and checks interfaces against it.
pub struct CommandValidator {
    icon_state: ReadOnlyHandle<IconState>,
}

impl CommandValidator {
    /// Attach to the `icon_state` interface of `registry`.
    pub fn create(registry: &HardwareInterfaceRegistry) -> HwmResult<Self> {
        Ok(Self {
            icon_state: registry.icon_state()?,
        })
    }

    /// See [`was_updated_this_cycle`].
    #[inline]
    pub fn was_updated_this_cycle<H: InterfaceHandle + ?Sized>(
        &self,
        handle: &H,
    ) -> Result<(), HandleError> {
        was_updated_this_cycle(&self.icon_state, handle)
    }

    /// Cycle the controller currently reports.
    pub fn current_cycle(&self) -> Result<u64, HandleError> {
        Ok(self.icon_state.value()?.current_cycle)
    }
}
