//! Built-in interface payloads.
//!
//! Two segments exist in every module regardless of the driver:
//! `icon_state`, written by the controller, and `hardware_module_state`,
//! written by the runtime. Both records are `#[repr(C)]` and plain data.

use hwm_common::consts::FAULT_MESSAGE_CAPACITY;
use hwm_common::state::{HardwareModuleState, StateCode, fault_message};
use hwm_shared_memory::SegmentPayload;

/// Controller state as seen by the module.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconState {
    /// Current cycle of the controller; `u64::MAX` until the first cycle ran.
    pub current_cycle: u64,
}

impl IconState {
    /// Sentinel for "no cycle seen yet".
    pub const NO_CYCLE: u64 = u64::MAX;
}

impl Default for IconState {
    fn default() -> Self {
        Self {
            current_cycle: Self::NO_CYCLE,
        }
    }
}

unsafe impl SegmentPayload for IconState {
    const TYPE_ID: &'static str = "hwm.IconState";
}

/// Shared memory record of the module lifecycle state.
///
/// `code` is a raw [`StateCode`]; readers in other processes must tolerate
/// unknown values.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HardwareModuleStatePayload {
    code: u8,
    _padding: u8,
    message_len: u16,
    message: [u8; FAULT_MESSAGE_CAPACITY],
}

unsafe impl SegmentPayload for HardwareModuleStatePayload {
    const TYPE_ID: &'static str = "hwm.HardwareModuleState";
}

impl HardwareModuleStatePayload {
    /// Record holding `code` and `message` (truncated to capacity).
    pub fn new(code: StateCode, message: &str) -> Self {
        let mut payload = Self {
            code: code as u8,
            _padding: 0,
            message_len: 0,
            message: [0; FAULT_MESSAGE_CAPACITY],
        };
        payload.set(code, message);
        payload
    }

    /// Overwrite code and message.
    pub fn set(&mut self, code: StateCode, message: &str) {
        let truncated = fault_message(message);
        let bytes = truncated.as_bytes();
        self.code = code as u8;
        self.message[..bytes.len()].copy_from_slice(bytes);
        self.message[bytes.len()..].fill(0);
        self.message_len = bytes.len() as u16;
    }

    /// Decoded state code, `None` for values this build does not know.
    pub fn code(&self) -> Option<StateCode> {
        StateCode::from_u8(self.code)
    }

    /// Fault message. Empty if the stored bytes are not valid UTF-8.
    pub fn message(&self) -> &str {
        let len = usize::from(self.message_len).min(FAULT_MESSAGE_CAPACITY);
        std::str::from_utf8(&self.message[..len]).unwrap_or_default()
    }

    /// Owned copy; unknown codes read as `FatallyFaulted`.
    pub fn to_state(&self) -> HardwareModuleState {
        HardwareModuleState::new(
            self.code().unwrap_or(StateCode::FatallyFaulted),
            self.message(),
        )
    }
}

impl Default for HardwareModuleStatePayload {
    fn default() -> Self {
        Self::new(StateCode::Deactivated, "")
    }
}

impl std::fmt::Debug for HardwareModuleStatePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareModuleStatePayload")
            .field("code", &self.code())
            .field("message", &self.message())
            .finish()
    }
}
