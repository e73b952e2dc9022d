//! Lifecycle transition guard.
//!
//! Pure classification of `(from, to)` pairs. Every state change in the
//! runtime goes through [`classify`] first.
//!
//! ```text
//!   Deactivated ─► Preparing ─► Prepared ─► Activating
//!   Deactivated ─► Activating ─► Activated
//!   Activated ─► MotionEnabling ─► MotionEnabled ─► MotionDisabling ─► Activated
//!   Faulted ─► ClearingFaults ─► Activated
//!   (active states) ─► Deactivating ─► Deactivated
//!   (active states) ─► Faulted
//!   Deactivated ─► InitFailed          (terminal)
//!   (any state) ─► FatallyFaulted      (terminal)
//! ```

use hwm_common::state::StateCode;

/// Result of classifying a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// The state changes.
    Allowed,
    /// Accepted, the state stays as it is.
    NoOp,
    /// Refused.
    Prohibited,
}

/// Classify the transition `from → to`.
#[inline]
pub const fn classify(from: StateCode, to: StateCode) -> TransitionKind {
    use StateCode::*;
    use TransitionKind::*;

    if let FatallyFaulted = from {
        return match to {
            FatallyFaulted => NoOp,
            _ => Prohibited,
        };
    }
    if let FatallyFaulted = to {
        return Allowed;
    }

    match (from, to) {
        (Deactivated, Activating | InitFailed | Preparing) => Allowed,
        (Deactivated, Deactivating) => NoOp,

        (Preparing, Prepared | Faulted) => Allowed,
        (Prepared, Activating | Deactivating) => Allowed,

        (Activating, Activated | Faulted) => Allowed,

        (Activated, MotionEnabling | Deactivating | Faulted) => Allowed,
        (Activated, MotionDisabling | ClearingFaults) => NoOp,

        (MotionEnabling, MotionEnabled | Deactivating | Faulted) => Allowed,

        (MotionEnabled, MotionDisabling | Faulted | Deactivating) => Allowed,
        (MotionEnabled, MotionEnabling | ClearingFaults) => NoOp,

        (MotionDisabling, Activated | Deactivating | Faulted) => Allowed,

        (Faulted, ClearingFaults | Deactivating | Faulted) => Allowed,

        (ClearingFaults, Activated | Deactivating | Faulted) => Allowed,

        (Deactivating, Deactivated) => Allowed,

        _ => Prohibited,
    }
}

/// Shorthand for `classify(from, to) == TransitionKind::Allowed`.
#[inline]
pub const fn is_allowed(from: StateCode, to: StateCode) -> bool {
    matches!(classify(from, to), TransitionKind::Allowed)
}
