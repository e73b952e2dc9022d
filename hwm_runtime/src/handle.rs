//! Handles on advertised interfaces.
//!
//! A handle owns the mapping of one segment for as long as it lives, so a
//! payload reference obtained through it can never dangle. Handles are
//! move-only; `Default` yields an unbound handle whose accessors fail with
//! [`HandleError::Unbound`] instead of panicking.
//!
//! | Handle | Payload access | Freshness check on `value()` |
//! |---|---|---|
//! | [`ReadOnlyHandle`] | read | no |
//! | [`MutableHandle`] | read + write | no |
//! | [`StrictHandle`] | read | yes |
//! | [`MutableStrictHandle`] | read (checked) + write (unchecked) | yes |
//!
//! Errors are `Copy` and never allocate, so the accessors can be used from
//! the cycle thread.

use crate::error::{ErrorKind, HwmError};
use crate::interfaces::IconState;
use crate::validator::was_updated_this_cycle;
use hwm_shared_memory::{ReadOnlyMemorySegment, ReadWriteMemorySegment, SegmentHeader, SegmentPayload};
use thiserror::Error;

/// Failure of a handle accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Default-constructed handle.
    #[error("Handle is not bound to an interface")]
    Unbound,

    /// `icon_state` header and payload disagree about the current cycle.
    #[error("Cycle count of icon state is inconsistent.")]
    IconStateInconsistent,

    /// Interface was last written in an earlier cycle.
    #[error(
        "Command was not updated this cycle. icon_cycle[{icon_cycle}] != command_cycle[{command_cycle}]"
    )]
    NotUpdatedThisCycle {
        /// Cycle the controller is in.
        icon_cycle: u64,
        /// Cycle of the last write.
        command_cycle: u64,
    },
}

impl From<HandleError> for HwmError {
    fn from(e: HandleError) -> Self {
        HwmError::new(ErrorKind::FailedPrecondition, e.to_string())
    }
}

/// Header accessors shared by all handle kinds.
pub trait InterfaceHandle {
    /// Header of the bound segment.
    fn header(&self) -> Result<&SegmentHeader, HandleError>;

    /// Interface name, `None` for an unbound handle.
    fn interface_name(&self) -> Option<&str>;

    /// Whether the handle is unbound.
    fn is_empty(&self) -> bool {
        self.header().is_err()
    }

    /// Number of writes recorded so far.
    fn num_updates(&self) -> Result<u64, HandleError> {
        Ok(self.header()?.num_updates())
    }

    /// Cycle of the last recorded write.
    fn last_updated_cycle(&self) -> Result<u64, HandleError> {
        Ok(self.header()?.last_updated_cycle())
    }

    /// Time of the last recorded write [ns].
    fn last_updated_time(&self) -> Result<u64, HandleError> {
        Ok(self.header()?.last_updated_time_ns())
    }
}

// ─── Plain handles ──────────────────────────────────────────────────

/// Read-only handle, typically on an interface the controller writes.
pub struct ReadOnlyHandle<T> {
    segment: Option<ReadOnlyMemorySegment<T>>,
}

impl<T: SegmentPayload> ReadOnlyHandle<T> {
    /// Bind to `segment`.
    pub fn new(segment: ReadOnlyMemorySegment<T>) -> Self {
        Self {
            segment: Some(segment),
        }
    }

    /// Payload.
    #[inline]
    pub fn value(&self) -> Result<&T, HandleError> {
        self.segment
            .as_ref()
            .map(ReadOnlyMemorySegment::value)
            .ok_or(HandleError::Unbound)
    }
}

impl<T: SegmentPayload> InterfaceHandle for ReadOnlyHandle<T> {
    #[inline]
    fn header(&self) -> Result<&SegmentHeader, HandleError> {
        self.segment
            .as_ref()
            .map(ReadOnlyMemorySegment::header)
            .ok_or(HandleError::Unbound)
    }

    fn interface_name(&self) -> Option<&str> {
        self.segment.as_ref().map(ReadOnlyMemorySegment::name)
    }
}

impl<T> Default for ReadOnlyHandle<T> {
    fn default() -> Self {
        Self { segment: None }
    }
}

/// Read-write handle, typically on a state interface the module publishes.
pub struct MutableHandle<T> {
    segment: Option<ReadWriteMemorySegment<T>>,
}

impl<T: SegmentPayload> MutableHandle<T> {
    /// Bind to `segment`.
    pub fn new(segment: ReadWriteMemorySegment<T>) -> Self {
        Self {
            segment: Some(segment),
        }
    }

    /// Payload.
    #[inline]
    pub fn value(&self) -> Result<&T, HandleError> {
        self.segment
            .as_ref()
            .map(ReadWriteMemorySegment::value)
            .ok_or(HandleError::Unbound)
    }

    /// Mutable payload. Call [`updated_at`](Self::updated_at) once the
    /// write is complete.
    #[inline]
    pub fn value_mut(&mut self) -> Result<&mut T, HandleError> {
        self.segment
            .as_mut()
            .map(ReadWriteMemorySegment::value_mut)
            .ok_or(HandleError::Unbound)
    }

    /// Stamp the write with `time_ns` and `cycle` and bump the update counter.
    #[inline]
    pub fn updated_at(&self, time_ns: u64, cycle: u64) -> Result<(), HandleError> {
        let segment = self.segment.as_ref().ok_or(HandleError::Unbound)?;
        segment.updated_at(time_ns, cycle);
        Ok(())
    }
}

impl<T: SegmentPayload> InterfaceHandle for MutableHandle<T> {
    #[inline]
    fn header(&self) -> Result<&SegmentHeader, HandleError> {
        self.segment
            .as_ref()
            .map(ReadWriteMemorySegment::header)
            .ok_or(HandleError::Unbound)
    }

    fn interface_name(&self) -> Option<&str> {
        self.segment.as_ref().map(ReadWriteMemorySegment::name)
    }
}

impl<T> Default for MutableHandle<T> {
    fn default() -> Self {
        Self { segment: None }
    }
}

// ─── Strict handles ─────────────────────────────────────────────────

/// Read-only handle whose `value()` fails unless the interface was written
/// in the cycle `icon_state` reports as current.
pub struct StrictHandle<T> {
    handle: ReadOnlyHandle<T>,
    icon_state: ReadOnlyHandle<IconState>,
}

impl<T: SegmentPayload> StrictHandle<T> {
    /// Pair an interface handle with the module's `icon_state` handle.
    pub fn new(handle: ReadOnlyHandle<T>, icon_state: ReadOnlyHandle<IconState>) -> Self {
        Self { handle, icon_state }
    }

    /// Payload, if it was written this cycle.
    #[inline]
    pub fn value(&self) -> Result<&T, HandleError> {
        was_updated_this_cycle(&self.icon_state, &self.handle)?;
        self.handle.value()
    }

    /// Payload without the freshness check.
    #[inline]
    pub fn value_unchecked(&self) -> Result<&T, HandleError> {
        self.handle.value()
    }
}

impl<T: SegmentPayload> InterfaceHandle for StrictHandle<T> {
    #[inline]
    fn header(&self) -> Result<&SegmentHeader, HandleError> {
        self.handle.header()
    }

    fn interface_name(&self) -> Option<&str> {
        self.handle.interface_name()
    }
}

impl<T> Default for StrictHandle<T> {
    fn default() -> Self {
        Self {
            handle: ReadOnlyHandle::default(),
            icon_state: ReadOnlyHandle::default(),
        }
    }
}

/// Read-write handle with a checked `value()` and unchecked `value_mut()`.
pub struct MutableStrictHandle<T> {
    handle: MutableHandle<T>,
    icon_state: ReadOnlyHandle<IconState>,
}

impl<T: SegmentPayload> MutableStrictHandle<T> {
    /// Pair an interface handle with the module's `icon_state` handle.
    pub fn new(handle: MutableHandle<T>, icon_state: ReadOnlyHandle<IconState>) -> Self {
        Self { handle, icon_state }
    }

    /// Payload, if it was written this cycle.
    #[inline]
    pub fn value(&self) -> Result<&T, HandleError> {
        was_updated_this_cycle(&self.icon_state, &self.handle)?;
        self.handle.value()
    }

    /// Mutable payload, no freshness check.
    #[inline]
    pub fn value_mut(&mut self) -> Result<&mut T, HandleError> {
        self.handle.value_mut()
    }

    /// Stamp the write with `time_ns` and `cycle`.
    #[inline]
    pub fn updated_at(&self, time_ns: u64, cycle: u64) -> Result<(), HandleError> {
        self.handle.updated_at(time_ns, cycle)
    }

    /// Stamp the write with `time_ns` and the cycle `icon_state` reports.
    #[inline]
    pub fn updated_at_current_cycle(&self, time_ns: u64) -> Result<(), HandleError> {
        let cycle = self.icon_state.value()?.current_cycle;
        self.handle.updated_at(time_ns, cycle)
    }
}

impl<T: SegmentPayload> InterfaceHandle for MutableStrictHandle<T> {
    #[inline]
    fn header(&self) -> Result<&SegmentHeader, HandleError> {
        self.handle.header()
    }

    fn interface_name(&self) -> Option<&str> {
        self.handle.interface_name()
    }
}

impl<T> Default for MutableStrictHandle<T> {
    fn default() -> Self {
        Self {
            handle: MutableHandle::default(),
            icon_state: ReadOnlyHandle::default(),
        }
    }
}
