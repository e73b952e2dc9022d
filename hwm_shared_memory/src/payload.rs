//! Payload types that may live in a shared memory segment.

/// A fixed-layout record stored after a [`SegmentHeader`](crate::SegmentHeader).
///
/// The trait doubles as the type table of the registry: every type that can
/// be advertised implements it, and the header stores `TYPE_ID` and
/// `SCHEMA_VERSION` so readers in other processes can reject a segment
/// holding something else.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or `#[repr(transparent)]`), must not
/// contain pointers or references, must tolerate being read while another
/// process writes them, and must be valid for every bit pattern a writer of
/// the same `TYPE_ID`/`SCHEMA_VERSION` can produce. Interior mutability must
/// go through atomics.
pub unsafe trait SegmentPayload: Sized + Send + Sync + 'static {
    /// Identifies the binary schema, e.g. `hwm.JointPositionState`.
    const TYPE_ID: &'static str;

    /// Bumped whenever the layout changes.
    const SCHEMA_VERSION: u32 = 1;
}
