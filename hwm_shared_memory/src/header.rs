//! Segment header preceding every payload.
//!
//! The header is written once by the creating process and afterwards only
//! touched through atomics. `update_counter`, `last_updated_cycle` and
//! `last_updated_time_ns` are bumped by the owning (mutable) side; readers
//! use them to detect stale or torn data instead of taking a lock.

use crate::error::{ShmError, ShmResult};
use crate::payload::SegmentPayload;
use hwm_common::consts::MAX_TYPE_ID_LEN;
use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Magic number identifying a hardware module segment ("HWMSEG01").
pub const SEGMENT_MAGIC: u64 = 0x4857_4D53_4547_3031;

/// Alignment guaranteed for the payload following the header.
pub const PAYLOAD_ALIGNMENT: usize = 64;

/// Segment header with cache-line alignment
#[repr(C, align(64))]
pub struct SegmentHeader {
    magic: u64,
    type_id: [u8; MAX_TYPE_ID_LEN],
    schema_version: u32,
    payload_size: u32,
    writer_pid: u32,
    reader_ref_count: AtomicU32,
    writer_ref_count: AtomicU32,
    _reserved: u32,
    update_counter: AtomicU64,
    last_updated_cycle: AtomicU64,
    last_updated_time_ns: AtomicU64,
}

const_assert_eq!(std::mem::size_of::<SegmentHeader>() % PAYLOAD_ALIGNMENT, 0);
const_assert_eq!(std::mem::align_of::<SegmentHeader>(), PAYLOAD_ALIGNMENT);

impl SegmentHeader {
    /// Header for a fresh segment holding `T`.
    pub fn for_payload<T: SegmentPayload>(writer_pid: u32) -> ShmResult<Self> {
        if T::TYPE_ID.len() >= MAX_TYPE_ID_LEN {
            return Err(ShmError::TypeIdTooLong {
                type_id: T::TYPE_ID.to_string(),
                max: MAX_TYPE_ID_LEN - 1,
            });
        }
        let mut type_id = [0u8; MAX_TYPE_ID_LEN];
        type_id[..T::TYPE_ID.len()].copy_from_slice(T::TYPE_ID.as_bytes());

        Ok(Self {
            magic: SEGMENT_MAGIC,
            type_id,
            schema_version: T::SCHEMA_VERSION,
            payload_size: std::mem::size_of::<T>() as u32,
            writer_pid,
            reader_ref_count: AtomicU32::new(0),
            writer_ref_count: AtomicU32::new(0),
            _reserved: 0,
            update_counter: AtomicU64::new(0),
            last_updated_cycle: AtomicU64::new(0),
            last_updated_time_ns: AtomicU64::new(0),
        })
    }

    /// Check that this header describes a segment holding `T`.
    pub fn validate<T: SegmentPayload>(&self, name: &str) -> ShmResult<()> {
        if self.magic != SEGMENT_MAGIC {
            return Err(ShmError::InvalidHeader {
                name: name.to_string(),
            });
        }
        if self.type_id() != T::TYPE_ID {
            return Err(ShmError::TypeMismatch {
                name: name.to_string(),
                expected: T::TYPE_ID.to_string(),
                actual: self.type_id().to_string(),
            });
        }
        if self.schema_version != T::SCHEMA_VERSION {
            return Err(ShmError::SchemaVersionMismatch {
                name: name.to_string(),
                expected: T::SCHEMA_VERSION,
                actual: self.schema_version,
            });
        }
        if self.payload_size as usize != std::mem::size_of::<T>() {
            return Err(ShmError::SizeMismatch {
                name: name.to_string(),
                expected: std::mem::size_of::<T>(),
                actual: self.payload_size as usize,
            });
        }
        Ok(())
    }

    /// Type id of the payload, without NUL padding.
    pub fn type_id(&self) -> &str {
        let len = self
            .type_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_TYPE_ID_LEN);
        std::str::from_utf8(&self.type_id[..len]).unwrap_or("")
    }

    /// Schema version of the payload.
    #[inline]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Payload size in bytes.
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.payload_size as usize
    }

    /// Process that created the segment.
    #[inline]
    pub fn writer_pid(&self) -> u32 {
        self.writer_pid
    }

    /// Number of updates since creation.
    #[inline]
    pub fn num_updates(&self) -> u64 {
        self.update_counter.load(Ordering::Acquire)
    }

    /// Cycle of the last update.
    #[inline]
    pub fn last_updated_cycle(&self) -> u64 {
        self.last_updated_cycle.load(Ordering::Acquire)
    }

    /// Time of the last update [ns].
    #[inline]
    pub fn last_updated_time_ns(&self) -> u64 {
        self.last_updated_time_ns.load(Ordering::Acquire)
    }

    /// Record an update. Counter is bumped last so that a reader seeing the
    /// new count also sees the matching cycle and time.
    #[inline]
    pub fn updated_at(&self, time_ns: u64, cycle: u64) {
        self.last_updated_time_ns.store(time_ns, Ordering::Relaxed);
        self.last_updated_cycle.store(cycle, Ordering::Relaxed);
        self.update_counter.fetch_add(1, Ordering::Release);
    }

    /// Number of attached readers.
    #[inline]
    pub fn reader_ref_count(&self) -> u32 {
        self.reader_ref_count.load(Ordering::Acquire)
    }

    /// Number of attached writers.
    #[inline]
    pub fn writer_ref_count(&self) -> u32 {
        self.writer_ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn add_reader(&self) {
        self.reader_ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn remove_reader(&self) {
        self.reader_ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Claim the single writer slot. Returns `false` if a writer holds it.
    pub(crate) fn try_add_writer(&self) -> bool {
        self.writer_ref_count
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn remove_writer(&self) {
        self.writer_ref_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Sample {
        value: u64,
    }
    unsafe impl SegmentPayload for Sample {
        const TYPE_ID: &'static str = "test.Sample";
        const SCHEMA_VERSION: u32 = 3;
    }

    #[repr(C)]
    struct Other {
        value: u64,
    }
    unsafe impl SegmentPayload for Other {
        const TYPE_ID: &'static str = "test.Other";
    }

    #[repr(C)]
    struct NewerSample {
        value: u64,
    }
    unsafe impl SegmentPayload for NewerSample {
        const TYPE_ID: &'static str = "test.Sample";
        const SCHEMA_VERSION: u32 = 4;
    }

    #[repr(C)]
    struct LongName;
    unsafe impl SegmentPayload for LongName {
        const TYPE_ID: &'static str =
            "test.ThisTypeIdIsFarTooLongToFitIntoTheFixedSizeHeaderFieldOfSixtyFourBytes";
    }

    #[test]
    fn header_layout() {
        assert_eq!(std::mem::size_of::<SegmentHeader>() % 64, 0);
    }

    #[test]
    fn header_records_type() {
        let header = SegmentHeader::for_payload::<Sample>(42).unwrap();
        assert_eq!(header.type_id(), "test.Sample");
        assert_eq!(header.schema_version(), 3);
        assert_eq!(header.payload_size(), 8);
        assert_eq!(header.writer_pid(), 42);
        assert_eq!(header.num_updates(), 0);
        assert!(header.validate::<Sample>("s").is_ok());
    }

    #[test]
    fn header_rejects_other_type() {
        let header = SegmentHeader::for_payload::<Sample>(1).unwrap();
        assert!(matches!(
            header.validate::<Other>("s"),
            Err(ShmError::TypeMismatch { .. })
        ));
        assert!(matches!(
            header.validate::<NewerSample>("s"),
            Err(ShmError::SchemaVersionMismatch {
                expected: 4,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn header_rejects_long_type_id() {
        assert!(matches!(
            SegmentHeader::for_payload::<LongName>(1),
            Err(ShmError::TypeIdTooLong { .. })
        ));
    }

    #[test]
    fn updated_at_bumps_counter() {
        let header = SegmentHeader::for_payload::<Sample>(1).unwrap();
        header.updated_at(1_000, 7);
        header.updated_at(2_000, 8);
        assert_eq!(header.num_updates(), 2);
        assert_eq!(header.last_updated_cycle(), 8);
        assert_eq!(header.last_updated_time_ns(), 2_000);
    }
}
