//! Typed memory segments.
//!
//! A segment file holds a [`SegmentHeader`] followed by one payload record.
//! [`ReadOnlyMemorySegment`] and [`ReadWriteMemorySegment`] own the mapping
//! for their whole lifetime, so references into the payload can never
//! outlive it. Neither type implements `Clone`.

use crate::error::{ShmError, ShmResult};
use crate::header::{PAYLOAD_ALIGNMENT, SegmentHeader};
use crate::payload::SegmentPayload;
use crate::platform::{attach_segment_mmap, create_segment_mmap, get_current_pid};
use memmap2::MmapMut;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{Ordering, fence};

const HEADER_SIZE: usize = std::mem::size_of::<SegmentHeader>();

/// Total file size for a segment holding `T`.
pub const fn segment_size<T: SegmentPayload>() -> usize {
    HEADER_SIZE + std::mem::size_of::<T>()
}

/// Create the segment file at `path`, write header and initial value.
///
/// The mapping used for initialization is dropped again; callers attach a
/// read-only or read-write view afterwards.
pub(crate) fn create_segment<T: SegmentPayload>(
    path: &Path,
    name: &str,
    value: T,
) -> ShmResult<()> {
    if std::mem::align_of::<T>() > PAYLOAD_ALIGNMENT {
        return Err(ShmError::UnsupportedAlignment {
            type_id: T::TYPE_ID.to_string(),
            align: std::mem::align_of::<T>(),
            max: PAYLOAD_ALIGNMENT,
        });
    }
    let header = SegmentHeader::for_payload::<T>(get_current_pid())?;

    let mut mmap = create_segment_mmap(path, segment_size::<T>())?;
    let base = mmap.as_mut_ptr();
    // SAFETY: the mapping is page aligned and `segment_size::<T>()` bytes
    // long; the payload offset is a multiple of PAYLOAD_ALIGNMENT >= align_of::<T>.
    unsafe {
        std::ptr::write(base as *mut SegmentHeader, header);
        std::ptr::write(base.add(HEADER_SIZE) as *mut T, value);
    }
    fence(Ordering::Release);
    mmap.flush_async()?;
    tracing::trace!(segment = name, "segment created");
    Ok(())
}

/// Mapping shared by both segment views.
struct Mapping<T> {
    name: String,
    mmap: MmapMut,
    _marker: PhantomData<T>,
}

impl<T: SegmentPayload> Mapping<T> {
    fn attach(path: &Path, name: &str) -> ShmResult<Self> {
        let mmap = attach_segment_mmap(path).map_err(|e| match e {
            ShmError::Io { source } if source.kind() == std::io::ErrorKind::NotFound => {
                ShmError::NotFound {
                    name: name.to_string(),
                }
            }
            other => other,
        })?;
        if mmap.len() < segment_size::<T>() {
            return Err(ShmError::SizeMismatch {
                name: name.to_string(),
                expected: segment_size::<T>(),
                actual: mmap.len().saturating_sub(HEADER_SIZE),
            });
        }
        let mapping = Self {
            name: name.to_string(),
            mmap,
            _marker: PhantomData,
        };
        mapping.header().validate::<T>(name)?;
        Ok(mapping)
    }

    #[inline]
    fn header(&self) -> &SegmentHeader {
        // SAFETY: size checked in `attach`, mapping is page aligned.
        unsafe { &*(self.mmap.as_ptr() as *const SegmentHeader) }
    }

    #[inline]
    fn value(&self) -> &T {
        // SAFETY: header validated type and size in `attach`.
        unsafe { &*(self.mmap.as_ptr().add(HEADER_SIZE) as *const T) }
    }

    #[inline]
    fn value_mut(&mut self) -> &mut T {
        // SAFETY: as in `value`; `&mut self` makes this the only in-process view.
        unsafe { &mut *(self.mmap.as_mut_ptr().add(HEADER_SIZE) as *mut T) }
    }
}

/// Read-only view of a segment.
pub struct ReadOnlyMemorySegment<T> {
    mapping: Mapping<T>,
}

impl<T: SegmentPayload> ReadOnlyMemorySegment<T> {
    /// Attach to the segment file at `path`, checking that it holds `T`.
    pub fn attach(path: &Path, name: &str) -> ShmResult<Self> {
        let mapping = Mapping::attach(path, name)?;
        mapping.header().add_reader();
        Ok(Self { mapping })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.mapping.name
    }

    /// Segment header.
    #[inline]
    pub fn header(&self) -> &SegmentHeader {
        self.mapping.header()
    }

    /// Payload.
    #[inline]
    pub fn value(&self) -> &T {
        self.mapping.value()
    }
}

impl<T> Drop for ReadOnlyMemorySegment<T> {
    fn drop(&mut self) {
        // SAFETY: the mapping is still alive and was validated on attach.
        let header = unsafe { &*(self.mapping.mmap.as_ptr() as *const SegmentHeader) };
        header.remove_reader();
    }
}

/// Read-write view of a segment.
pub struct ReadWriteMemorySegment<T> {
    mapping: Mapping<T>,
}

impl<T: SegmentPayload> ReadWriteMemorySegment<T> {
    /// Attach to the segment file at `path`, checking that it holds `T`.
    ///
    /// A segment has at most one writer; attaching a second one fails with
    /// [`ShmError::WriterAttached`] until the first is dropped.
    pub fn attach(path: &Path, name: &str) -> ShmResult<Self> {
        let mapping = Mapping::attach(path, name)?;
        if !mapping.header().try_add_writer() {
            return Err(ShmError::WriterAttached {
                name: name.to_string(),
            });
        }
        Ok(Self { mapping })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.mapping.name
    }

    /// Segment header.
    #[inline]
    pub fn header(&self) -> &SegmentHeader {
        self.mapping.header()
    }

    /// Payload.
    #[inline]
    pub fn value(&self) -> &T {
        self.mapping.value()
    }

    /// Mutable payload.
    #[inline]
    pub fn value_mut(&mut self) -> &mut T {
        self.mapping.value_mut()
    }

    /// Record that the payload was written at `time_ns` during `cycle`.
    #[inline]
    pub fn updated_at(&self, time_ns: u64, cycle: u64) {
        fence(Ordering::Release);
        self.mapping.header().updated_at(time_ns, cycle);
    }
}

impl<T> Drop for ReadWriteMemorySegment<T> {
    fn drop(&mut self) {
        // SAFETY: the mapping is still alive and was validated on attach.
        let header = unsafe { &*(self.mapping.mmap.as_ptr() as *const SegmentHeader) };
        header.remove_writer();
    }
}
