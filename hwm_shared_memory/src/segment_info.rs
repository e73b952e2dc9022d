//! Directory of the segments a module advertised.
//!
//! Published once after all interfaces exist, so that other processes can
//! discover them knowing only the module name.

use crate::error::{ShmError, ShmResult};
use crate::payload::SegmentPayload;
use hwm_common::consts::{MAX_SEGMENT_NAME_LEN, MAX_SEGMENTS};

/// One directory entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SegmentName {
    value: [u8; MAX_SEGMENT_NAME_LEN],
    must_be_used: u8,
    _padding: [u8; 7],
}

impl SegmentName {
    const EMPTY: Self = Self {
        value: [0; MAX_SEGMENT_NAME_LEN],
        must_be_used: 0,
        _padding: [0; 7],
    };

    /// Segment name without NUL padding.
    pub fn name(&self) -> &str {
        let len = self
            .value
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_SEGMENT_NAME_LEN);
        std::str::from_utf8(&self.value[..len]).unwrap_or("")
    }

    /// Whether the supervising controller has to read this segment.
    pub fn must_be_used(&self) -> bool {
        self.must_be_used != 0
    }
}

/// Fixed-size list of segment names.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SegmentInfo {
    size: u32,
    _padding: u32,
    names: [SegmentName; MAX_SEGMENTS],
}

unsafe impl SegmentPayload for SegmentInfo {
    const TYPE_ID: &'static str = "hwm.SegmentInfo";
}

impl Default for SegmentInfo {
    fn default() -> Self {
        Self {
            size: 0,
            _padding: 0,
            names: [SegmentName::EMPTY; MAX_SEGMENTS],
        }
    }
}

impl SegmentInfo {
    /// Append an entry.
    pub fn push(&mut self, name: &str, must_be_used: bool) -> ShmResult<()> {
        let index = self.size as usize;
        if index >= MAX_SEGMENTS {
            return Err(ShmError::ResourceExhausted {
                name: name.to_string(),
                max: MAX_SEGMENTS,
            });
        }
        if name.len() >= MAX_SEGMENT_NAME_LEN {
            return Err(ShmError::InvalidName {
                name: name.to_string(),
                reason: format!("can't exceed {} characters", MAX_SEGMENT_NAME_LEN - 1),
            });
        }
        let entry = &mut self.names[index];
        *entry = SegmentName::EMPTY;
        entry.value[..name.len()].copy_from_slice(name.as_bytes());
        entry.must_be_used = u8::from(must_be_used);
        self.size += 1;
        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        (self.size as usize).min(MAX_SEGMENTS)
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[SegmentName] {
        &self.names[..self.len()]
    }

    /// All segment names.
    pub fn names(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.name().to_string()).collect()
    }

    /// Names of segments the controller must use.
    pub fn required_names(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|e| e.must_be_used())
            .map(|e| e.name().to_string())
            .collect()
    }
}
