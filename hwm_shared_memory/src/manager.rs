//! Creates and owns the segments of one hardware module.
//!
//! Segment files live in `<root>/<namespace>.<module>.<name>`; the namespace
//! part is dropped when empty. The manager removes every file it created
//! when dropped.

use crate::error::{ShmError, ShmResult};
use crate::payload::SegmentPayload;
use crate::platform::unlink_segment;
use crate::segment::{ReadOnlyMemorySegment, ReadWriteMemorySegment, create_segment};
use crate::segment_info::SegmentInfo;
use hwm_common::consts::{MAX_SEGMENT_NAME_LEN, MAX_SEGMENTS};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Check a segment name: non-empty, shorter than the limit, no `/`.
pub fn verify_name(name: &str) -> ShmResult<()> {
    if name.is_empty() {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
            reason: "Shm segment name cannot be empty".to_string(),
        });
    }
    if name.len() >= MAX_SEGMENT_NAME_LEN {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
            reason: format!("can't exceed {} characters", MAX_SEGMENT_NAME_LEN - 1),
        });
    }
    if name.contains('/') {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
            reason: "can't have forward slashes".to_string(),
        });
    }
    Ok(())
}

/// File backing segment `name` of `module_name` in `namespace`.
pub fn segment_path(root: &Path, namespace: &str, module_name: &str, name: &str) -> PathBuf {
    if namespace.is_empty() {
        root.join(format!("{module_name}.{name}"))
    } else {
        root.join(format!("{namespace}.{module_name}.{name}"))
    }
}

#[derive(Debug)]
struct ManagedSegment {
    name: String,
    path: PathBuf,
    must_be_used: bool,
}

/// Owner of all segments of one module.
#[derive(Debug)]
pub struct SharedMemoryManager {
    root: PathBuf,
    namespace: String,
    module_name: String,
    segments: Vec<ManagedSegment>,
}

impl SharedMemoryManager {
    /// Manager for `module_name`, creating `root` if needed.
    pub fn create(
        root: impl Into<PathBuf>,
        namespace: &str,
        module_name: &str,
    ) -> ShmResult<Self> {
        verify_name(module_name)?;
        if namespace.contains('/') {
            return Err(ShmError::InvalidName {
                name: namespace.to_string(),
                reason: "can't have forward slashes".to_string(),
            });
        }
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        debug!(
            "Shared memory manager for '{module_name}' in {} (namespace '{namespace}')",
            root.display()
        );
        Ok(Self {
            root,
            namespace: namespace.to_string(),
            module_name: module_name.to_string(),
            segments: Vec::new(),
        })
    }

    /// Directory holding the segment files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared memory namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Module name.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Create segment `name` holding `value`.
    ///
    /// `must_be_used` marks interfaces the supervising controller has to
    /// reference; it is only recorded in the directory.
    pub fn add_segment<T: SegmentPayload>(
        &mut self,
        name: &str,
        must_be_used: bool,
        value: T,
    ) -> ShmResult<()> {
        if self.segments.len() >= MAX_SEGMENTS {
            return Err(ShmError::ResourceExhausted {
                name: name.to_string(),
                max: MAX_SEGMENTS,
            });
        }
        if self.contains(name) {
            return Err(ShmError::AlreadyExists {
                name: name.to_string(),
            });
        }
        verify_name(name)?;

        let path = self.segment_path(name);
        create_segment(&path, name, value)?;
        debug!("Added segment '{name}' [{}] at {}", T::TYPE_ID, path.display());
        self.segments.push(ManagedSegment {
            name: name.to_string(),
            path,
            must_be_used,
        });
        Ok(())
    }

    /// Whether segment `name` was added.
    pub fn contains(&self, name: &str) -> bool {
        self.segments.iter().any(|s| s.name == name)
    }

    /// Names of all added segments, in creation order.
    pub fn segment_names(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.name.clone()).collect()
    }

    /// File of segment `name` (whether or not it exists).
    pub fn segment_path(&self, name: &str) -> PathBuf {
        segment_path(&self.root, &self.namespace, &self.module_name, name)
    }

    /// Read-only view of an added segment.
    pub fn get<T: SegmentPayload>(&self, name: &str) -> ShmResult<ReadOnlyMemorySegment<T>> {
        let segment = self.find(name)?;
        ReadOnlyMemorySegment::attach(&segment.path, name)
    }

    /// Read-write view of an added segment.
    pub fn get_mut<T: SegmentPayload>(&self, name: &str) -> ShmResult<ReadWriteMemorySegment<T>> {
        let segment = self.find(name)?;
        ReadWriteMemorySegment::attach(&segment.path, name)
    }

    /// Directory of all added segments.
    pub fn segment_info(&self) -> ShmResult<SegmentInfo> {
        let mut info = SegmentInfo::default();
        for segment in &self.segments {
            info.push(&segment.name, segment.must_be_used)?;
        }
        Ok(info)
    }

    fn find(&self, name: &str) -> ShmResult<&ManagedSegment> {
        self.segments
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ShmError::NotFound {
                name: name.to_string(),
            })
    }
}

impl Drop for SharedMemoryManager {
    fn drop(&mut self) {
        for segment in &self.segments {
            if let Err(e) = unlink_segment(&segment.path) {
                warn!("Failed to remove segment '{}': {e}", segment.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[repr(C)]
    struct Value {
        value: u32,
    }
    unsafe impl SegmentPayload for Value {
        const TYPE_ID: &'static str = "test.Value";
    }

    fn manager(dir: &TempDir) -> SharedMemoryManager {
        SharedMemoryManager::create(dir.path(), "ns", "module").unwrap()
    }

    #[test]
    fn verify_name_rules() {
        assert!(verify_name("joint_position_state").is_ok());
        assert!(verify_name("").is_err());
        assert!(verify_name("a/b").is_err());
        assert!(verify_name(&"x".repeat(MAX_SEGMENT_NAME_LEN)).is_err());
        assert!(verify_name(&"x".repeat(MAX_SEGMENT_NAME_LEN - 1)).is_ok());
    }

    #[test]
    fn segment_path_layout() {
        let root = Path::new("/dev/shm");
        assert_eq!(
            segment_path(root, "", "arm", "icon_state"),
            PathBuf::from("/dev/shm/arm.icon_state")
        );
        assert_eq!(
            segment_path(root, "cell", "arm", "icon_state"),
            PathBuf::from("/dev/shm/cell.arm.icon_state")
        );
    }

    #[test]
    fn add_and_get() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(&dir);
        manager.add_segment("value", false, Value { value: 3 }).unwrap();

        let reader = manager.get::<Value>("value").unwrap();
        assert_eq!(reader.value().value, 3);
        assert!(manager.segment_path("value").exists());
    }

    #[test]
    fn duplicate_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(&dir);
        manager.add_segment("value", false, Value { value: 1 }).unwrap();
        assert!(matches!(
            manager.add_segment("value", false, Value { value: 2 }),
            Err(ShmError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(&dir);
        assert!(matches!(
            manager.add_segment("", false, Value { value: 1 }),
            Err(ShmError::InvalidName { .. })
        ));
        assert!(matches!(
            manager.add_segment("a/b", false, Value { value: 1 }),
            Err(ShmError::InvalidName { .. })
        ));
        assert!(SharedMemoryManager::create(dir.path(), "", "").is_err());
    }

    #[test]
    fn get_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(matches!(
            manager.get::<Value>("missing"),
            Err(ShmError::NotFound { .. })
        ));
    }

    #[test]
    fn segment_limit() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(&dir);
        for i in 0..MAX_SEGMENTS {
            manager
                .add_segment(&format!("s{i}"), false, Value { value: 0 })
                .unwrap();
        }
        assert!(matches!(
            manager.add_segment("overflow", false, Value { value: 0 }),
            Err(ShmError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn segment_info_lists_required() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(&dir);
        manager.add_segment("a", false, Value { value: 0 }).unwrap();
        manager.add_segment("b", true, Value { value: 0 }).unwrap();
        let info = manager.segment_info().unwrap();
        assert_eq!(info.names(), vec!["a", "b"]);
        assert_eq!(info.required_names(), vec!["b"]);
    }

    #[test]
    fn drop_removes_files() {
        let dir = TempDir::new().unwrap();
        let path = {
            let mut manager = manager(&dir);
            manager.add_segment("value", false, Value { value: 0 }).unwrap();
            manager.segment_path("value")
        };
        assert!(!path.exists());
    }
}
