//! Linux-specific shared memory operations

use crate::error::ShmResult;
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::debug;

/// Create (or truncate) the segment file at `path` and map `size` bytes.
///
/// Pages are populated up front and locked when the process is allowed to;
/// a failing `mlock` is logged and otherwise ignored.
pub fn create_segment_mmap(path: &Path, size: usize) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)?;

    file.set_len(size as u64)?;

    let mmap = unsafe { MmapOptions::new().len(size).populate().map_mut(&file)? };

    if let Err(e) = mmap.lock() {
        debug!("mlock of {} failed, continuing unlocked: {e}", path.display());
    }

    Ok(mmap)
}

/// Map an existing segment file.
pub fn attach_segment_mmap(path: &Path) -> ShmResult<MmapMut> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;

    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Remove a segment file. Missing files are not an error.
pub fn unlink_segment(path: &Path) -> ShmResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}
