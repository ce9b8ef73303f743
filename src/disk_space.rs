//! Cross-platform disk space checking
//!
//! A scratch pass writes a full copy of the document, so it is refused up
//! front when the scratch directory cannot hold one.

use crate::error::{ExError, Result};
use std::io;
use std::path::Path;

/// Information about disk space usage
#[derive(Debug, Clone)]
pub struct DiskSpaceInfo {
    /// Total disk space in bytes
    pub total_bytes: u64,
    /// Available disk space in bytes
    pub available_bytes: u64,
}

impl DiskSpaceInfo {
    /// Convert bytes to human-readable format (e.g., "1.5 GB")
    pub fn bytes_to_human(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * KB;
        const GB: u64 = 1024 * MB;
        const TB: u64 = 1024 * GB;

        if bytes >= TB {
            format!("{:.1} TB", bytes as f64 / TB as f64)
        } else if bytes >= GB {
            format!("{:.1} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.1} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.1} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }

    pub fn available_human(&self) -> String {
        Self::bytes_to_human(self.available_bytes)
    }
}

/// Check available disk space for a given path
///
/// # Platform support
/// - Linux/macOS: Uses `statvfs` system call
/// - Elsewhere: returns `Unsupported`
#[cfg(unix)]
pub fn get_disk_space(path: &Path) -> io::Result<DiskSpaceInfo> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // # Safety
    //
    // `libc::statvfs` is a plain C struct of integers, so a zeroed value is
    // valid. `c_path` outlives the call and the return value is checked.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };

    unsafe {
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    #[allow(clippy::unnecessary_cast)]
    let frsize = stat.f_frsize as u64;
    #[allow(clippy::unnecessary_cast)]
    Ok(DiskSpaceInfo {
        total_bytes: stat.f_blocks as u64 * frsize,
        available_bytes: stat.f_bavail as u64 * frsize,
    })
}

#[cfg(not(unix))]
pub fn get_disk_space(_path: &Path) -> io::Result<DiskSpaceInfo> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk space checking is only available on unix",
    ))
}

/// Refuse a scratch pass that would not fit into `dir`.
///
/// When free space cannot be determined the pass is allowed; a failed write
/// is still caught later and never swapped in.
pub fn check_scratch_space(dir: &Path, needed: u64) -> Result<()> {
    let space = match get_disk_space(dir) {
        Ok(space) => space,
        Err(e) => {
            tracing::debug!("Could not determine free space in {}: {}", dir.display(), e);
            return Ok(());
        }
    };

    if needed > space.available_bytes {
        return Err(ExError::Precondition(format!(
            "insufficient disk space in {}: {} needed, {} available",
            dir.display(),
            DiskSpaceInfo::bytes_to_human(needed),
            space.available_human()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_get_disk_space() {
        let space = get_disk_space(&std::env::temp_dir()).unwrap();
        assert!(space.total_bytes > 0);
        assert!(space.total_bytes >= space.available_bytes);
    }

    #[test]
    fn test_bytes_to_human() {
        assert_eq!(DiskSpaceInfo::bytes_to_human(500), "500 B");
        assert_eq!(DiskSpaceInfo::bytes_to_human(1024), "1.0 KB");
        assert_eq!(DiskSpaceInfo::bytes_to_human(1024 * 1024), "1.0 MB");
        assert_eq!(DiskSpaceInfo::bytes_to_human(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_small_scratch_fits() {
        assert!(check_scratch_space(&std::env::temp_dir(), 1).is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_impossible_scratch_refused() {
        let err = check_scratch_space(&std::env::temp_dir(), u64::MAX).unwrap_err();
        assert!(err.is_precondition());
    }
}
