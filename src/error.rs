//! Error taxonomy for the ex/vi engine
//!
//! Every failure that can leave the stream engine or the dispatcher is an
//! [`ExError`]. Callers at the widget boundary turn it into a status line with
//! [`ExError::status`]; nothing in this crate panics across that boundary.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExError>;

#[derive(Debug, Error)]
pub enum ExError {
    /// The stream engine has no document attached.
    #[error("no document is attached to the stream")]
    Detached,

    /// A precondition of the operation does not hold. Nothing was changed.
    #[error("{0}")]
    Precondition(String),

    /// A `'x` address named a marker that is not set.
    #[error("mark not set: {0}")]
    NoSuchMarker(char),

    /// Malformed regular expression in a search or substitution.
    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// I/O failure while building the scratch copy. The live document was not swapped.
    #[error("write to scratch file for '{}' failed, document left unchanged: {source}", path.display())]
    PartialWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Malformed ex command line.
    #[error("{0}")]
    Parse(String),

    /// The command exists but is not available in the current mode.
    #[error("{0}")]
    Unsupported(String),

    #[error("interrupted")]
    Cancelled,
}

impl ExError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ExError::Io {
            context: context.into(),
            source,
        }
    }

    /// One-line message suitable for a status bar.
    pub fn status(&self) -> String {
        match self {
            ExError::Io { context, source } if is_permission_denied(source) => {
                format!("{}: permission denied", context)
            }
            ExError::Io { context, source } if is_not_found(source) => {
                format!("{}: no such file", context)
            }
            other => other.to_string(),
        }
    }

    /// True when the error happened before anything was written anywhere.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ExError::Detached
                | ExError::Precondition(_)
                | ExError::NoSuchMarker(_)
                | ExError::Pattern { .. }
                | ExError::Parse(_)
                | ExError::Unsupported(_)
        )
    }
}

/// Check if an IO error is a permission denied error
pub fn is_permission_denied(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
}

/// Check if an IO error is a "not found" error
pub fn is_not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Enhanced message for a document that cannot be opened for streaming
pub fn open_error(path: &Path, err: &io::Error) -> String {
    if is_permission_denied(err) {
        format!(
            "Permission denied when opening '{}'\n\n\
             Possible fixes:\n\
             1. Check file permissions: ls -l '{}'\n\
             2. Open a copy of the file instead",
            path.display(),
            path.display()
        )
    } else if is_not_found(err) {
        format!(
            "File not found: '{}'\n\n\
             Possible fixes:\n\
             1. Check the file path is correct\n\
             2. Create the file first: touch '{}'",
            path.display(),
            path.display()
        )
    } else {
        format!("Failed to open '{}': {}", path.display(), err)
    }
}

/// Enhanced message for a failed save of the edited copy
pub fn save_error(path: &Path, err: &io::Error) -> String {
    let parent_dir = path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ".".to_string());

    if is_permission_denied(err) {
        format!(
            "Permission denied when writing '{}'\n\n\
             Possible fixes:\n\
             1. Ensure write access to the directory: chmod u+w '{}'\n\
             2. Write to another file with :w other-file",
            path.display(),
            parent_dir
        )
    } else {
        format!("Failed to write '{}': {}", path.display(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_is_permission_denied() {
        let perm_err = io::Error::new(ErrorKind::PermissionDenied, "access denied");
        assert!(is_permission_denied(&perm_err));

        let not_found_err = io::Error::new(ErrorKind::NotFound, "not found");
        assert!(!is_permission_denied(&not_found_err));
    }

    #[test]
    fn test_status_for_io_errors() {
        let err = ExError::io("open /tmp/x", io::Error::new(ErrorKind::NotFound, "nf"));
        assert_eq!(err.status(), "open /tmp/x: no such file");

        let err = ExError::io("open /tmp/x", io::Error::new(ErrorKind::PermissionDenied, "pd"));
        assert_eq!(err.status(), "open /tmp/x: permission denied");
    }

    #[test]
    fn test_marker_status() {
        assert_eq!(ExError::NoSuchMarker('a').status(), "mark not set: a");
        assert!(ExError::NoSuchMarker('a').is_precondition());
        assert!(!ExError::Cancelled.is_precondition());
    }

    #[test]
    fn test_open_error_formatting() {
        let path = Path::new("/home/user/file.txt");
        let msg = open_error(path, &io::Error::new(ErrorKind::NotFound, "nf"));
        assert!(msg.contains("File not found"));
        assert!(msg.contains("/home/user/file.txt"));
        assert!(msg.contains("Possible fixes"));
    }

    #[test]
    fn test_save_error_formatting() {
        let path = Path::new("/tmp/out/test.txt");
        let msg = save_error(path, &io::Error::new(ErrorKind::PermissionDenied, "pd"));
        assert!(msg.contains("Permission denied"));
        assert!(msg.contains("/tmp/out"));
    }
}
