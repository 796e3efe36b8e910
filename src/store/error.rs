//! Error types for the file store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing stored pages.
///
/// Every variant is recoverable: callers log it against the affected
/// identifier and carry on with the rest of the run.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Parent directories for a stored path could not be created.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreateFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Writing (or renaming into place) a stored file failed.
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        /// File that could not be written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Reading a stored file failed.
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        /// File that could not be read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Removing a stale or partial file failed.
    #[error("failed to remove {path}: {source}")]
    RemoveFailed {
        /// File that could not be removed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Creates a directory creation error.
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreateFailed {
            path: path.into(),
            source,
        }
    }

    /// Creates a write error.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Creates a read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFailed {
            path: path.into(),
            source,
        }
    }

    /// Creates a remove error.
    pub fn remove(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::RemoveFailed {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_write_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = StoreError::write("/tmp/mirror/example.com/a.html", io_error);
        let msg = error.to_string();
        assert!(msg.contains("failed to write"), "Expected 'failed to write' in: {msg}");
        assert!(
            msg.contains("/tmp/mirror/example.com/a.html"),
            "Expected path in: {msg}"
        );
        assert!(msg.contains("access denied"), "Expected cause in: {msg}");
    }

    #[test]
    fn test_store_error_directory_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "is a file");
        let error = StoreError::directory_create("/tmp/mirror/example.com", io_error);
        let msg = error.to_string();
        assert!(msg.contains("create directory"), "Expected context in: {msg}");
        assert!(
            matches!(&error, StoreError::DirectoryCreateFailed { path, .. } if path.ends_with("example.com")),
            "Expected directory variant: {error:?}"
        );
    }
}
