//! Storage error taxonomy.

use std::io;
use std::path::{Path, PathBuf};

/// Destination I/O failure. None of these are retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("disk full while writing {}", path.display())]
    DiskFull { path: PathBuf },
    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },
    #[error("path too long: {}", path.display())]
    NameTooLong { path: PathBuf },
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Classify an I/O error raised by `op` on `path`.
    pub fn from_io(op: &'static str, path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if source.kind() == io::ErrorKind::PermissionDenied {
            return StorageError::PermissionDenied { path };
        }
        #[cfg(unix)]
        match source.raw_os_error() {
            Some(libc::ENOSPC) | Some(libc::EDQUOT) => return StorageError::DiskFull { path },
            Some(libc::ENAMETOOLONG) => return StorageError::NameTooLong { path },
            Some(libc::EACCES) | Some(libc::EPERM) | Some(libc::EROFS) => {
                return StorageError::PermissionDenied { path }
            }
            _ => {}
        }
        StorageError::Io { op, path, source }
    }
}
