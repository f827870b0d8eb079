//! Builder for creating and preallocating temp download files.

use std::fs::File;
use std::path::{Path, PathBuf};

use super::error::StorageError;
use super::writer::StorageWriter;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Builder for a new temp download file. Call `preallocate` then `build` to get
/// a `StorageWriter` that supports concurrent `write_at` from multiple threads.
pub struct StorageWriterBuilder {
    file: File,
    temp_path: PathBuf,
}

impl StorageWriterBuilder {
    /// Create a new temp file at `temp_path` (e.g. `destination.part`), creating
    /// parent directories. Truncates if the path already exists.
    pub fn create(temp_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = temp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io("create directory", parent, e))?;
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| StorageError::from_io("create", temp_path, e))?;
        Ok(StorageWriterBuilder {
            file,
            temp_path: temp_path.to_path_buf(),
        })
    }

    /// Preallocate `size` bytes. On Unix tries `posix_fallocate` so a full disk is
    /// reported up front; falls back to `set_len` when the filesystem does not support it.
    pub fn preallocate(&mut self, size: u64) -> Result<(), StorageError> {
        if size == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            if r == libc::ENOSPC {
                return Err(StorageError::DiskFull {
                    path: self.temp_path.clone(),
                });
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file
            .set_len(size)
            .map_err(|e| StorageError::from_io("preallocate", &self.temp_path, e))
    }

    /// Finish building and return a writer that can be shared for concurrent writes.
    pub fn build(self) -> StorageWriter {
        StorageWriter::from_file_and_path(self.file, self.temp_path)
    }
}
