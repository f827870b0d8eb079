//! Concurrent offset writer for temp download files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

use super::error::StorageError;

/// Writer for a temp download file. Safe to clone and use from multiple threads;
/// each `write_at` is independent (pwrite-style), so workers writing disjoint
/// ranges need no lock.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    temp_path: PathBuf,
}

impl StorageWriter {
    pub(crate) fn from_file_and_path(file: File, temp_path: PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            temp_path,
        }
    }

    /// Open an existing temp file for resume (read+write, no truncation).
    pub fn open_existing(temp_path: &Path) -> Result<Self, StorageError> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(temp_path)
            .map_err(|e| StorageError::from_io("open", temp_path, e))?;
        Ok(Self::from_file_and_path(file, temp_path.to_path_buf()))
    }

    /// Write `data` at `offset`. Does not move any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        self.file
            .write_all_at(data, offset)
            .map_err(|e| StorageError::from_io("write", &self.temp_path, e))
    }

    /// Non-Unix fallback: seek + write on a cloned handle. Not safe for concurrent use.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        use std::io::{Seek, SeekFrom, Write};
        let map = |e| StorageError::from_io("write", &self.temp_path, e);
        let mut f = (*self.file).try_clone().map_err(map)?;
        f.seek(SeekFrom::Start(offset)).map_err(map)?;
        f.write_all(data).map_err(map)
    }

    /// Sync file data to disk. Called before every checkpoint and before `finalize`.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.file
            .sync_data()
            .map_err(|e| StorageError::from_io("sync", &self.temp_path, e))
    }

    /// Current on-disk length.
    pub fn file_len(&self) -> Result<u64, StorageError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| StorageError::from_io("stat", &self.temp_path, e))
    }

    /// Cut the file to `len` bytes (drops stale tail from an earlier attempt).
    pub fn truncate(&self, len: u64) -> Result<(), StorageError> {
        self.file
            .set_len(len)
            .map_err(|e| StorageError::from_io("truncate", &self.temp_path, e))
    }

    /// Path to the current temp file.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Sync, then atomically rename the temp file to the final path. Consumes the writer.
    pub fn finalize(self, final_path: &Path) -> Result<(), StorageError> {
        self.sync()?;
        let temp_path = self.temp_path.clone();
        drop(self.file);
        std::fs::rename(&temp_path, final_path)
            .map_err(|e| StorageError::from_io("rename", final_path, e))
    }
}
