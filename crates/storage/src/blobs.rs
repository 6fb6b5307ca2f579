// SPDX-License-Identifier: MIT

//! File-backed attachment blob store.
//!
//! Layout is `<root>/<solution>/<doc_id>/<name>`; moving a store between
//! sessions only renames the root. Writes stream into a `.part` sibling and
//! atomically rename on completion, so a crash never leaves a half-written
//! blob at a final path.

use crate::error::StorageError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const PARTIAL_SUFFIX: &str = ".part";

/// Handle to the blob root directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the store, creating the root and sweeping stale partials.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self { root: root.into() };
        fs::create_dir_all(&store.root)?;
        store.sweep_partials()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a relative blob path.
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Whether a finished blob exists with exactly the given length.
    pub fn verify(&self, relative: &Path, length: u64) -> bool {
        self.len(relative) == Some(length)
    }

    /// Byte length of a finished blob, if present.
    pub fn len(&self, relative: &Path) -> Option<u64> {
        fs::metadata(self.absolute(relative)).ok().filter(|m| m.is_file()).map(|m| m.len())
    }

    pub fn read(&self, relative: &Path) -> Result<Vec<u8>, StorageError> {
        let path = self.absolute(relative);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::BlobMissing { path })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Write a whole blob in one call.
    pub fn write(&self, relative: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut writer = self.writer(relative)?;
        writer.append(bytes)?;
        writer.finish()
    }

    /// Start a streaming write. The blob appears at its final path only
    /// after [`BlobWriter::finish`].
    pub fn writer(&self, relative: &Path) -> Result<BlobWriter, StorageError> {
        let final_path = self.absolute(relative);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial_path = partial_path(&final_path);
        let file = File::create(&partial_path)?;
        Ok(BlobWriter { file: Some(file), partial_path, final_path })
    }

    pub fn remove(&self, relative: &Path) -> Result<(), StorageError> {
        let path = self.absolute(relative);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove every blob belonging to one document.
    pub fn remove_document(&self, solution: &str, doc_id: &str) -> Result<(), StorageError> {
        let dir = self.root.join(solution).join(doc_id);
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete any `.part` files left behind by a crash.
    pub fn sweep_partials(&self) -> Result<(), StorageError> {
        sweep_dir(&self.root)
    }
}

fn sweep_dir(dir: &Path) -> Result<(), StorageError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            sweep_dir(&path)?;
        } else if path.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
            tracing::debug!(path = %path.display(), "removing stale partial download");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// In-progress blob write. Dropping without `finish` discards the partial.
pub struct BlobWriter {
    file: Option<File>,
    partial_path: PathBuf,
    final_path: PathBuf,
}

impl BlobWriter {
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)?;
        }
        Ok(())
    }

    /// Flush and atomically move the blob to its final path.
    pub fn finish(mut self) -> Result<(), StorageError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&self.partial_path, &self.final_path)?;
        Ok(())
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.partial_path);
        }
    }
}

#[cfg(test)]
#[path = "blobs_tests.rs"]
mod tests;
