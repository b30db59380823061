//! Shared file store.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::layers::LayerTable;
use super::session::FileSession;
use super::{FileStoreError, SaveOutcome};

/// Cloneable handle to the layered image directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    layers: Arc<LayerTable>,
}

impl FileStore {
    pub fn new(layers: LayerTable) -> Self {
        Self {
            layers: Arc::new(layers),
        }
    }

    pub fn layers(&self) -> &LayerTable {
        &self.layers
    }

    /// Start a tracked write session for one operation.
    pub fn session(&self) -> FileSession {
        FileSession::new(Arc::clone(&self.layers))
    }

    /// Write a variant outside any session. An existing file is kept.
    pub async fn write_variant(
        &self,
        name: &str,
        bytes: &[u8],
        layer: &str,
    ) -> Result<SaveOutcome, FileStoreError> {
        let path = self.layers.resolve(name, layer)?;
        if write_new(&path, bytes).await? {
            Ok(SaveOutcome::Written(path))
        } else {
            debug!(path = %path.display(), "variant already present, skipping");
            Ok(SaveOutcome::Skipped(path))
        }
    }

    /// Remove `name` from each of `layers`; returns how many files existed.
    ///
    /// Missing files are not an error. Other I/O failures are logged and the
    /// remaining layers are still processed.
    pub async fn delete_by_name(&self, name: &str, layers: &[&str]) -> Result<usize, FileStoreError> {
        let mut removed = 0;
        for layer in layers {
            let path = self.layers.resolve(name, layer)?;
            if remove_logged(&path).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of regular files directly inside `layer`.
    pub async fn count(&self, layer: &str) -> Result<usize, FileStoreError> {
        let dir = self.layers.dir(layer)?;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(FileStoreError::io(dir, e)),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileStoreError::io(dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| FileStoreError::io(entry.path(), e))?
                .is_file();
            if is_file {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove every regular file in `layer`; returns how many were removed.
    pub async fn clear_layer(&self, layer: &str) -> Result<usize, FileStoreError> {
        let dir = self.layers.dir(layer)?;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(FileStoreError::io(dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileStoreError::io(dir, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && remove_logged(&path).await {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Create `path` with `bytes` unless it already exists.
///
/// Returns `false` when the file was already there. A partially written file
/// is removed before the error is returned.
pub(crate) async fn write_new(path: &Path, bytes: &[u8]) -> Result<bool, FileStoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FileStoreError::io(parent, e))?;
    }

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(FileStoreError::io(path, e)),
    };

    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(FileStoreError::io(path, e));
    }
    Ok(true)
}

/// Remove a file, treating "not found" as nothing to do.
pub(crate) async fn remove_logged(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove file");
            false
        }
    }
}
