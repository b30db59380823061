//! Rollback-capable file writes for one catalog operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::layers::LayerTable;
use super::store::{remove_logged, write_new};
use super::{FileStoreError, SaveOutcome};

/// Tracks every file written during one operation.
///
/// Exactly one of [`commit`](FileSession::commit) or
/// [`rollback`](FileSession::rollback) ends a session. A session dropped
/// without either (early return, panic, cancelled future) deletes what it
/// wrote on a best-effort basis.
///
/// A crash between a write and the end of the session can still leave
/// orphaned files behind.
#[derive(Debug)]
pub struct FileSession {
    layers: Arc<LayerTable>,
    tracked: Vec<PathBuf>,
    settled: bool,
}

impl FileSession {
    pub fn new(layers: Arc<LayerTable>) -> Self {
        Self {
            layers,
            tracked: Vec::new(),
            settled: false,
        }
    }

    /// Paths written so far, in write order.
    pub fn tracked_paths(&self) -> &[PathBuf] {
        &self.tracked
    }

    pub fn layers(&self) -> &LayerTable {
        &self.layers
    }

    /// Write a new file at `path`. An existing file is a [`FileStoreError::Collision`].
    pub async fn save(&mut self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<PathBuf, FileStoreError> {
        let path = path.as_ref().to_path_buf();
        if !write_new(&path, bytes).await? {
            return Err(FileStoreError::Collision(path));
        }
        self.tracked.push(path.clone());
        Ok(path)
    }

    /// Write `name` into `layer`. An existing file is treated as already
    /// produced: it is kept and not tracked.
    pub async fn save_by_layer(
        &mut self,
        name: &str,
        bytes: &[u8],
        layer: &str,
    ) -> Result<SaveOutcome, FileStoreError> {
        let path = self.layers.resolve(name, layer)?;
        if write_new(&path, bytes).await? {
            self.tracked.push(path.clone());
            Ok(SaveOutcome::Written(path))
        } else {
            debug!(path = %path.display(), layer, "file already present, skipping");
            Ok(SaveOutcome::Skipped(path))
        }
    }

    /// Keep every written file. Returns how many there were.
    pub fn commit(mut self) -> usize {
        self.settled = true;
        std::mem::take(&mut self.tracked).len()
    }

    /// Delete every written file, newest first. Returns how many were removed.
    pub async fn rollback(mut self) -> usize {
        self.settled = true;
        let tracked = std::mem::take(&mut self.tracked);
        let mut removed = 0;
        for path in tracked.iter().rev() {
            if remove_logged(path).await {
                removed += 1;
            }
        }
        debug!(removed, tracked = tracked.len(), "file session rolled back");
        removed
    }
}

impl Drop for FileSession {
    fn drop(&mut self) {
        if self.settled || self.tracked.is_empty() {
            return;
        }
        warn!(
            files = self.tracked.len(),
            "file session dropped without commit, removing written files"
        );
        for path in self.tracked.iter().rev() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove file");
                }
            }
        }
    }
}
