//! Layered image storage on the local filesystem.
//!
//! Images live under one root directory split into named *layers* (original
//! uploads, catalog cards, detail images, ...). Code addresses files by
//! `(name, layer)`; [`LayerTable`] turns that into a path.
//!
//! - [`FileStore`]: shared, stateless access (variant writes from the queue
//!   worker, deletes after a committed catalog change).
//! - [`FileSession`]: per-operation writer that remembers what it wrote so a
//!   failed operation can remove it again.

use std::path::PathBuf;

pub mod layers;
pub mod session;
pub mod store;

pub use layers::LayerTable;
pub use session::FileSession;
pub use store::FileStore;

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// The layer name is not configured. This is a deployment error, not a
    /// runtime condition.
    #[error("unknown file layer: {0}")]
    UnknownLayer(String),

    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// A strict save found an existing file.
    #[error("file already exists: {}", .0.display())]
    Collision(PathBuf),

    #[error("file I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of a lenient (variant) write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(PathBuf),
    /// The file already existed and was left untouched.
    Skipped(PathBuf),
}

impl SaveOutcome {
    pub fn path(&self) -> &std::path::Path {
        match self {
            SaveOutcome::Written(p) | SaveOutcome::Skipped(p) => p,
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, SaveOutcome::Written(_))
    }
}
