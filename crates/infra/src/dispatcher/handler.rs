use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use tileworks_media::{PresetTable, WorkerPool};

use crate::files::{FileStore, SaveOutcome};
use crate::queue::Task;

use super::{TaskError, TaskHandler};

/// Generates one variant from an original on disk and stores it in the
/// layer named after the preset. An existing variant is left alone.
#[derive(Debug, Clone)]
pub struct VariantTaskHandler {
    pool: WorkerPool,
    presets: Arc<PresetTable>,
    files: FileStore,
}

impl VariantTaskHandler {
    pub fn new(pool: WorkerPool, presets: Arc<PresetTable>, files: FileStore) -> Self {
        Self { pool, presets, files }
    }
}

#[async_trait]
impl TaskHandler for VariantTaskHandler {
    #[instrument(skip(self), fields(input = %task.input_reference, preset = %task.target_preset))]
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let name = Path::new(&task.input_reference)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TaskError::Input(format!("no file name in {:?}", task.input_reference)))?
            .to_string();

        let original = tokio::fs::read(&task.input_reference)
            .await
            .map_err(|e| TaskError::Input(format!("{}: {e}", task.input_reference)))?;

        let variant = self
            .pool
            .generate(
                Arc::clone(&self.presets),
                original.into(),
                task.target_preset.as_str(),
                task.quality,
            )
            .wait()
            .await??;

        match self.files.write_variant(&name, &variant.bytes, &variant.preset_name).await? {
            SaveOutcome::Written(path) => debug!(path = %path.display(), "variant written"),
            SaveOutcome::Skipped(path) => debug!(path = %path.display(), "variant already present"),
        }
        Ok(())
    }
}
