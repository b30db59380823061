use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use tileworks_media::{PresetTable, Variant, WorkerPool};

use super::{VariantSource, VariantSourceError};

/// Generates variants in-process. Used by the worker service itself and in
/// tests; catalog operations in production go through the HTTP client.
#[derive(Debug, Clone)]
pub struct LocalVariantSource {
    pool: WorkerPool,
    presets: Arc<PresetTable>,
    quality: u8,
}

impl LocalVariantSource {
    pub fn new(pool: WorkerPool, presets: Arc<PresetTable>, quality: u8) -> Self {
        Self {
            pool,
            presets,
            quality,
        }
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }
}

#[async_trait]
impl VariantSource for LocalVariantSource {
    #[instrument(skip(self, image), fields(bytes = image.len(), targets = ?targets))]
    async fn generate(&self, image: &[u8], targets: &[&str]) -> Result<Vec<Variant>, VariantSourceError> {
        // Reject unknown names before any work is queued.
        for target in targets {
            self.presets
                .get(target)
                .map_err(|e| VariantSourceError::Configuration(e.to_string()))?;
        }

        let image: Arc<[u8]> = image.into();
        let pending: Vec<_> = targets
            .iter()
            .map(|target| {
                self.pool
                    .generate(Arc::clone(&self.presets), Arc::clone(&image), *target, self.quality)
            })
            .collect();

        let mut variants = Vec::with_capacity(pending.len());
        for job in pending {
            let variant = job
                .wait()
                .await
                .map_err(|e| VariantSourceError::Generation(e.to_string()))?
                .map_err(|e| VariantSourceError::Generation(e.to_string()))?;
            variants.push(variant);
        }
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png;

    fn source() -> LocalVariantSource {
        LocalVariantSource::new(
            WorkerPool::new(2).unwrap(),
            Arc::new(PresetTable::standard()),
            80,
        )
    }

    #[tokio::test]
    async fn returns_one_variant_per_target_in_order() {
        let variants = source()
            .generate(&png(800, 600), &["details", "products"])
            .await
            .unwrap();
        let names: Vec<_> = variants.iter().map(|v| v.preset_name.as_str()).collect();
        assert_eq!(names, vec!["details", "products"]);
        assert!(variants.iter().all(|v| v.bytes.starts_with(&[0xFF, 0xD8])));
    }

    #[tokio::test]
    async fn unknown_target_fails_before_generation() {
        let err = source().generate(&png(10, 10), &["products", "banner"]).await.unwrap_err();
        assert!(matches!(err, VariantSourceError::Configuration(msg) if msg.contains("banner")));
    }

    #[tokio::test]
    async fn undecodable_input_is_a_generation_failure() {
        let err = source().generate(b"not an image", &["slides"]).await.unwrap_err();
        assert!(matches!(err, VariantSourceError::Generation(_)));
        assert!(!err.is_transient());
    }
}
