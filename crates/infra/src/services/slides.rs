use std::sync::Arc;

use tracing::{info, instrument};

use crate::files::layers::{ORIGINAL_SLIDE, SLIDES};
use crate::files::{FileSession, FileStore};
use crate::variants::VariantSource;

use super::{CatalogContext, ServiceResult, settle_files, write_variants};

pub const SLIDE_VARIANTS: [&str; 1] = [SLIDES];

/// Home-page slides. Slides have no rows, only files.
#[derive(Clone)]
pub struct SlideService {
    files: FileStore,
    variants: Arc<dyn VariantSource>,
}

impl SlideService {
    pub fn new(ctx: &CatalogContext) -> Self {
        Self {
            files: ctx.files.clone(),
            variants: Arc::clone(&ctx.variants),
        }
    }

    /// Add `images` after the existing slides. Returns the new slide names.
    #[instrument(skip(self, images), fields(count = images.len()), err)]
    pub async fn add(&self, images: Vec<Vec<u8>>) -> ServiceResult<Vec<String>> {
        let first = self.files.count(ORIGINAL_SLIDE).await?;
        let mut session = self.files.session();
        let outcome = self.add_in(&mut session, first, &images).await;
        let names = settle_files(session, outcome).await?;

        info!(first, added = names.len(), "slides added");
        Ok(names)
    }

    async fn add_in(
        &self,
        session: &mut FileSession,
        first: usize,
        images: &[Vec<u8>],
    ) -> ServiceResult<Vec<String>> {
        let mut names = Vec::with_capacity(images.len());
        for (offset, image) in images.iter().enumerate() {
            let name = (first + offset).to_string();
            let path = session.layers().resolve(&name, ORIGINAL_SLIDE)?;
            session.save(&path, image).await?;
            write_variants(
                "add_slides",
                self.variants.as_ref(),
                session,
                &name,
                image,
                &SLIDE_VARIANTS,
            )
            .await?;
            names.push(name);
        }
        Ok(names)
    }

    /// Remove every slide original and variant; returns the number of files removed.
    #[instrument(skip(self), err)]
    pub async fn delete_all(&self) -> ServiceResult<usize> {
        let mut removed = 0;
        for layer in [SLIDES, ORIGINAL_SLIDE] {
            removed += self.files.clear_layer(layer).await?;
        }
        info!(removed, "slides deleted");
        Ok(removed)
    }
}
