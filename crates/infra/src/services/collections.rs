use tracing::{info, instrument, warn};

use tileworks_core::{Collection, HandbookKey, NewCollection};

use crate::files::FileSession;
use crate::files::layers::{COLLECTIONS, ORIGINAL_COLLECTION};
use crate::uow::{UnitOfWork, ensure_exists};

use super::{CatalogContext, ServiceError, ServiceResult, settle, write_variants};

pub const COLLECTION_VARIANTS: [&str; 1] = [COLLECTIONS];

const COLLECTION_LAYERS: [&str; 2] = [ORIGINAL_COLLECTION, COLLECTIONS];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDeletion {
    pub collection: Collection,
    pub files_removed: usize,
}

#[derive(Clone)]
pub struct CollectionService {
    ctx: CatalogContext,
}

impl CollectionService {
    pub fn new(ctx: CatalogContext) -> Self {
        Self { ctx }
    }

    /// Create a collection with its cover image, stored as `{name}-{category}`.
    #[instrument(skip(self, collection, image), fields(name = %collection.name, category = %collection.category), err)]
    pub async fn create(&self, collection: NewCollection, image: Vec<u8>) -> ServiceResult<Collection> {
        collection.validate()?;

        let mut uow = self.ctx.uow.begin().await?;
        let mut files = self.ctx.files.session();
        let outcome = self.create_in(uow.as_mut(), &mut files, &collection, &image).await;
        let created = settle(uow, files, outcome).await?;

        info!(collection_id = %created.id, "collection created");
        Ok(created)
    }

    async fn create_in(
        &self,
        uow: &mut dyn UnitOfWork,
        files: &mut FileSession,
        collection: &NewCollection,
        image: &[u8],
    ) -> ServiceResult<Collection> {
        ensure_exists(uow, &HandbookKey::category(collection.category.as_str())).await?;

        let name = collection.image_name();
        let path = files.layers().resolve(&name, ORIGINAL_COLLECTION)?;
        let created = uow
            .insert_collection(collection, &path.to_string_lossy())
            .await?;

        files.save(&path, image).await?;
        write_variants(
            "create_collection",
            self.ctx.variants.as_ref(),
            files,
            &name,
            image,
            &COLLECTION_VARIANTS,
        )
        .await?;
        Ok(created)
    }

    /// Delete a collection row, then its files.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, name: &str, category: &str) -> ServiceResult<CollectionDeletion> {
        let mut uow = self.ctx.uow.begin().await?;
        let outcome = match uow.delete_collection(name, category).await {
            Ok(Some(collection)) => Ok(collection),
            Ok(None) => Err(ServiceError::not_found("collection")),
            Err(err) => Err(err.into()),
        };
        let collection = settle(uow, self.ctx.files.session(), outcome).await?;

        let files_removed = match self
            .ctx
            .files
            .delete_by_name(&collection.image_path, &COLLECTION_LAYERS)
            .await
        {
            Ok(removed) => removed,
            Err(err) => {
                warn!(collection_id = %collection.id, error = %err, "failed to remove collection images");
                0
            }
        };

        info!(collection_id = %collection.id, files_removed, "collection deleted");
        Ok(CollectionDeletion {
            collection,
            files_removed,
        })
    }
}
