use std::path::PathBuf;

use tracing::{info, instrument, warn};

use tileworks_core::{Product, ProductAttributes, ProductFilter, ProductId, ProductUpdate};

use crate::files::FileSession;
use crate::files::layers::{DETAILS, ORIGINAL_PRODUCT, PRODUCTS};
use crate::uow::{UnitOfWork, ensure_handbooks};

use super::{CatalogContext, ServiceError, ServiceResult, settle, write_variants};

/// Variants generated for every product image.
pub const PRODUCT_VARIANTS: [&str; 2] = [PRODUCTS, DETAILS];

/// Layers a product image lives in.
pub const PRODUCT_LAYERS: [&str; 3] = [ORIGINAL_PRODUCT, PRODUCTS, DETAILS];

/// Input of [`ProductService::create`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub attributes: ProductAttributes,
    pub main_image: Vec<u8>,
    pub extra_images: Vec<Vec<u8>>,
}

impl NewProduct {
    pub fn new(attributes: ProductAttributes, main_image: Vec<u8>) -> Self {
        Self {
            attributes,
            main_image,
            extra_images: Vec::new(),
        }
    }

    pub fn with_extra_image(mut self, image: Vec<u8>) -> Self {
        self.extra_images.push(image);
        self
    }

    /// Main image first, then the extras in order.
    pub fn images(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.main_image.as_slice()).chain(self.extra_images.iter().map(Vec::as_slice))
    }
}

/// Result of [`ProductService::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDeletion {
    pub products: Vec<ProductId>,
    pub files_removed: usize,
}

#[derive(Clone)]
pub struct ProductService {
    ctx: CatalogContext,
}

impl ProductService {
    pub fn new(ctx: CatalogContext) -> Self {
        Self { ctx }
    }

    /// Create a product with its images and their variants, atomically.
    ///
    /// Image `i` is stored as `{id}-{i}`; the main image is position 0.
    #[instrument(skip(self, product), fields(name = %product.attributes.name, images = product.extra_images.len() + 1), err)]
    pub async fn create(&self, product: NewProduct) -> ServiceResult<Product> {
        product.attributes.validate()?;

        let mut uow = self.ctx.uow.begin().await?;
        let mut files = self.ctx.files.session();
        let outcome = self.create_in(uow.as_mut(), &mut files, &product).await;
        let created = settle(uow, files, outcome).await?;

        info!(product_id = %created.id, "product created");
        Ok(created)
    }

    async fn create_in(
        &self,
        uow: &mut dyn UnitOfWork,
        files: &mut FileSession,
        product: &NewProduct,
    ) -> ServiceResult<Product> {
        ensure_handbooks(uow, &product.attributes).await?;
        let id = uow.insert_product(&product.attributes).await?;

        let mut originals: Vec<(String, PathBuf)> = Vec::new();
        for position in 0..=product.extra_images.len() {
            let name = id.image_name(position);
            let path = files.layers().resolve(&name, ORIGINAL_PRODUCT)?;
            uow.insert_product_image(id, position, &path.to_string_lossy())
                .await?;
            originals.push((name, path));
        }

        for ((name, path), image) in originals.iter().zip(product.images()) {
            files.save(path, image).await?;
            write_variants(
                "create_product",
                self.ctx.variants.as_ref(),
                files,
                name,
                image,
                &PRODUCT_VARIANTS,
            )
            .await?;
        }

        Ok(Product {
            id,
            attributes: product.attributes.clone(),
        })
    }

    /// Apply `update` on top of the stored product.
    #[instrument(skip(self, update), fields(product_id = %id), err)]
    pub async fn update(&self, id: ProductId, update: ProductUpdate) -> ServiceResult<Product> {
        let mut uow = self.ctx.uow.begin().await?;
        let outcome = self.update_in(uow.as_mut(), id, &update).await;
        settle(uow, self.ctx.files.session(), outcome).await
    }

    async fn update_in(
        &self,
        uow: &mut dyn UnitOfWork,
        id: ProductId,
        update: &ProductUpdate,
    ) -> ServiceResult<Product> {
        let current = uow
            .find_product(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("product"))?;
        if update.is_empty() {
            return Ok(current);
        }

        let attributes = update.resolve_against(&current.attributes);
        attributes.validate()?;
        ensure_handbooks(uow, &attributes).await?;
        uow.update_product(id, &attributes).await?;
        Ok(Product { id, attributes })
    }

    /// Delete one product or all of them, then their image files.
    ///
    /// File removal happens after the commit; a file that cannot be removed
    /// is logged and skipped.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, filter: ProductFilter) -> ServiceResult<ProductDeletion> {
        let mut uow = self.ctx.uow.begin().await?;
        let outcome = delete_rows(uow.as_mut(), filter).await;
        let deleted = settle(uow, self.ctx.files.session(), outcome).await?;

        let mut files_removed = 0;
        for product in &deleted {
            for path in &product.image_paths {
                match self.ctx.files.delete_by_name(path, &PRODUCT_LAYERS).await {
                    Ok(removed) => files_removed += removed,
                    Err(err) => warn!(product_id = %product.id, path, error = %err, "failed to remove product image"),
                }
            }
        }

        let products: Vec<ProductId> = deleted.iter().map(|p| p.id).collect();
        info!(products = products.len(), files_removed, "products deleted");
        Ok(ProductDeletion {
            products,
            files_removed,
        })
    }
}

async fn delete_rows(
    uow: &mut dyn UnitOfWork,
    filter: ProductFilter,
) -> ServiceResult<Vec<crate::uow::DeletedProduct>> {
    let deleted = uow.delete_products(filter).await?;
    if deleted.is_empty() {
        return Err(ServiceError::not_found("product"));
    }
    Ok(deleted)
}
