//! Unit of work: one relational transaction per catalog operation.
//!
//! A unit of work is opened by [`UnitOfWorkFactory::begin`], used for every
//! read and write of one operation, and ended with `commit` or `rollback`.
//! Dropping it without committing aborts the transaction.
//!
//! ## Error model
//!
//! | Storage condition | `RepoError` |
//! |---|---|
//! | unique violation (`23505`) | `AlreadyExists` |
//! | foreign-key violation (`23503`) | `DanglingReference` |
//! | update/delete of a missing row | `NotFound` |
//! | anything else | `Database` |

use async_trait::async_trait;
use tracing::debug;

use tileworks_core::{
    Collection, HandbookKey, NewCollection, Product, ProductAttributes, ProductFilter, ProductId,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCatalog;
pub use postgres::{PgUnitOfWork, PgUnitOfWorkFactory};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("{entity} already exists ({constraint})")]
    AlreadyExists { entity: String, constraint: String },

    #[error("{entity} references a missing row ({constraint})")]
    DanglingReference { entity: String, constraint: String },

    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("database error: {0}")]
    Database(String),
}

impl RepoError {
    pub fn already_exists(entity: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            constraint: constraint.into(),
        }
    }

    pub fn dangling(entity: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::DanglingReference {
            entity: entity.into(),
            constraint: constraint.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }
}

/// A product removed by [`UnitOfWork::delete_products`], with the image
/// paths its rows pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedProduct {
    pub id: ProductId,
    pub image_paths: Vec<String>,
}

/// Transactional access to the catalog tables.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn handbook_exists(&mut self, key: &HandbookKey) -> Result<bool, RepoError>;

    /// Insert a handbook row. A concurrent insert of the same key surfaces as
    /// `AlreadyExists` and leaves the transaction usable.
    async fn insert_handbook(&mut self, key: &HandbookKey) -> Result<(), RepoError>;

    async fn insert_product(&mut self, attributes: &ProductAttributes) -> Result<ProductId, RepoError>;

    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, RepoError>;

    /// Overwrite all attributes; `NotFound` when the row does not exist.
    async fn update_product(
        &mut self,
        id: ProductId,
        attributes: &ProductAttributes,
    ) -> Result<(), RepoError>;

    async fn insert_product_image(
        &mut self,
        product: ProductId,
        position: usize,
        image_path: &str,
    ) -> Result<(), RepoError>;

    /// Delete matching products and their image rows.
    async fn delete_products(&mut self, filter: ProductFilter) -> Result<Vec<DeletedProduct>, RepoError>;

    async fn insert_collection(
        &mut self,
        collection: &NewCollection,
        image_path: &str,
    ) -> Result<Collection, RepoError>;

    async fn delete_collection(
        &mut self,
        name: &str,
        category: &str,
    ) -> Result<Option<Collection>, RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepoError>;
}

/// Opens units of work.
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, RepoError>;
}

/// Whether [`ensure_exists`] found the row or had to create it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ensured {
    Existing,
    Created,
}

/// Get-or-create for any handbook row.
///
/// Uniqueness is enforced by storage, so losing a race against a concurrent
/// insert is recovered by re-reading instead of failing.
pub async fn ensure_exists(uow: &mut dyn UnitOfWork, key: &HandbookKey) -> Result<Ensured, RepoError> {
    if uow.handbook_exists(key).await? {
        return Ok(Ensured::Existing);
    }

    match uow.insert_handbook(key).await {
        Ok(()) => {
            debug!(table = key.kind().table(), key = ?key, "handbook row created");
            Ok(Ensured::Created)
        }
        Err(RepoError::AlreadyExists { .. }) => {
            if uow.handbook_exists(key).await? {
                debug!(table = key.kind().table(), "handbook row created concurrently, reusing");
                Ok(Ensured::Existing)
            } else {
                Err(RepoError::Database(format!(
                    "{} reported a duplicate but the row is not visible",
                    key.kind().table()
                )))
            }
        }
        Err(other) => Err(other),
    }
}

/// Ensure every handbook row `attributes` references.
pub async fn ensure_handbooks(
    uow: &mut dyn UnitOfWork,
    attributes: &ProductAttributes,
) -> Result<(), RepoError> {
    for key in attributes.handbook_keys() {
        ensure_exists(uow, &key).await?;
    }
    Ok(())
}
