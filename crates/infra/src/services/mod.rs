//! Catalog orchestration: product, collection and slide operations.
//!
//! Every operation pairs one [`UnitOfWork`] with one [`FileSession`] and ends
//! them together through [`settle`]:
//!
//! - success: the transaction commits first; the file session is kept only
//!   once the commit succeeded, otherwise its files are removed.
//! - failure: the files are removed first, then the transaction is aborted.
//!
//! Either way no row survives without its files and no file without its row.

use std::sync::Arc;

use tracing::{debug, warn};

use tileworks_core::DomainError;

use crate::config::{ConfigError, PipelineConfig};
use crate::files::{FileSession, FileStore, FileStoreError, LayerTable};
use crate::uow::{PgUnitOfWorkFactory, RepoError, UnitOfWork, UnitOfWorkFactory};
use crate::variants::{HttpVariantClient, VariantSource, VariantSourceError, guarded};

pub mod collections;
pub mod products;
pub mod slides;

pub use collections::{CollectionDeletion, CollectionService};
pub use products::{NewProduct, ProductDeletion, ProductService};
pub use slides::SlideService;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("{entity} already exists ({constraint})")]
    AlreadyExists { entity: String, constraint: String },

    #[error("{entity} references a missing row ({constraint})")]
    DanglingReference { entity: String, constraint: String },

    /// The variant service could not be reached or answered with an error status.
    #[error("variant service failure: {0}")]
    Transient(VariantSourceError),

    #[error("image processing failed: {0}")]
    Processing(VariantSourceError),

    #[error(transparent)]
    Files(#[from] FileStoreError),

    #[error("database error: {0}")]
    Database(String),
}

impl ServiceError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::AlreadyExists { entity, constraint } => {
                Self::AlreadyExists { entity, constraint }
            }
            RepoError::DanglingReference { entity, constraint } => {
                Self::DanglingReference { entity, constraint }
            }
            RepoError::NotFound { entity } => Self::NotFound { entity },
            RepoError::Database(message) => Self::Database(message),
        }
    }
}

impl From<VariantSourceError> for ServiceError {
    fn from(err: VariantSourceError) -> Self {
        if err.is_transient() {
            Self::Transient(err)
        } else {
            Self::Processing(err)
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Shared dependencies of the catalog services.
#[derive(Clone)]
pub struct CatalogContext {
    pub uow: Arc<dyn UnitOfWorkFactory>,
    pub files: FileStore,
    pub variants: Arc<dyn VariantSource>,
}

impl CatalogContext {
    pub fn new(
        uow: Arc<dyn UnitOfWorkFactory>,
        files: FileStore,
        variants: Arc<dyn VariantSource>,
    ) -> Self {
        Self { uow, files, variants }
    }

    /// Production wiring: Postgres units of work, files under the configured
    /// image root and variants from the remote worker service.
    ///
    /// The database pool connects on first use.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let database_url = config.require_database_url()?;
        let uow = PgUnitOfWorkFactory::connect_lazy(database_url, config.database_max_connections)
            .map_err(|e| ConfigError::Invalid {
                key: "DATABASE_URL",
                reason: e.to_string(),
            })?;
        let variants = HttpVariantClient::new(&config.variant_service_url, config.variant_timeout)
            .map_err(|e| ConfigError::Invalid {
                key: "TILEWORKS_VARIANT_SERVICE_URL",
                reason: e.to_string(),
            })?;

        debug!(
            image_root = %config.image_root.display(),
            endpoint = %variants.endpoint(),
            "catalog context configured"
        );
        Ok(Self::new(
            Arc::new(uow),
            FileStore::new(LayerTable::standard(&config.image_root)),
            Arc::new(variants),
        ))
    }
}

/// End `uow` and `files` together according to `outcome`.
pub async fn settle<T>(
    uow: Box<dyn UnitOfWork>,
    files: FileSession,
    outcome: ServiceResult<T>,
) -> ServiceResult<T> {
    match outcome {
        Ok(value) => match uow.commit().await {
            Ok(()) => {
                let kept = files.commit();
                debug!(files = kept, "operation committed");
                Ok(value)
            }
            Err(err) => {
                let removed = files.rollback().await;
                warn!(error = %err, removed, "commit failed, files rolled back");
                Err(err.into())
            }
        },
        Err(err) => {
            let removed = files.rollback().await;
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "transaction rollback failed");
            }
            debug!(error = %err, removed, "operation rolled back");
            Err(err)
        }
    }
}

/// Settle a file-only operation.
pub async fn settle_files<T>(files: FileSession, outcome: ServiceResult<T>) -> ServiceResult<T> {
    match outcome {
        Ok(value) => {
            files.commit();
            Ok(value)
        }
        Err(err) => {
            let removed = files.rollback().await;
            debug!(error = %err, removed, "file operation rolled back");
            Err(err)
        }
    }
}

/// Generate `targets` for `image` and save each variant as `name` in the
/// layer named after its preset.
pub(crate) async fn write_variants(
    operation: &'static str,
    source: &dyn VariantSource,
    session: &mut FileSession,
    name: &str,
    image: &[u8],
    targets: &[&str],
) -> ServiceResult<()> {
    let variants = guarded(operation, source.generate(image, targets)).await?;
    for variant in variants {
        session
            .save_by_layer(name, &variant.bytes, &variant.preset_name)
            .await?;
    }
    Ok(())
}
