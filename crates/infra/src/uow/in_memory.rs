//! In-memory catalog (tests/dev).
//!
//! Enforces the same uniqueness and foreign-key rules as the Postgres schema.
//! A unit of work holds the catalog lock from `begin` to `commit`/`rollback`
//! and works on a private copy, so transactions are fully serialized and an
//! abandoned unit of work leaves no trace.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tileworks_core::{
    Collection, CollectionId, HandbookKey, HandbookKind, NewCollection, Product,
    ProductAttributes, ProductFilter, ProductId,
};

use super::{DeletedProduct, RepoError, UnitOfWork, UnitOfWorkFactory};

#[derive(Debug, Clone)]
struct ImageRow {
    product: ProductId,
    position: usize,
    path: String,
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    handbooks: BTreeSet<HandbookKey>,
    products: BTreeMap<ProductId, ProductAttributes>,
    images: Vec<ImageRow>,
    collections: BTreeMap<CollectionId, Collection>,
    next_product: i64,
    next_collection: i64,
}

impl CatalogState {
    fn check_references(&self, attributes: &ProductAttributes) -> Result<(), RepoError> {
        for key in attributes.handbook_keys() {
            if !self.handbooks.contains(&key) {
                return Err(RepoError::dangling(
                    "catalog",
                    format!("catalog_{}_fkey", key.kind().table()),
                ));
            }
        }
        Ok(())
    }

    fn check_unique_name(&self, name: &str, except: Option<ProductId>) -> Result<(), RepoError> {
        let taken = self
            .products
            .iter()
            .any(|(id, p)| p.name == name && Some(*id) != except);
        if taken {
            return Err(RepoError::already_exists("catalog", "catalog_name_key"));
        }
        Ok(())
    }
}

/// Shared in-memory catalog; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail with a database error.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn handbook_count(&self, kind: HandbookKind) -> usize {
        self.state
            .lock()
            .await
            .handbooks
            .iter()
            .filter(|k| k.kind() == kind)
            .count()
    }

    pub async fn product_count(&self) -> usize {
        self.state.lock().await.products.len()
    }

    pub async fn image_count(&self) -> usize {
        self.state.lock().await.images.len()
    }

    pub async fn collection_count(&self) -> usize {
        self.state.lock().await.collections.len()
    }

    /// Image paths of a product, ordered by position.
    pub async fn image_paths(&self, product: ProductId) -> Vec<String> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .images
            .iter()
            .filter(|row| row.product == product)
            .collect();
        rows.sort_by_key(|row| row.position);
        rows.into_iter().map(|row| row.path.clone()).collect()
    }

    pub async fn product(&self, id: ProductId) -> Option<Product> {
        self.state
            .lock()
            .await
            .products
            .get(&id)
            .map(|attributes| Product {
                id,
                attributes: attributes.clone(),
            })
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryCatalog {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, RepoError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            working,
            fail_commit: Arc::clone(&self.fail_next_commit),
        }))
    }
}

pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<CatalogState>,
    working: CatalogState,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn handbook_exists(&mut self, key: &HandbookKey) -> Result<bool, RepoError> {
        Ok(self.working.handbooks.contains(key))
    }

    async fn insert_handbook(&mut self, key: &HandbookKey) -> Result<(), RepoError> {
        if !self.working.handbooks.insert(key.clone()) {
            let table = key.kind().table();
            return Err(RepoError::already_exists(table, format!("{table}_pkey")));
        }
        Ok(())
    }

    async fn insert_product(&mut self, attributes: &ProductAttributes) -> Result<ProductId, RepoError> {
        self.working.check_unique_name(&attributes.name, None)?;
        self.working.check_references(attributes)?;

        self.working.next_product += 1;
        let id = ProductId::new(self.working.next_product);
        self.working.products.insert(id, attributes.clone());
        Ok(id)
    }

    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, RepoError> {
        Ok(self.working.products.get(&id).map(|attributes| Product {
            id,
            attributes: attributes.clone(),
        }))
    }

    async fn update_product(
        &mut self,
        id: ProductId,
        attributes: &ProductAttributes,
    ) -> Result<(), RepoError> {
        if !self.working.products.contains_key(&id) {
            return Err(RepoError::not_found("catalog"));
        }
        self.working.check_unique_name(&attributes.name, Some(id))?;
        self.working.check_references(attributes)?;
        self.working.products.insert(id, attributes.clone());
        Ok(())
    }

    async fn insert_product_image(
        &mut self,
        product: ProductId,
        position: usize,
        image_path: &str,
    ) -> Result<(), RepoError> {
        if !self.working.products.contains_key(&product) {
            return Err(RepoError::dangling(
                "product_images",
                "product_images_product_id_fkey",
            ));
        }
        self.working.images.push(ImageRow {
            product,
            position,
            path: image_path.to_string(),
        });
        Ok(())
    }

    async fn delete_products(&mut self, filter: ProductFilter) -> Result<Vec<DeletedProduct>, RepoError> {
        let ids: Vec<ProductId> = match filter {
            ProductFilter::All => self.working.products.keys().copied().collect(),
            ProductFilter::ById(id) => self
                .working
                .products
                .contains_key(&id)
                .then_some(id)
                .into_iter()
                .collect(),
        };

        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            self.working.products.remove(&id);
            let (removed, kept): (Vec<ImageRow>, Vec<ImageRow>) =
                std::mem::take(&mut self.working.images)
                    .into_iter()
                    .partition(|row| row.product == id);
            self.working.images = kept;
            deleted.push(DeletedProduct {
                id,
                image_paths: removed.into_iter().map(|row| row.path).collect(),
            });
        }
        Ok(deleted)
    }

    async fn insert_collection(
        &mut self,
        collection: &NewCollection,
        image_path: &str,
    ) -> Result<Collection, RepoError> {
        if !self
            .working
            .handbooks
            .contains(&HandbookKey::category(collection.category.clone()))
        {
            return Err(RepoError::dangling("collections", "collections_category_name_fkey"));
        }
        let duplicate = self
            .working
            .collections
            .values()
            .any(|c| c.name == collection.name && c.category == collection.category);
        if duplicate {
            return Err(RepoError::already_exists(
                "collections",
                "collections_name_category_name_key",
            ));
        }

        self.working.next_collection += 1;
        let row = Collection {
            id: CollectionId::new(self.working.next_collection),
            name: collection.name.clone(),
            category: collection.category.clone(),
            image_path: image_path.to_string(),
        };
        self.working.collections.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete_collection(
        &mut self,
        name: &str,
        category: &str,
    ) -> Result<Option<Collection>, RepoError> {
        let id = self
            .working
            .collections
            .values()
            .find(|c| c.name == name && c.category == category)
            .map(|c| c.id);
        Ok(id.and_then(|id| self.working.collections.remove(&id)))
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(RepoError::Database("commit failed".to_string()));
        }
        let InMemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uow::{Ensured, ensure_exists, ensure_handbooks};
    use tileworks_core::{BoxSpec, Measure, TileColor, TileSize};

    fn attributes(name: &str) -> ProductAttributes {
        ProductAttributes {
            name: name.into(),
            size: TileSize {
                length: Measure::whole(30),
                width: Measure::whole(60),
                height: Measure::whole(1),
            },
            color: TileColor {
                color_name: "grey".into(),
                feature_name: "matte".into(),
            },
            category: "wall".into(),
            surface: None,
            producer: "Cersanit".into(),
            boxing: BoxSpec {
                weight: Measure::whole(20),
                area: Measure::whole(1),
            },
            boxes_count: 10,
        }
    }

    #[tokio::test]
    async fn uncommitted_work_is_discarded() {
        let catalog = InMemoryCatalog::new();
        {
            let mut uow = catalog.begin().await.unwrap();
            ensure_handbooks(uow.as_mut(), &attributes("a")).await.unwrap();
            uow.insert_product(&attributes("a")).await.unwrap();
            uow.rollback().await.unwrap();
        }
        {
            let mut uow = catalog.begin().await.unwrap();
            ensure_handbooks(uow.as_mut(), &attributes("b")).await.unwrap();
            // dropped without commit
        }
        assert_eq!(catalog.product_count().await, 0);
        assert_eq!(catalog.handbook_count(HandbookKind::Size).await, 0);
    }

    #[tokio::test]
    async fn product_requires_existing_handbooks() {
        let catalog = InMemoryCatalog::new();
        let mut uow = catalog.begin().await.unwrap();
        let err = uow.insert_product(&attributes("a")).await.unwrap_err();
        assert!(matches!(err, RepoError::DanglingReference { .. }));
    }

    #[tokio::test]
    async fn product_names_are_unique() {
        let catalog = InMemoryCatalog::new();
        let mut uow = catalog.begin().await.unwrap();
        ensure_handbooks(uow.as_mut(), &attributes("a")).await.unwrap();
        uow.insert_product(&attributes("a")).await.unwrap();
        let err = uow.insert_product(&attributes("a")).await.unwrap_err();
        assert_eq!(err, RepoError::already_exists("catalog", "catalog_name_key"));
    }

    #[tokio::test]
    async fn ensure_exists_creates_once() {
        let catalog = InMemoryCatalog::new();
        let key = HandbookKey::category("floor");

        let mut uow = catalog.begin().await.unwrap();
        assert_eq!(ensure_exists(uow.as_mut(), &key).await.unwrap(), Ensured::Created);
        assert_eq!(ensure_exists(uow.as_mut(), &key).await.unwrap(), Ensured::Existing);
        uow.commit().await.unwrap();

        assert_eq!(catalog.handbook_count(HandbookKind::Category).await, 1);
    }

    #[tokio::test]
    async fn failed_commit_keeps_previous_state() {
        let catalog = InMemoryCatalog::new();
        catalog.fail_next_commit();

        let mut uow = catalog.begin().await.unwrap();
        ensure_exists(uow.as_mut(), &HandbookKey::category("floor"))
            .await
            .unwrap();
        assert!(uow.commit().await.is_err());
        assert_eq!(catalog.handbook_count(HandbookKind::Category).await, 0);
    }

    #[tokio::test]
    async fn delete_products_returns_image_paths() {
        let catalog = InMemoryCatalog::new();
        let mut uow = catalog.begin().await.unwrap();
        ensure_handbooks(uow.as_mut(), &attributes("a")).await.unwrap();
        let a = uow.insert_product(&attributes("a")).await.unwrap();
        let b = uow.insert_product(&attributes("b")).await.unwrap();
        uow.insert_product_image(a, 0, "/img/1-0").await.unwrap();
        uow.insert_product_image(a, 1, "/img/1-1").await.unwrap();
        uow.insert_product_image(b, 0, "/img/2-0").await.unwrap();

        let deleted = uow.delete_products(ProductFilter::ById(a)).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].image_paths, vec!["/img/1-0", "/img/1-1"]);

        let rest = uow.delete_products(ProductFilter::All).await.unwrap();
        assert_eq!(rest.iter().map(|d| d.id).collect::<Vec<_>>(), vec![b]);
        assert!(uow.delete_products(ProductFilter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn collections_are_unique_per_category() {
        let catalog = InMemoryCatalog::new();
        let mut uow = catalog.begin().await.unwrap();
        let new = NewCollection {
            name: "Onyx".into(),
            category: "floor".into(),
        };

        assert!(matches!(
            uow.insert_collection(&new, "/c").await,
            Err(RepoError::DanglingReference { .. })
        ));

        ensure_exists(uow.as_mut(), &HandbookKey::category("floor"))
            .await
            .unwrap();
        uow.insert_collection(&new, "/c").await.unwrap();
        assert!(matches!(
            uow.insert_collection(&new, "/c").await,
            Err(RepoError::AlreadyExists { .. })
        ));

        assert!(uow.delete_collection("Onyx", "floor").await.unwrap().is_some());
        assert!(uow.delete_collection("Onyx", "floor").await.unwrap().is_none());
    }
}
