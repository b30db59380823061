//! Postgres-backed unit of work.
//!
//! Each unit of work owns one `sqlx` transaction taken from the pool. Handbook
//! inserts run inside a savepoint so a unique violation (a concurrent insert
//! of the same key) rolls back only that statement and the transaction stays
//! usable for the re-read in [`super::ensure_exists`].
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepoError |
//! |------------|----------------------|-----------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (foreign key violation) | `23503` | `DanglingReference` |
//! | Database (other) | any other | `Database` |
//! | PoolClosed / Io / other | N/A | `Database` |
//!
//! Measures are stored as `BIGINT` hundredths (see `migrations/`).

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Acquire, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use tileworks_core::{
    BoxSpec, Collection, CollectionId, HandbookKey, HandbookValue, Measure, NewCollection,
    Product, ProductAttributes, ProductFilter, ProductId, TileColor, TileSize,
};

use super::{DeletedProduct, RepoError, UnitOfWork, UnitOfWorkFactory};

/// Schema migrations for the catalog tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Opens Postgres units of work.
#[derive(Debug, Clone)]
pub struct PgUnitOfWorkFactory {
    pool: PgPool,
}

impl PgUnitOfWorkFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Build the pool without connecting; the first `begin` opens a connection.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), RepoError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| RepoError::Database(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UnitOfWorkFactory for PgUnitOfWorkFactory {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, RepoError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// One open transaction.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

const PRODUCT_COLUMNS: &str = "id, name, size_length, size_width, size_height, color_name, \
    feature_name, category_name, surface_name, producer_name, box_weight, box_area, boxes_count";

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    #[instrument(skip(self), fields(table = key.kind().table()), err)]
    async fn handbook_exists(&mut self, key: &HandbookKey) -> Result<bool, RepoError> {
        let sql = handbook_select_sql(key);
        let mut query = sqlx::query(&sql);
        for value in key.values() {
            query = match value {
                HandbookValue::Text(text) => query.bind(text),
                HandbookValue::Measure(measure) => query.bind(measure.hundredths()),
            };
        }
        let row = query
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("handbook_exists", e))?;
        Ok(row.is_some())
    }

    #[instrument(skip(self), fields(table = key.kind().table(), operation = tracing::field::Empty), err)]
    async fn insert_handbook(&mut self, key: &HandbookKey) -> Result<(), RepoError> {
        Span::current().record("operation", "insert_handbook");

        let sql = handbook_insert_sql(key);
        let mut savepoint = (&mut self.tx)
            .begin()
            .await
            .map_err(|e| map_sqlx_error("savepoint", e))?;

        let mut query = sqlx::query(&sql);
        for value in key.values() {
            query = match value {
                HandbookValue::Text(text) => query.bind(text),
                HandbookValue::Measure(measure) => query.bind(measure.hundredths()),
            };
        }

        match query.execute(&mut *savepoint).await {
            Ok(_) => savepoint
                .commit()
                .await
                .map_err(|e| map_sqlx_error("release_savepoint", e)),
            Err(e) => {
                let err = map_sqlx_error("insert_handbook", e);
                savepoint
                    .rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback_savepoint", e))?;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, attributes), fields(name = %attributes.name), err)]
    async fn insert_product(&mut self, attributes: &ProductAttributes) -> Result<ProductId, RepoError> {
        let row = sqlx::query(
            r#"
            INSERT INTO catalog (
                name, size_length, size_width, size_height, color_name, feature_name,
                category_name, surface_name, producer_name, box_weight, box_area, boxes_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(&attributes.name)
        .bind(attributes.size.length.hundredths())
        .bind(attributes.size.width.hundredths())
        .bind(attributes.size.height.hundredths())
        .bind(&attributes.color.color_name)
        .bind(&attributes.color.feature_name)
        .bind(&attributes.category)
        .bind(&attributes.surface)
        .bind(&attributes.producer)
        .bind(attributes.boxing.weight.hundredths())
        .bind(attributes.boxing.area.hundredths())
        .bind(i64::from(attributes.boxes_count))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(ProductId::new(id))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, RepoError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM catalog WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_product", e))?;

        row.map(|row| product_from_row(&row)).transpose()
    }

    #[instrument(skip(self, attributes), fields(product_id = %id), err)]
    async fn update_product(
        &mut self,
        id: ProductId,
        attributes: &ProductAttributes,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE catalog SET
                name = $2, size_length = $3, size_width = $4, size_height = $5,
                color_name = $6, feature_name = $7, category_name = $8, surface_name = $9,
                producer_name = $10, box_weight = $11, box_area = $12, boxes_count = $13
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(&attributes.name)
        .bind(attributes.size.length.hundredths())
        .bind(attributes.size.width.hundredths())
        .bind(attributes.size.height.hundredths())
        .bind(&attributes.color.color_name)
        .bind(&attributes.color.feature_name)
        .bind(&attributes.category)
        .bind(&attributes.surface)
        .bind(&attributes.producer)
        .bind(attributes.boxing.weight.hundredths())
        .bind(attributes.boxing.area.hundredths())
        .bind(i64::from(attributes.boxes_count))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("catalog"));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %product), err)]
    async fn insert_product_image(
        &mut self,
        product: ProductId,
        position: usize,
        image_path: &str,
    ) -> Result<(), RepoError> {
        let position = i32::try_from(position)
            .map_err(|_| RepoError::Database(format!("image position {position} out of range")))?;
        sqlx::query(
            r#"
            INSERT INTO product_images (product_id, position, image_path)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(product.get())
        .bind(position)
        .bind(image_path)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product_image", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_products(&mut self, filter: ProductFilter) -> Result<Vec<DeletedProduct>, RepoError> {
        let id = match filter {
            ProductFilter::All => None,
            ProductFilter::ById(id) => Some(id.get()),
        };

        let images = sqlx::query(
            r#"
            DELETE FROM product_images
            WHERE ($1::BIGINT IS NULL OR product_id = $1)
            RETURNING product_id, image_path, position
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_product_images", e))?;

        let products = sqlx::query(
            r#"
            DELETE FROM catalog
            WHERE ($1::BIGINT IS NULL OR id = $1)
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_products", e))?;

        let mut image_rows = Vec::with_capacity(images.len());
        for row in &images {
            let product_id: i64 = row.try_get("product_id").map_err(|e| map_sqlx_error("delete_products", e))?;
            let position: i32 = row.try_get("position").map_err(|e| map_sqlx_error("delete_products", e))?;
            let path: String = row.try_get("image_path").map_err(|e| map_sqlx_error("delete_products", e))?;
            image_rows.push((product_id, position, path));
        }
        image_rows.sort_by_key(|(product_id, position, _)| (*product_id, *position));

        let mut deleted = Vec::with_capacity(products.len());
        for row in &products {
            let product_id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("delete_products", e))?;
            deleted.push(DeletedProduct {
                id: ProductId::new(product_id),
                image_paths: image_rows
                    .iter()
                    .filter(|(owner, _, _)| *owner == product_id)
                    .map(|(_, _, path)| path.clone())
                    .collect(),
            });
        }
        Ok(deleted)
    }

    #[instrument(skip(self, collection), fields(name = %collection.name, category = %collection.category), err)]
    async fn insert_collection(
        &mut self,
        collection: &NewCollection,
        image_path: &str,
    ) -> Result<Collection, RepoError> {
        let row = sqlx::query(
            r#"
            INSERT INTO collections (name, category_name, image_path)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&collection.name)
        .bind(&collection.category)
        .bind(image_path)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_collection", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert_collection", e))?;
        Ok(Collection {
            id: CollectionId::new(id),
            name: collection.name.clone(),
            category: collection.category.clone(),
            image_path: image_path.to_string(),
        })
    }

    #[instrument(skip(self), err)]
    async fn delete_collection(
        &mut self,
        name: &str,
        category: &str,
    ) -> Result<Option<Collection>, RepoError> {
        let row = sqlx::query(
            r#"
            DELETE FROM collections
            WHERE name = $1 AND category_name = $2
            RETURNING id, image_path
            "#,
        )
        .bind(name)
        .bind(category)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_collection", e))?;

        row.map(|row| {
            Ok(Collection {
                id: CollectionId::new(row.try_get("id").map_err(|e| map_sqlx_error("delete_collection", e))?),
                name: name.to_string(),
                category: category.to_string(),
                image_path: row
                    .try_get("image_path")
                    .map_err(|e| map_sqlx_error("delete_collection", e))?,
            })
        })
        .transpose()
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn handbook_select_sql(key: &HandbookKey) -> String {
    let kind = key.kind();
    let predicate = kind
        .columns()
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ${}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("SELECT 1 FROM {} WHERE {predicate}", kind.table())
}

fn handbook_insert_sql(key: &HandbookKey) -> String {
    let kind = key.kind();
    let columns = kind.columns();
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        kind.table(),
        columns.join(", ")
    )
}

fn product_from_row(row: &PgRow) -> Result<Product, RepoError> {
    fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, RepoError>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get(column).map_err(|e| map_sqlx_error("find_product", e))
    }

    fn measure(row: &PgRow, column: &str) -> Result<Measure, RepoError> {
        let hundredths: i64 = get(row, column)?;
        Measure::from_hundredths(hundredths)
            .map_err(|e| RepoError::Database(format!("corrupt catalog.{column}: {e}")))
    }

    let boxes_count: i64 = get(row, "boxes_count")?;
    Ok(Product {
        id: ProductId::new(get(row, "id")?),
        attributes: ProductAttributes {
            name: get(row, "name")?,
            size: TileSize {
                length: measure(row, "size_length")?,
                width: measure(row, "size_width")?,
                height: measure(row, "size_height")?,
            },
            color: TileColor {
                color_name: get(row, "color_name")?,
                feature_name: get(row, "feature_name")?,
            },
            category: get(row, "category_name")?,
            surface: get(row, "surface_name")?,
            producer: get(row, "producer_name")?,
            boxing: BoxSpec {
                weight: measure(row, "box_weight")?,
                area: measure(row, "box_area")?,
            },
            boxes_count: u32::try_from(boxes_count)
                .map_err(|_| RepoError::Database(format!("corrupt catalog.boxes_count: {boxes_count}")))?,
        },
    })
}

/// Map SQLx errors to `RepoError`, keeping the violated constraint name.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::Database(db_err) => {
            let table = db_err.table().unwrap_or(operation).to_string();
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            match db_err.code().as_deref() {
                Some("23505") => RepoError::AlreadyExists {
                    entity: table,
                    constraint,
                },
                Some("23503") => RepoError::DanglingReference {
                    entity: table,
                    constraint,
                },
                _ => RepoError::Database(format!(
                    "database error in {}: {}",
                    operation,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::PoolClosed => {
            RepoError::Database(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            RepoError::Database(format!("unexpected row not found in {}", operation))
        }
        _ => RepoError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}
