//! # Catalog Repository
//!
//! Services and products that invoice lines point at.
//!
//! The billing engine only reads these tables. Writes exist for seeding and
//! for the clinic's catalog management screens.
//!
//! ## Snapshot Loading
//! ```text
//! submitted lines ──► distinct (item_type, item_id) ──► one lookup each
//!                                                            │
//!                                                            ▼
//!                                                    CatalogSnapshot
//!                                  (missing ids are simply absent, the
//!                                   resolver turns that into ItemNotFound)
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{DbError, DbResult};
use vetbill_core::{CatalogProduct, CatalogService, CatalogSnapshot, LineItemRef, Money};

#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    id: String,
    name: String,
    is_active: bool,
}

impl From<ServiceRow> for CatalogService {
    fn from(row: ServiceRow) -> Self {
        CatalogService {
            id: row.id,
            name: row.name,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    name: String,
    unit_price_cents: i64,
    is_active: bool,
}

impl From<ProductRow> for CatalogProduct {
    fn from(row: ProductRow) -> Self {
        CatalogProduct {
            id: row.id,
            name: row.name,
            unit_price: Money::from_cents(row.unit_price_cents),
            is_active: row.is_active,
        }
    }
}

/// Repository for services and products.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Pool API
    // =========================================================================

    pub async fn get_service(&self, id: &str) -> DbResult<Option<CatalogService>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_service(&mut conn, id).await
    }

    pub async fn get_product(&self, id: &str) -> DbResult<Option<CatalogProduct>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_product(&mut conn, id).await
    }

    /// Inserts or replaces a service.
    pub async fn upsert_service(&self, service: &CatalogService) -> DbResult<()> {
        debug!(id = %service.id, name = %service.name, "Upserting service");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO services (id, name, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&service.id)
        .bind(&service.name)
        .bind(service.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts or replaces a product.
    pub async fn upsert_product(&self, product: &CatalogProduct) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Upserting product");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO products (id, name, unit_price_cents, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                unit_price_cents = excluded.unit_price_cents,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.unit_price.cents())
        .bind(product.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Activates or deactivates a service. Existing lines keep referencing it.
    pub async fn set_service_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE services SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(active)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Service", id));
        }
        Ok(())
    }

    /// Activates or deactivates a product. Existing lines keep referencing it.
    pub async fn set_product_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE products SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(active)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    // =========================================================================
    // Connection API (used inside engine transactions)
    // =========================================================================

    pub async fn fetch_service(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<CatalogService>> {
        let row: Option<ServiceRow> =
            sqlx::query_as("SELECT id, name, is_active FROM services WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(row.map(CatalogService::from))
    }

    pub async fn fetch_product(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<CatalogProduct>> {
        let row: Option<ProductRow> = sqlx::query_as(
            "SELECT id, name, unit_price_cents, is_active FROM products WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(CatalogProduct::from))
    }

    /// Loads every catalog record referenced by `items` into a snapshot.
    ///
    /// Inactive records are included; the resolver decides whether they
    /// may be used.
    pub async fn load_snapshot<'a>(
        conn: &mut SqliteConnection,
        items: impl IntoIterator<Item = &'a LineItemRef>,
    ) -> DbResult<CatalogSnapshot> {
        let mut snapshot = CatalogSnapshot::new();
        let mut seen: HashSet<&LineItemRef> = HashSet::new();

        for item in items {
            if !seen.insert(item) {
                continue;
            }
            match item {
                LineItemRef::Service(id) => {
                    if let Some(service) = Self::fetch_service(conn, id).await? {
                        snapshot.insert_service(service);
                    }
                }
                LineItemRef::Product(id) => {
                    if let Some(product) = Self::fetch_product(conn, id).await? {
                        snapshot.insert_product(product);
                    }
                }
            }
        }

        debug!(records = snapshot.len(), "Loaded catalog snapshot");
        Ok(snapshot)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vetbill_core::ItemCatalog;
    use crate::pool::{Database, DbConfig};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();
        catalog
            .upsert_service(&CatalogService {
                id: "svc-consult".into(),
                name: "Consultation".into(),
                is_active: true,
            })
            .await
            .unwrap();
        catalog
            .upsert_product(&CatalogProduct {
                id: "prd-tablet".into(),
                name: "Deworming tablet".into(),
                unit_price: Money::from_cents(350),
                is_active: true,
            })
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = setup().await;

        let service = db.catalog().get_service("svc-consult").await.unwrap().unwrap();
        assert_eq!(service.name, "Consultation");

        let product = db.catalog().get_product("prd-tablet").await.unwrap().unwrap();
        assert_eq!(product.unit_price, Money::from_cents(350));

        assert!(db.catalog().get_service("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deactivate_keeps_record() {
        let db = setup().await;
        db.catalog().set_product_active("prd-tablet", false).await.unwrap();

        let product = db.catalog().get_product("prd-tablet").await.unwrap().unwrap();
        assert!(!product.is_active);

        let err = db.catalog().set_service_active("nope", false).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_snapshot_skips_missing_and_duplicates() {
        let db = setup().await;
        let items = vec![
            LineItemRef::Service("svc-consult".into()),
            LineItemRef::Service("svc-consult".into()),
            LineItemRef::Product("prd-tablet".into()),
            LineItemRef::Product("prd-ghost".into()),
        ];

        let mut conn = db.pool().acquire().await.unwrap();
        let snapshot = CatalogRepository::load_snapshot(&mut conn, &items).await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.service("svc-consult").is_some());
        assert!(snapshot.product("prd-ghost").is_none());
    }
}
