//! Postgres-backed repository and catalog over `sqlx`.

use async_trait::async_trait;
use chrono::Utc;
use pinwatch_core::{Ad, AdInfo, AdStage, CatalogHit, Product};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::{AdRepository, ProductCatalog, StoreError};

pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPool::connect(database_url).await?;
    Ok(pool)
}

/// Applies the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

const AD_COLUMNS: &str = "id, url, stage, created_at, scraped_at, identified_at, ignored, \
     retries, content, scrape_id, title, description, amount, currency, city, zipcode, \
     seller, seller_url, product, manufacturer, year, opdb_id";

fn ad_from_row(row: &PgRow) -> Result<Ad, StoreError> {
    let stage_text: String = row.try_get("stage")?;
    let stage = AdStage::parse(&stage_text)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown ad stage '{stage_text}'")))?;
    Ok(Ad {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        stage,
        created_at: row.try_get("created_at")?,
        scraped_at: row.try_get("scraped_at")?,
        identified_at: row.try_get("identified_at")?,
        ignored: row.try_get("ignored")?,
        retries: row.try_get("retries")?,
        content: row.try_get("content")?,
        scrape_id: row.try_get("scrape_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        city: row.try_get("city")?,
        zipcode: row.try_get("zipcode")?,
        seller: row.try_get("seller")?,
        seller_url: row.try_get("seller_url")?,
        product: row.try_get("product")?,
        manufacturer: row.try_get("manufacturer")?,
        year: row.try_get("year")?,
        opdb_id: row.try_get("opdb_id")?,
    })
}

#[derive(Clone)]
pub struct PgAdRepository {
    pool: PgPool,
}

impl PgAdRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes "row missing" from "row in the wrong stage" after a
    /// compare-and-set update touched zero rows.
    async fn stage_conflict(&self, id: Uuid, expected: &'static str) -> StoreError {
        let exists = sqlx::query("SELECT 1 FROM ads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        match exists {
            Ok(Some(_)) => StoreError::StageConflict { id, expected },
            Ok(None) => StoreError::NotFound(id),
            Err(err) => StoreError::Database(err),
        }
    }
}

#[async_trait]
impl AdRepository for PgAdRepository {
    async fn find_by_url(&self, url: &str) -> Result<Option<Ad>, StoreError> {
        let row = sqlx::query(&format!("SELECT {AD_COLUMNS} FROM ads WHERE url = $1"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ad_from_row).transpose()
    }

    async fn create(&self, url: &str) -> Result<Ad, StoreError> {
        let ad = Ad::new(url);
        let inserted = sqlx::query(
            "INSERT INTO ads (id, url, stage, created_at, ignored, retries) \
             VALUES ($1, $2, $3, $4, FALSE, 0) \
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(ad.id)
        .bind(&ad.url)
        .bind(ad.stage.as_str())
        .bind(ad.created_at)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::DuplicateUrl(url.to_string()));
        }
        debug!(url, "recorded new ad");
        Ok(ad)
    }

    async fn list_by_stage(
        &self,
        stage: AdStage,
        limit: Option<i64>,
    ) -> Result<Vec<Ad>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {AD_COLUMNS} FROM ads WHERE stage = $1 \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        ))
        .bind(stage.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ad_from_row).collect()
    }

    async fn list(&self, stage: Option<AdStage>, limit: i64) -> Result<Vec<Ad>, StoreError> {
        let rows = match stage {
            Some(stage) => {
                sqlx::query(&format!(
                    "SELECT {AD_COLUMNS} FROM ads WHERE stage = $1 \
                     ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(stage.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {AD_COLUMNS} FROM ads ORDER BY created_at DESC LIMIT $1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(ad_from_row).collect()
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM ads")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    async fn record_scraped(
        &self,
        id: Uuid,
        content: &str,
        scrape_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE ads SET content = $2, scrape_id = $3, scraped_at = $4, stage = 'scraped' \
             WHERE id = $1 AND stage = 'new'",
        )
        .bind(id)
        .bind(content)
        .bind(scrape_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.stage_conflict(id, "new").await);
        }
        Ok(())
    }

    async fn record_info(&self, id: Uuid, info: &AdInfo) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE ads SET title = $2, description = $3, amount = $4, currency = $5, \
             city = $6, zipcode = $7, seller = $8, seller_url = $9 \
             WHERE id = $1 AND stage = 'scraped'",
        )
        .bind(id)
        .bind(&info.title)
        .bind(&info.description)
        .bind(info.amount)
        .bind(&info.currency)
        .bind(&info.city)
        .bind(&info.zipcode)
        .bind(&info.seller)
        .bind(&info.seller_url)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.stage_conflict(id, "scraped").await);
        }
        Ok(())
    }

    async fn record_identified(&self, id: Uuid, hit: &CatalogHit) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE ads SET product = $2, manufacturer = $3, year = $4, opdb_id = $5, \
             identified_at = $6, stage = 'identified' \
             WHERE id = $1 AND stage = 'scraped' AND ignored = FALSE",
        )
        .bind(id)
        .bind(&hit.name)
        .bind(&hit.manufacturer)
        .bind(hit.year)
        .bind(&hit.opdb_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.stage_conflict(id, "scraped").await);
        }
        Ok(())
    }

    async fn mark_ignored(&self, id: Uuid) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE ads SET ignored = TRUE, stage = 'ignored' \
             WHERE id = $1 AND stage IN ('new', 'scraped')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.stage_conflict(id, "new or scraped").await);
        }
        Ok(())
    }

    async fn bump_retries(&self, id: Uuid) -> Result<i32, StoreError> {
        let row = sqlx::query("UPDATE ads SET retries = retries + 1 WHERE id = $1 RETURNING retries")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        Ok(row.try_get("retries")?)
    }
}

const PRODUCT_COLUMNS: &str = "opdb_id, ipdb_id, name, shortname, manufacturer, kind, year";

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        opdb_id: row.try_get("opdb_id")?,
        ipdb_id: row.try_get("ipdb_id")?,
        name: row.try_get("name")?,
        shortname: row.try_get("shortname")?,
        manufacturer: row.try_get("manufacturer")?,
        kind: row.try_get("kind")?,
        year: row.try_get("year")?,
    })
}

#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    async fn get(&self, opdb_id: &str) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE opdb_id = $1"
        ))
        .bind(opdb_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn upsert_all(&self, products: &[Product]) -> Result<usize, StoreError> {
        let mut written = 0usize;
        for product in products {
            sqlx::query(
                "INSERT INTO products (opdb_id, ipdb_id, name, shortname, manufacturer, kind, year) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (opdb_id) DO UPDATE SET \
                 ipdb_id = EXCLUDED.ipdb_id, name = EXCLUDED.name, \
                 shortname = EXCLUDED.shortname, manufacturer = EXCLUDED.manufacturer, \
                 kind = EXCLUDED.kind, year = EXCLUDED.year",
            )
            .bind(&product.opdb_id)
            .bind(&product.ipdb_id)
            .bind(&product.name)
            .bind(&product.shortname)
            .bind(&product.manufacturer)
            .bind(&product.kind)
            .bind(product.year)
            .execute(&self.pool)
            .await?;
            written += 1;
        }
        debug!(written, "upserted catalog products");
        Ok(written)
    }

    async fn list_all(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn search(
        &self,
        query: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Product>, StoreError> {
        let rows = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => {
                let pattern = format!("%{q}%");
                sqlx::query(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products \
                     WHERE name ILIKE $1 OR shortname ILIKE $1 OR manufacturer ILIKE $1 \
                     ORDER BY name ASC OFFSET $2 LIMIT $3"
                ))
                .bind(pattern)
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name ASC OFFSET $1 LIMIT $2"
                ))
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(product_from_row).collect()
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }
}
