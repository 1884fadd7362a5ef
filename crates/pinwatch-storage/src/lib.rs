//! Persistence contracts and backends for ads and the product catalog.

use async_trait::async_trait;
use pinwatch_core::{Ad, AdInfo, AdStage, CatalogHit, Product};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
mod pg;

pub use pg::{connect, migrate, PgAdRepository, PgProductCatalog};

pub const CRATE_NAME: &str = "pinwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("ad not found: {0}")]
    NotFound(Uuid),
    #[error("ad url already recorded: {0}")]
    DuplicateUrl(String),
    /// A stage mutation found the row in a different stage than required.
    /// Stage writes are compare-and-set so overlapping runs cannot regress
    /// an ad that already advanced.
    #[error("stage conflict for ad {id}: expected stage {expected}")]
    StageConflict { id: Uuid, expected: &'static str },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Store of ad records and their lifecycle state.
///
/// Mutations are typed per transition rather than a generic update so the
/// `new -> scraped -> {identified, ignored}` ordering is enforced at the
/// storage boundary, not by caller discipline.
#[async_trait]
pub trait AdRepository: Send + Sync {
    async fn find_by_url(&self, url: &str) -> Result<Option<Ad>, StoreError>;

    /// Inserts a stage=new ad. Fails with `DuplicateUrl` when the URL is
    /// already recorded; existing rows are never overwritten.
    async fn create(&self, url: &str) -> Result<Ad, StoreError>;

    /// Ads in the given stage, oldest-discovered first, up to `limit`.
    async fn list_by_stage(
        &self,
        stage: AdStage,
        limit: Option<i64>,
    ) -> Result<Vec<Ad>, StoreError>;

    /// Recent ads for display, optionally filtered by stage.
    async fn list(&self, stage: Option<AdStage>, limit: i64) -> Result<Vec<Ad>, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// new -> scraped: stores the fetched markdown.
    async fn record_scraped(
        &self,
        id: Uuid,
        content: &str,
        scrape_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Persists extracted listing fields on a scraped ad without advancing
    /// its stage; runs before the match outcome is known.
    async fn record_info(&self, id: Uuid, info: &AdInfo) -> Result<(), StoreError>;

    /// scraped -> identified: stores the resolved catalog product.
    async fn record_identified(&self, id: Uuid, hit: &CatalogHit) -> Result<(), StoreError>;

    /// new|scraped -> ignored: terminal, mutually exclusive with a match.
    async fn mark_ignored(&self, id: Uuid) -> Result<(), StoreError>;

    /// Counts one failed attempt; returns the new total.
    async fn bump_retries(&self, id: Uuid) -> Result<i32, StoreError>;
}

/// Read-mostly canonical product store. The pipeline only reads it; writes
/// happen through the offline catalog commands.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get(&self, opdb_id: &str) -> Result<Option<Product>, StoreError>;

    async fn upsert_all(&self, products: &[Product]) -> Result<usize, StoreError>;

    async fn list_all(&self) -> Result<Vec<Product>, StoreError>;

    /// Name/manufacturer substring search with pagination, for the catalog
    /// listing command.
    async fn search(
        &self,
        query: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Product>, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;
}
