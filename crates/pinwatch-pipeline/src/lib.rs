//! Pipeline orchestration: crawl, scrape and identify runs over the ad store.

use thiserror::Error;

mod bootstrap;
mod config;
mod crawler;
mod queries;

pub use bootstrap::{
    crawler_from_config, crawler_from_env, matcher_from_config, maybe_build_scheduler,
    store_from_config,
};
pub use config::{ConfigError, PipelineConfig};
pub use crawler::{
    is_ad_url, Crawler, CrawlerOptions, CrawlSummary, IdentifySummary, RunSummary, ScrapeSummary,
};
pub use queries::{load_query_registry, QueryConfig, QueryRegistry};

pub const CRATE_NAME: &str = "pinwatch-pipeline";

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every configured query failed; nothing was discovered and the run
    /// should be reported as broken rather than quietly empty.
    #[error("all {attempted} crawl queries failed")]
    AllQueriesFailed { attempted: usize },
    /// Too many ads failed in a single batch. Stopping early keeps a broken
    /// provider from burning through the rest of the batch's quota.
    #[error("error rate {failed}/{processed} exceeded limit {limit}")]
    ErrorBudgetExceeded {
        failed: usize,
        processed: usize,
        limit: f64,
    },
    #[error(transparent)]
    Store(#[from] pinwatch_storage::StoreError),
}
