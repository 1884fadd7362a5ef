//! Builds pipeline components from configuration. All credentials are
//! validated here, before any ad is touched.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pinwatch_match::{OpenAiEmbedder, OpenAiExtractor, PineconeIndex, ProductMatcher};
use pinwatch_scrapers::{scraper_for_backend, ScraperConfig, WrappedScraper};
use pinwatch_storage::{connect, migrate, PgAdRepository, PgProductCatalog};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::{load_query_registry, Crawler, CrawlerOptions, PipelineConfig};

/// Connects to Postgres, applies migrations and returns the stores.
pub async fn store_from_config(
    config: &PipelineConfig,
) -> Result<(Arc<PgAdRepository>, Arc<PgProductCatalog>)> {
    let pool = connect(&config.database_url)
        .await
        .context("connecting to database")?;
    migrate(&pool).await.context("applying migrations")?;
    Ok((
        Arc::new(PgAdRepository::new(pool.clone())),
        Arc::new(PgProductCatalog::new(pool)),
    ))
}

/// Builds the embedding + vector-search matcher from configuration.
pub fn matcher_from_config(config: &PipelineConfig) -> Result<ProductMatcher> {
    let timeout = Duration::from_secs(config.scrape_timeout_secs);
    let embedder = OpenAiEmbedder::new(
        config.openai_key()?,
        config.embedding_model.clone(),
        Some(config.embedding_dimensions),
        timeout,
    )?;
    let (pinecone_key, pinecone_host) = config.pinecone()?;
    let index = PineconeIndex::new(pinecone_key, pinecone_host, timeout)?;
    Ok(ProductMatcher::new(
        Arc::new(embedder),
        Arc::new(index),
        config.match_threshold,
    ))
}

pub async fn crawler_from_config(config: &PipelineConfig) -> Result<Crawler> {
    let (repo, catalog) = store_from_config(config).await?;

    let timeout = Duration::from_secs(config.scrape_timeout_secs);
    let scraper: Arc<dyn WrappedScraper> = Arc::from(scraper_for_backend(
        config.scraper_backend,
        ScraperConfig {
            api_key: config.scraper_api_key()?,
            timeout,
            user_agent: Some(config.user_agent.clone()),
        },
    )?);
    info!(backend = config.scraper_backend.as_str(), "scraper ready");

    let extractor = OpenAiExtractor::new(config.openai_key()?, config.openai_model.clone(), timeout)?;
    let matcher = matcher_from_config(config)?;

    let registry = load_query_registry(&config.queries_file)?;
    Ok(Crawler::new(
        repo,
        catalog,
        scraper,
        Arc::new(extractor),
        Arc::new(matcher),
        CrawlerOptions {
            queries: registry.enabled(),
            max_attempts: config.max_attempts,
            error_rate_limit: config.error_rate_limit,
        },
    ))
}

pub async fn crawler_from_env() -> Result<Crawler> {
    let config = PipelineConfig::from_env()?;
    crawler_from_config(&config).await
}

/// Starts a cron scheduler running full pipeline cycles when enabled.
pub async fn maybe_build_scheduler(
    config: &PipelineConfig,
    crawler: Arc<Crawler>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let crawler = crawler.clone();
        Box::pin(async move {
            match crawler.run_once().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    discovered = summary.crawl.discovered,
                    scraped = summary.scrape.scraped,
                    identified = summary.identify.identified,
                    "scheduled run finished"
                ),
                Err(err) => error!(error = %err, "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
