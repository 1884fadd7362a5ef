//! The pipeline conductor: crawl discovers ads, scrape fetches their content,
//! identify resolves them to catalog products. Each stage is independently
//! invokable and re-runnable; one bad ad never halts a batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pinwatch_core::{AdStage, CatalogHit};
use pinwatch_match::{Extractor, ProductMatcher};
use pinwatch_scrapers::WrappedScraper;
use pinwatch_storage::{AdRepository, ProductCatalog, StoreError};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{PipelineError, QueryConfig};

/// Error-rate enforcement starts after this many attempts so a single early
/// failure cannot abort a small batch.
const MIN_ERROR_SAMPLE: usize = 4;

/// A canonical ad detail URL looks like
/// `https://www.leboncoin.fr/ad/<slug>/<numeric id>`. Search pages, seller
/// profiles and navigation links all fail this shape.
pub fn is_ad_url(link: &str) -> bool {
    let Some(rest) = link.strip_prefix("https://www.leboncoin.fr/ad/") else {
        return false;
    };
    let mut segments = rest.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(slug), Some(id), None) => {
            !slug.is_empty() && !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub queries: usize,
    pub failed_queries: usize,
    pub discovered: usize,
    pub skipped: usize,
    pub credits_used: u32,
}

impl CrawlSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_queries == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeSummary {
    pub scraped: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub credits_used: u32,
}

impl ScrapeSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IdentifySummary {
    pub identified: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl IdentifySummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// One full crawl+scrape+identify cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub crawl: CrawlSummary,
    pub scrape: ScrapeSummary,
    pub identify: IdentifySummary,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.crawl.is_clean() && self.scrape.is_clean() && self.identify.is_clean()
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    pub queries: Vec<QueryConfig>,
    /// Failed attempts allowed before an ad is abandoned as a poison ad.
    pub max_attempts: i32,
    /// Hard-stop ceiling on `failed / processed` within one batch.
    pub error_rate_limit: f64,
}

pub struct Crawler {
    repo: Arc<dyn AdRepository>,
    catalog: Arc<dyn ProductCatalog>,
    scraper: Arc<dyn WrappedScraper>,
    extractor: Arc<dyn Extractor>,
    matcher: Arc<ProductMatcher>,
    options: CrawlerOptions,
}

impl Crawler {
    pub fn new(
        repo: Arc<dyn AdRepository>,
        catalog: Arc<dyn ProductCatalog>,
        scraper: Arc<dyn WrappedScraper>,
        extractor: Arc<dyn Extractor>,
        matcher: Arc<ProductMatcher>,
        options: CrawlerOptions,
    ) -> Self {
        Self {
            repo,
            catalog,
            scraper,
            extractor,
            matcher,
            options,
        }
    }

    /// Discovers new ad URLs from every enabled query. Queries are isolated:
    /// one failing query is counted and skipped, and the call errors only
    /// when every query failed. Known URLs are never re-inserted.
    pub async fn crawl(&self) -> Result<CrawlSummary, PipelineError> {
        let mut summary = CrawlSummary::default();

        for query in &self.options.queries {
            summary.queries += 1;
            let links = match self.scraper.crawl(&query.url).await {
                Ok(links) => links,
                Err(err) => {
                    warn!(query = %query.label, error = %err, "crawl query failed");
                    summary.failed_queries += 1;
                    continue;
                }
            };
            summary.credits_used += links.credits_used;

            for link in links.links.iter().filter(|link| is_ad_url(link)) {
                if self.repo.find_by_url(link).await?.is_some() {
                    summary.skipped += 1;
                    continue;
                }
                match self.repo.create(link).await {
                    Ok(_) => {
                        info!(url = %link, query = %query.label, "discovered ad");
                        summary.discovered += 1;
                    }
                    // Lost a race with another insert of the same URL.
                    Err(StoreError::DuplicateUrl(_)) => summary.skipped += 1,
                    Err(err) => return Err(err.into()),
                }
            }
        }

        if summary.queries > 0 && summary.failed_queries == summary.queries {
            return Err(PipelineError::AllQueriesFailed {
                attempted: summary.queries,
            });
        }
        info!(
            discovered = summary.discovered,
            skipped = summary.skipped,
            credits = summary.credits_used,
            "crawl finished"
        );
        Ok(summary)
    }

    /// Fetches content for stage=new ads, oldest first, up to `limit`. One
    /// attempt per ad per run; the scheduled cadence is the retry backoff.
    pub async fn scrape(&self, limit: Option<i64>) -> Result<ScrapeSummary, PipelineError> {
        let batch = self.repo.list_by_stage(AdStage::New, limit).await?;
        info!(batch = batch.len(), "scraping ads");

        let mut summary = ScrapeSummary::default();
        let mut processed = 0usize;
        for ad in &batch {
            processed += 1;
            match self.scraper.scrape(&ad.url).await {
                Ok(result) => {
                    self.repo
                        .record_scraped(ad.id, &result.markdown, result.scrape_id.as_deref())
                        .await?;
                    summary.scraped += 1;
                    summary.credits_used += result.credits_used;
                    info!(url = %ad.url, "scraped ad");
                }
                Err(err) if err.is_recoverable() => {
                    warn!(url = %ad.url, error = %err, "scrape failed, eligible for retry");
                    summary.failed += 1;
                    self.handle_failed_attempt(ad.id, &ad.url, &mut summary.abandoned)
                        .await?;
                }
                Err(err) => {
                    error!(url = %ad.url, error = %err, "scrape failed permanently");
                    self.repo.mark_ignored(ad.id).await?;
                    summary.abandoned += 1;
                }
            }
            self.check_error_budget(summary.failed, processed)?;
        }

        info!(
            scraped = summary.scraped,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "scrape finished"
        );
        Ok(summary)
    }

    /// Extracts structured fields and resolves catalog products for
    /// stage=scraped ads, oldest first, up to `limit`.
    pub async fn identify(&self, limit: Option<i64>) -> Result<IdentifySummary, PipelineError> {
        let batch = self.repo.list_by_stage(AdStage::Scraped, limit).await?;
        info!(batch = batch.len(), "identifying ads");

        let mut summary = IdentifySummary::default();
        let mut processed = 0usize;
        for ad in &batch {
            processed += 1;
            let Some(content) = ad.content.as_deref() else {
                warn!(url = %ad.url, "scraped ad has no content, skipping");
                continue;
            };

            let extracted = match self.extractor.extract(content).await {
                Ok(extracted) => extracted,
                Err(err) => {
                    warn!(url = %ad.url, error = %err, "extraction failed");
                    summary.failed += 1;
                    self.handle_failed_attempt(ad.id, &ad.url, &mut summary.ignored)
                        .await?;
                    self.check_error_budget(summary.failed, processed)?;
                    continue;
                }
            };

            // Listing fields are worth keeping even when no product matches.
            self.repo.record_info(ad.id, &extracted.info).await?;

            let Some(guess) = extracted.product else {
                info!(url = %ad.url, "no product mention in ad");
                self.repo.mark_ignored(ad.id).await?;
                summary.ignored += 1;
                continue;
            };

            match self.matcher.resolve(&guess).await {
                Ok(Some(hit)) => {
                    let hit = self.confirm_against_catalog(hit).await?;
                    info!(
                        url = %ad.url,
                        opdb_id = %hit.opdb_id,
                        score = hit.score,
                        "ad identified"
                    );
                    self.repo.record_identified(ad.id, &hit).await?;
                    summary.identified += 1;
                }
                Ok(None) => {
                    info!(url = %ad.url, guess = %guess.name, "no catalog match");
                    self.repo.mark_ignored(ad.id).await?;
                    summary.ignored += 1;
                }
                Err(err) => {
                    warn!(url = %ad.url, error = %err, "match lookup failed");
                    summary.failed += 1;
                    self.handle_failed_attempt(ad.id, &ad.url, &mut summary.ignored)
                        .await?;
                }
            }
            self.check_error_budget(summary.failed, processed)?;
        }

        info!(
            identified = summary.identified,
            ignored = summary.ignored,
            failed = summary.failed,
            "identify finished"
        );
        Ok(summary)
    }

    /// Runs the three stages back to back, as one cron tick does.
    pub async fn run_once(&self) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "pipeline run starting");

        let crawl = self.crawl().await?;
        let scrape = self.scrape(None).await?;
        let identify = self.identify(None).await?;

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            crawl,
            scrape,
            identify,
        })
    }

    /// The catalog row is authoritative for product fields; index metadata
    /// is the fallback when the catalog misses the id (stale index).
    async fn confirm_against_catalog(&self, hit: CatalogHit) -> Result<CatalogHit, PipelineError> {
        match self.catalog.get(&hit.opdb_id).await? {
            Some(product) => Ok(CatalogHit {
                opdb_id: product.opdb_id,
                name: product.name,
                manufacturer: product.manufacturer,
                year: product.year,
                score: hit.score,
            }),
            None => {
                warn!(opdb_id = %hit.opdb_id, "indexed id missing from catalog");
                Ok(hit)
            }
        }
    }

    /// Bumps the retry counter and abandons the ad once it hits the
    /// max-attempt cutoff, so a poison ad cannot be retried forever.
    async fn handle_failed_attempt(
        &self,
        id: Uuid,
        url: &str,
        abandoned: &mut usize,
    ) -> Result<(), PipelineError> {
        let retries = self.repo.bump_retries(id).await?;
        if retries >= self.options.max_attempts {
            warn!(url, retries, "giving up on ad after repeated failures");
            self.repo.mark_ignored(id).await?;
            *abandoned += 1;
        }
        Ok(())
    }

    fn check_error_budget(&self, failed: usize, processed: usize) -> Result<(), PipelineError> {
        if processed >= MIN_ERROR_SAMPLE
            && (failed as f64 / processed as f64) > self.options.error_rate_limit
        {
            return Err(PipelineError::ErrorBudgetExceeded {
                failed,
                processed,
                limit: self.options.error_rate_limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};

    use async_trait::async_trait;
    use pinwatch_core::{AdInfo, ExtractedAd, Product, ProductGuess};
    use pinwatch_match::{Embedder, ExtractError, MatchError, MemoryVectorIndex};
    use pinwatch_scrapers::{LinksResult, ScrapeError, ScrapeResult};
    use pinwatch_storage::memory::{MemoryAdRepository, MemoryProductCatalog};
    use tokio::sync::Mutex;

    fn ad_url(n: u64) -> String {
        format!("https://www.leboncoin.fr/ad/flipper/{n}")
    }

    /// Scripted scraper: crawl pops one result per call, scrape fails for
    /// listed URLs.
    #[derive(Default)]
    struct FakeScraper {
        crawl_batches: Mutex<VecDeque<Result<Vec<String>, ()>>>,
        retry_urls: HashSet<String>,
        dead_urls: HashSet<String>,
    }

    impl FakeScraper {
        fn with_crawls(batches: Vec<Result<Vec<String>, ()>>) -> Self {
            Self {
                crawl_batches: Mutex::new(batches.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl WrappedScraper for FakeScraper {
        fn provider(&self) -> &'static str {
            "fake"
        }

        async fn crawl(&self, _search_url: &str) -> Result<LinksResult, ScrapeError> {
            match self.crawl_batches.lock().await.pop_front() {
                Some(Ok(links)) => Ok(LinksResult {
                    links,
                    status_code: 200,
                    credits_used: 1,
                }),
                Some(Err(())) | None => Err(ScrapeError::retry_now("search page blocked")),
            }
        }

        async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeError> {
            if self.retry_urls.contains(url) {
                return Err(ScrapeError::retry_now("fetch blocked"));
            }
            if self.dead_urls.contains(url) {
                return Err(ScrapeError::unrecoverable("listing gone"));
            }
            Ok(ScrapeResult {
                markdown: format!("# listing\n\ncontent for {url}"),
                status_code: 200,
                credits_used: 1,
                scrape_id: None,
            })
        }
    }

    /// Maps content substrings to extraction results.
    #[derive(Default)]
    struct FakeExtractor {
        by_needle: HashMap<&'static str, ExtractedAd>,
        fail_needle: Option<&'static str>,
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(&self, content: &str) -> Result<ExtractedAd, ExtractError> {
            if let Some(needle) = self.fail_needle {
                if content.contains(needle) {
                    return Err(ExtractError::Provider("model unavailable".into()));
                }
            }
            for (needle, extracted) in &self.by_needle {
                if content.contains(needle) {
                    return Ok(extracted.clone());
                }
            }
            Ok(ExtractedAd {
                info: AdInfo {
                    title: Some("untitled listing".into()),
                    ..AdInfo::default()
                },
                product: None,
            })
        }
    }

    /// Deterministic toy embedding: one axis per known phrase.
    struct KeyedEmbedder;

    #[async_trait]
    impl Embedder for KeyedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, MatchError> {
            if text.contains("Godzilla") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.5, 0.5])
            }
        }
    }

    fn extracted_with(name: &str, manufacturer: Option<&str>, amount: i64) -> ExtractedAd {
        ExtractedAd {
            info: AdInfo {
                title: Some(format!("{name} for sale")),
                description: Some("great condition".into()),
                amount: Some(amount),
                currency: Some("EUR".into()),
                seller: Some("Arcade Dreams".into()),
                ..AdInfo::default()
            },
            product: Some(ProductGuess {
                name: name.to_string(),
                manufacturer: manufacturer.map(str::to_string),
                year: None,
            }),
        }
    }

    struct Fixture {
        repo: Arc<MemoryAdRepository>,
        catalog: Arc<MemoryProductCatalog>,
    }

    async fn crawler_with(
        scraper: FakeScraper,
        extractor: FakeExtractor,
        options: CrawlerOptions,
    ) -> (Crawler, Fixture) {
        let repo = Arc::new(MemoryAdRepository::new());
        let catalog = Arc::new(MemoryProductCatalog::new());
        catalog
            .upsert_all(&[Product {
                opdb_id: "ABC123".into(),
                ipdb_id: None,
                name: "Godzilla".into(),
                shortname: None,
                manufacturer: Some("Stern".into()),
                kind: Some("ss".into()),
                year: Some(2021),
            }])
            .await
            .unwrap();

        let index = Arc::new(MemoryVectorIndex::new());
        let matcher = Arc::new(ProductMatcher::new(Arc::new(KeyedEmbedder), index, 0.8));
        matcher
            .index_catalog(&catalog.list_all().await.unwrap())
            .await
            .unwrap();

        let crawler = Crawler::new(
            repo.clone(),
            catalog.clone(),
            Arc::new(scraper),
            Arc::new(extractor),
            matcher,
            options,
        );
        (crawler, Fixture { repo, catalog })
    }

    fn options(queries: usize) -> CrawlerOptions {
        CrawlerOptions {
            queries: (0..queries)
                .map(|i| QueryConfig {
                    label: format!("query-{i}"),
                    url: format!("https://www.leboncoin.fr/recherche?text=flipper&page={i}"),
                    enabled: true,
                })
                .collect(),
            max_attempts: 9,
            error_rate_limit: 0.5,
        }
    }

    #[tokio::test]
    async fn crawl_twice_never_duplicates_ads() {
        let links = vec![ad_url(1), ad_url(2)];
        let scraper = FakeScraper::with_crawls(vec![
            Ok(links.clone()),
            Ok(links.clone()),
        ]);
        let (crawler, fx) = crawler_with(scraper, FakeExtractor::default(), options(1)).await;

        let first = crawler.crawl().await.unwrap();
        assert_eq!(first.discovered, 2);
        assert_eq!(first.skipped, 0);

        let second = crawler.crawl().await.unwrap();
        assert_eq!(second.discovered, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(fx.repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn crawl_keeps_only_canonical_ad_urls() {
        let scraper = FakeScraper::with_crawls(vec![Ok(vec![
            ad_url(1),
            "https://www.leboncoin.fr/recherche?text=flipper".into(),
            "https://www.leboncoin.fr/ad/flipper/not-a-number".into(),
            "https://www.leboncoin.fr/boutique/arcade-dreams".into(),
        ])]);
        let (crawler, fx) = crawler_with(scraper, FakeExtractor::default(), options(1)).await;

        let summary = crawler.crawl().await.unwrap();
        assert_eq!(summary.discovered, 1);
        assert_eq!(fx.repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn one_failing_query_does_not_abort_the_rest() {
        let scraper = FakeScraper::with_crawls(vec![Err(()), Ok(vec![ad_url(1)])]);
        let (crawler, fx) = crawler_with(scraper, FakeExtractor::default(), options(2)).await;

        let summary = crawler.crawl().await.unwrap();
        assert_eq!(summary.failed_queries, 1);
        assert_eq!(summary.discovered, 1);
        assert_eq!(fx.repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn crawl_errors_only_when_every_query_fails() {
        let scraper = FakeScraper::with_crawls(vec![Err(()), Err(())]);
        let (crawler, _fx) = crawler_with(scraper, FakeExtractor::default(), options(2)).await;

        let err = crawler.crawl().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AllQueriesFailed { attempted: 2 }
        ));
    }

    #[tokio::test]
    async fn scrape_limit_is_respected() {
        let (crawler, fx) =
            crawler_with(FakeScraper::default(), FakeExtractor::default(), options(0)).await;
        for n in 0..5 {
            fx.repo.create(&ad_url(n)).await.unwrap();
        }

        let summary = crawler.scrape(Some(2)).await.unwrap();
        assert_eq!(summary.scraped, 2);

        let still_new = fx.repo.list_by_stage(AdStage::New, None).await.unwrap();
        assert_eq!(still_new.len(), 3);
        let scraped = fx.repo.list_by_stage(AdStage::Scraped, None).await.unwrap();
        assert_eq!(scraped.len(), 2);
    }

    #[tokio::test]
    async fn one_failing_ad_does_not_block_the_batch() {
        let scraper = FakeScraper {
            retry_urls: HashSet::from([ad_url(2)]),
            ..FakeScraper::default()
        };
        let (crawler, fx) = crawler_with(scraper, FakeExtractor::default(), options(0)).await;
        for n in 0..5 {
            fx.repo.create(&ad_url(n)).await.unwrap();
        }

        let summary = crawler.scrape(None).await.unwrap();
        assert_eq!(summary.scraped, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.abandoned, 0);

        let failing = fx.repo.find_by_url(&ad_url(2)).await.unwrap().unwrap();
        assert_eq!(failing.stage, AdStage::New);
        assert!(failing.content.is_none());
        assert_eq!(failing.retries, 1);
    }

    #[tokio::test]
    async fn unrecoverable_scrape_abandons_the_ad() {
        let scraper = FakeScraper {
            dead_urls: HashSet::from([ad_url(1)]),
            ..FakeScraper::default()
        };
        let (crawler, fx) = crawler_with(scraper, FakeExtractor::default(), options(0)).await;
        fx.repo.create(&ad_url(1)).await.unwrap();

        let summary = crawler.scrape(None).await.unwrap();
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.scraped, 0);

        let ad = fx.repo.find_by_url(&ad_url(1)).await.unwrap().unwrap();
        assert!(ad.ignored);
        assert_eq!(ad.stage, AdStage::Ignored);
    }

    #[tokio::test]
    async fn poison_ads_are_abandoned_after_max_attempts() {
        let scraper = FakeScraper {
            retry_urls: HashSet::from([ad_url(1)]),
            ..FakeScraper::default()
        };
        let mut opts = options(0);
        opts.max_attempts = 2;
        let (crawler, fx) = crawler_with(scraper, FakeExtractor::default(), opts).await;
        fx.repo.create(&ad_url(1)).await.unwrap();

        let first = crawler.scrape(None).await.unwrap();
        assert_eq!(first.abandoned, 0);
        let second = crawler.scrape(None).await.unwrap();
        assert_eq!(second.abandoned, 1);

        let ad = fx.repo.find_by_url(&ad_url(1)).await.unwrap().unwrap();
        assert!(ad.ignored);
        assert_eq!(ad.retries, 2);
    }

    #[tokio::test]
    async fn broken_provider_trips_the_error_budget() {
        let scraper = FakeScraper {
            retry_urls: (0..6).map(ad_url).collect(),
            ..FakeScraper::default()
        };
        let (crawler, fx) = crawler_with(scraper, FakeExtractor::default(), options(0)).await;
        for n in 0..6 {
            fx.repo.create(&ad_url(n)).await.unwrap();
        }

        let err = crawler.scrape(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::ErrorBudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn identify_resolves_known_product_from_catalog() {
        let extractor = FakeExtractor {
            by_needle: HashMap::from([(
                "godzilla",
                extracted_with("Godzilla", Some("Stern"), 8500),
            )]),
            fail_needle: None,
        };
        let (crawler, fx) = crawler_with(FakeScraper::default(), extractor, options(0)).await;
        let ad = fx
            .repo
            .create("https://www.leboncoin.fr/ad/flipper-godzilla/2811111111")
            .await
            .unwrap();
        fx.repo
            .record_scraped(ad.id, "Stern godzilla pinball machine, great condition", None)
            .await
            .unwrap();

        let summary = crawler.identify(None).await.unwrap();
        assert_eq!(summary.identified, 1);
        assert_eq!(summary.ignored, 0);

        let stored = fx.repo.find_by_url(&ad.url).await.unwrap().unwrap();
        assert_eq!(stored.stage, AdStage::Identified);
        assert_eq!(stored.opdb_id.as_deref(), Some("ABC123"));
        assert_eq!(stored.manufacturer.as_deref(), Some("Stern"));
        // Product fields come from the catalog row, not from the guess.
        let catalog_row = fx.catalog.get("ABC123").await.unwrap().unwrap();
        assert_eq!(stored.product.as_deref(), Some(catalog_row.name.as_str()));
        assert_eq!(stored.year, catalog_row.year);
        assert!(!stored.ignored);
        // Listing fields persisted alongside the match.
        assert_eq!(stored.amount, Some(8500));
        assert_eq!(stored.seller.as_deref(), Some("Arcade Dreams"));
    }

    #[tokio::test]
    async fn identify_ignores_ads_without_catalog_neighbor() {
        let extractor = FakeExtractor {
            by_needle: HashMap::from([(
                "vacuum",
                extracted_with("random vacuum cleaner", None, 40),
            )]),
            fail_needle: None,
        };
        let (crawler, fx) = crawler_with(FakeScraper::default(), extractor, options(0)).await;
        let ad = fx
            .repo
            .create("https://www.leboncoin.fr/ad/aspirateur/2822222222")
            .await
            .unwrap();
        fx.repo
            .record_scraped(ad.id, "random vacuum cleaner, barely used", None)
            .await
            .unwrap();

        let summary = crawler.identify(None).await.unwrap();
        assert_eq!(summary.identified, 0);
        assert_eq!(summary.ignored, 1);

        let stored = fx.repo.find_by_url(&ad.url).await.unwrap().unwrap();
        assert!(stored.ignored);
        assert!(stored.opdb_id.is_none());
        // Extracted listing fields survive the ignore decision.
        assert_eq!(stored.amount, Some(40));
    }

    #[tokio::test]
    async fn identify_ignores_ads_without_product_mention() {
        let (crawler, fx) =
            crawler_with(FakeScraper::default(), FakeExtractor::default(), options(0)).await;
        let ad = fx
            .repo
            .create("https://www.leboncoin.fr/ad/table-basse/2833333333")
            .await
            .unwrap();
        fx.repo
            .record_scraped(ad.id, "table basse en chene massif", None)
            .await
            .unwrap();

        let summary = crawler.identify(None).await.unwrap();
        assert_eq!(summary.ignored, 1);
        let stored = fx.repo.find_by_url(&ad.url).await.unwrap().unwrap();
        assert!(stored.ignored);
        assert_eq!(stored.title.as_deref(), Some("untitled listing"));
    }

    #[tokio::test]
    async fn failed_extraction_leaves_ad_for_retry() {
        let extractor = FakeExtractor {
            by_needle: HashMap::new(),
            fail_needle: Some("godzilla"),
        };
        let (crawler, fx) = crawler_with(FakeScraper::default(), extractor, options(0)).await;
        let ad = fx
            .repo
            .create("https://www.leboncoin.fr/ad/flipper-godzilla/2811111111")
            .await
            .unwrap();
        fx.repo
            .record_scraped(ad.id, "Stern godzilla pinball machine", None)
            .await
            .unwrap();

        let summary = crawler.identify(None).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.identified, 0);

        let stored = fx.repo.find_by_url(&ad.url).await.unwrap().unwrap();
        assert_eq!(stored.stage, AdStage::Scraped);
        assert!(stored.title.is_none());
        assert_eq!(stored.retries, 1);
        assert!(!stored.ignored);
    }

    #[test]
    fn ad_url_filter_accepts_only_detail_pages() {
        assert!(is_ad_url("https://www.leboncoin.fr/ad/flipper-godzilla/2811111111"));
        assert!(!is_ad_url("https://www.leboncoin.fr/recherche?text=flipper"));
        assert!(!is_ad_url("https://www.leboncoin.fr/ad/flipper-godzilla/abc"));
        assert!(!is_ad_url("https://www.leboncoin.fr/ad//2811111111/extra"));
        assert!(!is_ad_url("https://elsewhere.example/ad/flipper/123"));
    }
}
