//! Scraping-service backends behind a single provider-agnostic contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod firecrawl;
mod scrapingbee;

pub use firecrawl::FirecrawlScraper;
pub use scrapingbee::ScrapingBeeScraper;

pub const CRATE_NAME: &str = "pinwatch-scrapers";

/// Failure of a single provider call, classified by how it should be retried.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Transient failure; the same call is worth attempting again soon.
    #[error("retryable scrape failure: {message}")]
    RetryNow { message: String, status: Option<u16> },
    /// Quota, payment or rate-limit exhaustion; only a later run can succeed.
    #[error("provider throttled, retry later: {message}")]
    RetryLater { message: String, status: Option<u16> },
    /// Permanent failure; the target cannot be scraped with this provider.
    #[error("unrecoverable scrape failure: {message}")]
    Unrecoverable { message: String, status: Option<u16> },
}

impl ScrapeError {
    pub fn retry_now(message: impl Into<String>) -> Self {
        ScrapeError::RetryNow {
            message: message.into(),
            status: None,
        }
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        ScrapeError::Unrecoverable {
            message: message.into(),
            status: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ScrapeError::RetryNow { status, .. }
            | ScrapeError::RetryLater { status, .. }
            | ScrapeError::Unrecoverable { status, .. } => *status,
        }
    }

    /// A recoverable error leaves the ad eligible for a future attempt.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScrapeError::Unrecoverable { .. })
    }
}

/// Maps an HTTP status from a provider (or the page behind it) to a
/// `ScrapeError`, or `None` when the status is not an error.
///
/// 401/403/500 show up for blocked fetches and CAPTCHA walls that clear on a
/// later attempt; 402/429 mean exhausted credits or throttling; any other 4xx
/// or 5xx is treated as permanent for this target.
pub fn classify_status(status: u16, context: &str) -> Option<ScrapeError> {
    match status {
        401 | 403 | 500 => Some(ScrapeError::RetryNow {
            message: format!("{context} returned status {status}"),
            status: Some(status),
        }),
        402 | 429 => Some(ScrapeError::RetryLater {
            message: format!("{context} returned status {status}"),
            status: Some(status),
        }),
        s if s >= 400 => Some(ScrapeError::Unrecoverable {
            message: format!("{context} returned status {status}"),
            status: Some(status),
        }),
        _ => None,
    }
}

pub(crate) fn classify_transport_error(err: reqwest::Error, context: &str) -> ScrapeError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ScrapeError::RetryNow {
            message: format!("{context}: {err}"),
            status: None,
        }
    } else {
        ScrapeError::Unrecoverable {
            message: format!("{context}: {err}"),
            status: None,
        }
    }
}

/// Markdown content fetched for one ad page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeResult {
    pub markdown: String,
    pub status_code: u16,
    pub credits_used: u32,
    pub scrape_id: Option<String>,
}

/// Candidate links discovered on a search/listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinksResult {
    pub links: Vec<String>,
    pub status_code: u16,
    pub credits_used: u32,
}

/// Uniform capability contract over third-party scraping services. The
/// pipeline only ever talks to this trait; backends are interchangeable.
#[async_trait]
pub trait WrappedScraper: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Fetch a search/listing page and return the candidate ad links on it.
    async fn crawl(&self, search_url: &str) -> Result<LinksResult, ScrapeError>;

    /// Fetch one ad page and return its content as normalized markdown.
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeError>;
}

/// Which scraping service backs the `WrappedScraper` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperBackend {
    Firecrawl,
    Scrapingbee,
}

impl ScraperBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "firecrawl" => Some(ScraperBackend::Firecrawl),
            "scrapingbee" => Some(ScraperBackend::Scrapingbee),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperBackend::Firecrawl => "firecrawl",
            ScraperBackend::Scrapingbee => "scrapingbee",
        }
    }
}

/// Shared construction knobs for scraper backends.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl ScraperConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// Builds the configured backend. The caller never learns which concrete
/// client it got back.
pub fn scraper_for_backend(
    backend: ScraperBackend,
    config: ScraperConfig,
) -> anyhow::Result<Box<dyn WrappedScraper>> {
    Ok(match backend {
        ScraperBackend::Firecrawl => Box::new(FirecrawlScraper::new(config)?),
        ScraperBackend::Scrapingbee => Box::new(ScrapingBeeScraper::new(config)?),
    })
}

/// Removes duplicate links while preserving discovery order.
pub(crate) fn dedup_links(links: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_statuses_retry_now() {
        for status in [401, 403, 500] {
            let err = classify_status(status, "page").expect("error expected");
            assert!(matches!(err, ScrapeError::RetryNow { .. }), "{status}");
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn quota_statuses_retry_later() {
        for status in [402, 429] {
            let err = classify_status(status, "api").expect("error expected");
            assert!(matches!(err, ScrapeError::RetryLater { .. }), "{status}");
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn other_client_errors_are_unrecoverable() {
        let err = classify_status(404, "page").expect("error expected");
        assert!(matches!(err, ScrapeError::Unrecoverable { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn success_statuses_are_not_errors() {
        assert!(classify_status(200, "page").is_none());
        assert!(classify_status(304, "page").is_none());
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let links = vec![
            "https://a.example/1".to_string(),
            "https://a.example/2".to_string(),
            "https://a.example/1".to_string(),
        ];
        assert_eq!(
            dedup_links(links),
            vec![
                "https://a.example/1".to_string(),
                "https://a.example/2".to_string()
            ]
        );
    }

    #[test]
    fn backend_parsing_is_case_insensitive() {
        assert_eq!(
            ScraperBackend::parse("Firecrawl"),
            Some(ScraperBackend::Firecrawl)
        );
        assert_eq!(
            ScraperBackend::parse("SCRAPINGBEE"),
            Some(ScraperBackend::Scrapingbee)
        );
        assert_eq!(ScraperBackend::parse("playwright"), None);
    }
}
