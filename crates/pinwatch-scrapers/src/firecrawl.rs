//! Firecrawl backend: the service fetches, renders and converts pages itself.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{
    classify_status, classify_transport_error, dedup_links, LinksResult, ScrapeError,
    ScrapeResult, ScraperConfig, WrappedScraper,
};

const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

#[derive(Debug)]
pub struct FirecrawlScraper {
    client: reqwest::Client,
    base_url: String,
    proxy: &'static str,
    timeout_ms: u64,
}

impl FirecrawlScraper {
    pub fn new(config: ScraperConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.api_key.trim().is_empty(),
            "missing Firecrawl API key"
        );
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid Firecrawl API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building Firecrawl HTTP client")?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            proxy: "basic",
            timeout_ms: config.timeout.as_millis() as u64,
        })
    }

    /// Points the client at a different API host (used by tests and staging).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request(&self, body: serde_json::Value) -> Result<FirecrawlDocument, ScrapeError> {
        let endpoint = format!("{}/v2/scrape", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| classify_transport_error(err, "Firecrawl request"))?;

        let api_status = response.status().as_u16();
        if let Some(err) = classify_status(api_status, "Firecrawl API") {
            return Err(err);
        }

        let envelope: FirecrawlEnvelope = response
            .json()
            .await
            .map_err(|err| ScrapeError::unrecoverable(format!("invalid Firecrawl response: {err}")))?;

        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| "Firecrawl reported failure without detail".to_string());
            return Err(ScrapeError::retry_now(message));
        }
        let document = envelope
            .data
            .ok_or_else(|| ScrapeError::retry_now("Firecrawl response missing document"))?;

        // The envelope can be 200 while the fetched page itself was blocked.
        if let Some(status) = document.metadata.status_code {
            let context = document.metadata.error.as_deref().unwrap_or("scraped page");
            if let Some(err) = classify_status(status, context) {
                return Err(err);
            }
        }

        Ok(document)
    }
}

#[async_trait]
impl WrappedScraper for FirecrawlScraper {
    fn provider(&self) -> &'static str {
        "firecrawl"
    }

    async fn crawl(&self, search_url: &str) -> Result<LinksResult, ScrapeError> {
        let body = json!({
            "url": search_url,
            "formats": ["links"],
            "parsers": [],
            "onlyMainContent": true,
            "maxAge": 0,
            "proxy": self.proxy,
        });
        let document = self.request(body).await?;
        debug!(links = document.links.len(), %search_url, "firecrawl crawl");

        Ok(LinksResult {
            links: dedup_links(document.links),
            status_code: document.metadata.status_code.unwrap_or(200),
            credits_used: document.metadata.credits_used.unwrap_or(0),
        })
    }

    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeError> {
        let body = json!({
            "url": url,
            "formats": ["markdown"],
            "parsers": [],
            "onlyMainContent": false,
            "proxy": self.proxy,
            "location": { "country": "FR", "languages": ["fr"] },
            "timeout": self.timeout_ms,
        });
        let document = self.request(body).await?;

        let markdown = document.markdown.unwrap_or_default();
        if markdown.trim().is_empty() {
            return Err(ScrapeError::retry_now(format!(
                "Firecrawl returned empty content for {url}"
            )));
        }

        Ok(ScrapeResult {
            markdown,
            status_code: document.metadata.status_code.unwrap_or(200),
            credits_used: document.metadata.credits_used.unwrap_or(0),
            scrape_id: document.metadata.scrape_id,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct FirecrawlEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<FirecrawlDocument>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct FirecrawlDocument {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    metadata: FirecrawlMetadata,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct FirecrawlMetadata {
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    credits_used: Option<u32>,
    #[serde(default)]
    scrape_id: Option<String>,
}
