//! ScrapingBee backend: the service proxies raw HTML, conversion happens here.

use anyhow::Context;
use scraper::{Html, Selector};
use url::Url;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    classify_status, classify_transport_error, dedup_links, LinksResult, ScrapeError,
    ScrapeResult, ScraperConfig, WrappedScraper,
};

const DEFAULT_API_URL: &str = "https://app.scrapingbee.com/api/v1/";

#[derive(Debug)]
pub struct ScrapingBeeScraper {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ScrapingBeeScraper {
    pub fn new(config: ScraperConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.api_key.trim().is_empty(),
            "missing ScrapingBee API key"
        );
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .context("building ScrapingBee HTTP client")?;
        Ok(Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            api_key: config.api_key.trim().to_string(),
        })
    }

    /// Points the client at a different API host (used by tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn fetch_html(&self, url: &str) -> Result<(String, u16), ScrapeError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("url", url),
                ("render_js", "false"),
            ])
            .send()
            .await
            .map_err(|err| classify_transport_error(err, "ScrapingBee request"))?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(status, "ScrapingBee fetch") {
            return Err(err);
        }

        let html = response
            .text()
            .await
            .map_err(|err| ScrapeError::retry_now(format!("reading ScrapingBee body: {err}")))?;
        Ok((html, status))
    }
}

#[async_trait]
impl WrappedScraper for ScrapingBeeScraper {
    fn provider(&self) -> &'static str {
        "scrapingbee"
    }

    async fn crawl(&self, search_url: &str) -> Result<LinksResult, ScrapeError> {
        let base = Url::parse(search_url)
            .map_err(|err| ScrapeError::unrecoverable(format!("invalid search URL: {err}")))?;
        let (html, status_code) = self.fetch_html(search_url).await?;
        let links = links_from_html(&html, &base);
        debug!(links = links.len(), %search_url, "scrapingbee crawl");

        Ok(LinksResult {
            links,
            status_code,
            credits_used: 1,
        })
    }

    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeError> {
        let (html, status_code) = self.fetch_html(url).await?;
        let markdown = html_to_markdown(&html);
        if markdown.trim().is_empty() {
            return Err(ScrapeError::retry_now(format!(
                "ScrapingBee returned empty content for {url}"
            )));
        }

        Ok(ScrapeResult {
            markdown,
            status_code,
            credits_used: 1,
            scrape_id: None,
        })
    }
}

/// Collects absolute http(s) links from a page, resolving relative hrefs
/// against the page URL. Duplicates collapse to the first occurrence.
fn links_from_html(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    let links = document
        .select(&selector)
        .filter_map(|node| node.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
        .map(|mut url| {
            url.set_fragment(None);
            url.to_string()
        })
        .collect();
    dedup_links(links)
}

/// Drops non-content elements, then converts what is left to markdown.
fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut cleaned = html.to_string();
    for selector_str in ["script", "style", "noscript", "iframe", "nav", "footer"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element in document.select(&selector) {
                cleaned = cleaned.replace(&element.html(), "");
            }
        }
    }

    htmd::convert(&cleaned).unwrap_or_else(|_| {
        let fallback = Html::parse_document(&cleaned);
        fallback.root_element().text().collect::<String>()
    })
}
