//! Core domain model for pinwatch: ads, lifecycle stages, catalog products.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pinwatch-core";

/// Lifecycle stage of an ad. Transitions follow
/// `new -> scraped -> {identified, ignored}`; `ignored` is also reachable
/// straight from `new` when scraping is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdStage {
    New,
    Scraped,
    Identified,
    Ignored,
}

impl AdStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdStage::New => "new",
            AdStage::Scraped => "scraped",
            AdStage::Identified => "identified",
            AdStage::Ignored => "ignored",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(AdStage::New),
            "scraped" => Some(AdStage::Scraped),
            "identified" => Some(AdStage::Identified),
            "ignored" => Some(AdStage::Ignored),
            _ => None,
        }
    }

    /// Whether advancing from `self` to `next` is a legal stage transition.
    pub fn can_transition(&self, next: AdStage) -> bool {
        matches!(
            (self, next),
            (AdStage::New, AdStage::Scraped)
                | (AdStage::New, AdStage::Ignored)
                | (AdStage::Scraped, AdStage::Identified)
                | (AdStage::Scraped, AdStage::Ignored)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AdStage::Identified | AdStage::Ignored)
    }
}

/// One discovered marketplace listing, tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ad {
    pub id: Uuid,
    pub url: String,
    pub stage: AdStage,
    pub created_at: DateTime<Utc>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub identified_at: Option<DateTime<Utc>>,
    pub ignored: bool,
    pub retries: i32,
    pub content: Option<String>,
    pub scrape_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub seller: Option<String>,
    pub seller_url: Option<String>,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
    pub opdb_id: Option<String>,
}

impl Ad {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            stage: AdStage::New,
            created_at: Utc::now(),
            scraped_at: None,
            identified_at: None,
            ignored: false,
            retries: 0,
            content: None,
            scrape_id: None,
            title: None,
            description: None,
            amount: None,
            currency: None,
            city: None,
            zipcode: None,
            seller: None,
            seller_url: None,
            product: None,
            manufacturer: None,
            year: None,
            opdb_id: None,
        }
    }
}

/// Listing details extracted from raw ad markdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdInfo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub seller: Option<String>,
    pub seller_url: Option<String>,
}

/// Free-text product mention extracted from an ad, before catalog resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductGuess {
    pub name: String,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
}

/// Full extraction result for one ad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAd {
    pub info: AdInfo,
    pub product: Option<ProductGuess>,
}

/// Canonical catalog entry for a real-world machine model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub opdb_id: String,
    pub ipdb_id: Option<String>,
    pub name: String,
    pub shortname: Option<String>,
    pub manufacturer: Option<String>,
    pub kind: Option<String>,
    pub year: Option<i32>,
}

/// Accepted nearest-neighbor match against the catalog index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogHit {
    pub opdb_id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
    pub score: f32,
}
