//! Resolves noisy product mentions to canonical catalog entries.
//!
//! Extraction gives inconsistent brand/model phrasing, so resolution goes
//! through nearest-neighbor search over a controlled catalog embedding space
//! instead of asking the model to pick from the catalog directly. That also
//! keeps catalog refreshes decoupled from the extraction model.

use std::sync::Arc;

use pinwatch_core::{CatalogHit, Product, ProductGuess};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{Embedder, IndexPoint, MatchError, VectorIndex};

/// Builds the text embedded for a catalog entry or a match query, e.g.
/// `"Godzilla (Premium) by Stern from 2021"`.
pub fn embedding_text(
    name: &str,
    shortname: Option<&str>,
    manufacturer: Option<&str>,
    year: Option<i32>,
) -> String {
    let mut parts = vec![name.to_string()];
    if let Some(short) = shortname {
        if !short.is_empty() && short != name {
            parts.push(short.to_string());
        }
    }
    if let Some(manufacturer) = manufacturer {
        if !manufacturer.is_empty() {
            parts.push(format!("by {manufacturer}"));
        }
    }
    if let Some(year) = year {
        parts.push(format!("from {year}"));
    }
    parts.join(" ").trim().to_string()
}

/// Outcome of one catalog index build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub indexed: usize,
    pub skipped: usize,
}

pub struct ProductMatcher {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    threshold: f32,
}

impl ProductMatcher {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, threshold: f32) -> Self {
        Self {
            embedder,
            index,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Embeds the guess and queries the index for its nearest catalog entry.
    /// Returns `None` when the best candidate scores below the acceptance
    /// threshold; a score exactly at the threshold is accepted.
    pub async fn resolve(&self, guess: &ProductGuess) -> Result<Option<CatalogHit>, MatchError> {
        let text = embedding_text(
            &guess.name,
            None,
            guess.manufacturer.as_deref(),
            guess.year,
        );
        debug!(%text, "resolving product guess");

        let vector = self.embedder.embed(&text).await?;
        let hits = self.index.query(&vector, 1).await?;
        let Some(top) = hits.into_iter().next() else {
            warn!(%text, "vector index returned no candidates");
            return Ok(None);
        };

        if top.score < self.threshold {
            info!(
                id = %top.id,
                score = top.score,
                threshold = self.threshold,
                "best candidate below threshold"
            );
            return Ok(None);
        }

        let name = top
            .metadata
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(top.id.as_str())
            .to_string();
        let manufacturer = top
            .metadata
            .get("manufacturer")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let year = top
            .metadata
            .get("year")
            .and_then(|v| v.as_i64())
            .map(|y| y as i32);

        Ok(Some(CatalogHit {
            opdb_id: top.id,
            name,
            manufacturer,
            year,
            score: top.score,
        }))
    }

    /// Embeds every catalog product and upserts it keyed by its canonical id.
    /// Entries without usable text are skipped, never fabricated.
    pub async fn index_catalog(&self, products: &[Product]) -> Result<IndexSummary, MatchError> {
        let mut summary = IndexSummary::default();
        for product in products {
            let text = embedding_text(
                &product.name,
                product.shortname.as_deref(),
                product.manufacturer.as_deref(),
                product.year,
            );
            if text.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let vector = self.embedder.embed(&text).await?;
            let mut metadata = json!({
                "name": product.name,
                "text": text,
            });
            if let Some(shortname) = &product.shortname {
                metadata["shortname"] = json!(shortname);
            }
            if let Some(manufacturer) = &product.manufacturer {
                metadata["manufacturer"] = json!(manufacturer);
            }
            if let Some(year) = product.year {
                metadata["year"] = json!(year);
            }

            self.index
                .upsert(vec![IndexPoint {
                    id: product.opdb_id.clone(),
                    values: vector,
                    metadata,
                }])
                .await?;
            summary.indexed += 1;
            info!(opdb_id = %product.opdb_id, name = %product.name, "indexed catalog product");
        }
        Ok(summary)
    }
}
