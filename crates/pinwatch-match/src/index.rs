//! Vector index clients: the hosted Pinecone-style service and an in-memory
//! cosine index for tests and local runs.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::MatchError;

/// One embedded catalog entry, keyed by its canonical id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A nearest-neighbor query hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces points; used by the offline catalog build.
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<(), MatchError>;

    /// Returns up to `top_k` nearest neighbors, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>, MatchError>;
}

/// Client for a Pinecone serverless index, addressed by its data-plane host.
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
}

impl PineconeIndex {
    pub fn new(api_key: String, host: String, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
        anyhow::ensure!(
            host.starts_with("http://") || host.starts_with("https://"),
            "Pinecone index host must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("building Pinecone HTTP client")?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
        })
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, MatchError> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .json(&body)
            .send()
            .await
            .map_err(|err| MatchError::Index(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MatchError::Index(format!(
                "index request {path} returned {status}: {detail}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<(), MatchError> {
        let vectors: Vec<serde_json::Value> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "values": point.values,
                    "metadata": point.metadata,
                })
            })
            .collect();
        self.post("/vectors/upsert", json!({ "vectors": vectors }))
            .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>, MatchError> {
        let response = self
            .post(
                "/query",
                json!({
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                }),
            )
            .await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|err| MatchError::Index(format!("invalid query payload: {err}")))?;
        Ok(parsed.matches)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredPoint>,
}

/// In-process cosine-similarity index with the same contract as the hosted
/// service. Not persistent; intended for tests and local development.
#[derive(Default)]
pub struct MemoryVectorIndex {
    points: Mutex<HashMap<String, IndexPoint>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<(), MatchError> {
        let mut map = self.points.lock().await;
        for point in points {
            map.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>, MatchError> {
        let map = self.points.lock().await;
        let mut scored: Vec<ScoredPoint> = map
            .values()
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: cosine_similarity(vector, &point.values),
                metadata: point.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
