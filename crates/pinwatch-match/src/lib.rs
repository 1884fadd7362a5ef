//! Language-model extraction and semantic catalog matching.

use thiserror::Error;

mod embed;
mod extract;
mod index;
mod matcher;
mod opdb;

pub use embed::{Embedder, OpenAiEmbedder};
pub use extract::{ExtractError, Extractor, OpenAiExtractor};
pub use index::{IndexPoint, MemoryVectorIndex, PineconeIndex, ScoredPoint, VectorIndex};
pub use matcher::{embedding_text, IndexSummary, ProductMatcher};
pub use opdb::load_opdb_catalog;

pub const CRATE_NAME: &str = "pinwatch-match";

/// Failure while talking to the embedding or vector-search providers.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("embedding request failed: {0}")]
    Embedding(String),
    #[error("vector index request failed: {0}")]
    Index(String),
}
