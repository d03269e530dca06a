// Vector index module
// Entry shapes, the storage seam, and the backends behind it

pub mod manifest;
pub mod memory;
pub mod milvus;


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::RagError;
use crate::config::{Config, Credentials, IndexBackend};
use crate::providers::ProviderError;

pub use manifest::IndexManifest;
pub use memory::MemoryIndex;
pub use milvus::MilvusIndex;

/// Similarity metric used both when building and when querying an index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Dot,
}

impl Metric {
    /// Higher is more similar for both metrics
    #[inline]
    pub fn similarity(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Self::Dot => dot,
            Self::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        }
    }
}

impl fmt::Display for Metric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::Dot => f.write_str("dot"),
        }
    }
}

/// Metadata stored alongside each vector
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryMetadata {
    /// The record text the vector was computed from
    pub text: String,
    /// Structured columns from the dataset, e.g. plant name or growth metric
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Entry stored in the vector index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// Result of a nearest-neighbour query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: EntryMetadata,
}

/// Remote or local store of index entries.
///
/// Upserts overwrite entries with the same id. Queries return hits ordered by
/// descending score.
pub trait VectorIndex: Send + Sync {
    /// Create the collection when it does not exist yet
    fn ensure_collection(&self, dimension: usize, metric: Metric) -> Result<(), ProviderError>;

    /// Drop the collection with every entry in it, then create it empty
    fn recreate_collection(&self, dimension: usize, metric: Metric)
    -> Result<(), ProviderError>;

    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), ProviderError>;

    /// Make buffered upserts durable. Stores that write through need not override it.
    fn flush(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, ProviderError>;

    fn count(&self) -> Result<usize, ProviderError>;
}

/// Build the index backend selected in the configuration
#[inline]
pub fn index_from_config(
    config: &Config,
    credentials: &Credentials,
) -> Result<Arc<dyn VectorIndex>, RagError> {
    match config.index.backend {
        IndexBackend::Local => {
            let index = MemoryIndex::persistent(config.local_index_path())
                .map_err(|e| RagError::Configuration(e.to_string()))?;
            Ok(Arc::new(index))
        }
        IndexBackend::Remote => {
            let (url, key) = credentials
                .require_index()
                .map_err(|e| RagError::Configuration(e.to_string()))?;
            Ok(Arc::new(MilvusIndex::new(
                url,
                key.clone(),
                &config.index.collection,
                config.request_timeout(),
            )))
        }
    }
}
