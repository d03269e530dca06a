
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{EntryMetadata, IndexEntry, Metric, SearchHit, VectorIndex};
use crate::providers::{FailureKind, ProviderError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    dimension: Option<usize>,
    metric: Option<Metric>,
    entries: BTreeMap<String, StoredEntry>,
    /// Upserts not yet written to the snapshot
    #[serde(skip)]
    unflushed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    vector: Vec<f32>,
    metadata: EntryMetadata,
}

/// In-process vector index, optionally mirrored to a JSON snapshot on disk.
///
/// Backs the `local` index backend and every test that needs an index.
/// Upserts stay in memory until `flush`; collection changes are written at once.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    collection: RwLock<Collection>,
    snapshot: Option<PathBuf>,
}

impl MemoryIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or start) an index persisted at `path`
    #[inline]
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let path = path.into();
        let collection = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| storage_error(&path, &e))?;
            let collection: Collection = serde_json::from_str(&raw).map_err(|e| {
                ProviderError::protocol(format!(
                    "Local index {} is corrupt: {}",
                    path.display(),
                    e
                ))
            })?;
            info!(
                "Loaded {} entries from local index {}",
                collection.entries.len(),
                path.display()
            );
            collection
        } else {
            debug!("No local index at {}, starting empty", path.display());
            Collection::default()
        };

        Ok(Self {
            collection: RwLock::new(collection),
            snapshot: Some(path),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Collection> {
        self.collection
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Collection> {
        self.collection
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn persist(&self, collection: &Collection) -> Result<(), ProviderError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| storage_error(parent, &e))?;
        }
        let json = serde_json::to_string(collection)
            .map_err(|e| ProviderError::protocol(format!("Failed to encode index: {}", e)))?;

        // Write then rename so a crash never leaves a half-written snapshot
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json).map_err(|e| storage_error(&staging, &e))?;
        fs::rename(&staging, path).map_err(|e| storage_error(path, &e))
    }
}

fn storage_error(path: &Path, error: &std::io::Error) -> ProviderError {
    ProviderError::new(
        FailureKind::Transport,
        format!("Local index I/O on {}: {}", path.display(), error),
    )
}

fn metric_error(expected: Metric, actual: Metric) -> ProviderError {
    ProviderError::new(
        FailureKind::InvalidRequest,
        format!(
            "{} metric requested, collection was built with {}",
            actual, expected
        ),
    )
}

fn dimension_error(expected: usize, actual: usize) -> ProviderError {
    ProviderError::new(
        FailureKind::InvalidRequest,
        format!(
            "vector has {} dimensions, collection expects {}",
            actual, expected
        ),
    )
}

impl VectorIndex for MemoryIndex {
    #[inline]
    fn ensure_collection(&self, dimension: usize, metric: Metric) -> Result<(), ProviderError> {
        let mut collection = self.write();
        if let Some(existing) = collection.dimension
            && existing != dimension
        {
            return Err(dimension_error(existing, dimension));
        }
        if let Some(existing) = collection.metric
            && existing != metric
        {
            return Err(metric_error(existing, metric));
        }
        if collection.dimension.is_some() && collection.metric.is_some() {
            return Ok(());
        }

        collection.dimension = Some(dimension);
        collection.metric = Some(metric);
        self.persist(&collection)
    }

    #[inline]
    fn recreate_collection(
        &self,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), ProviderError> {
        let mut collection = self.write();
        info!(
            "Dropping {} entries and recreating the local collection ({} dimensions, {})",
            collection.entries.len(),
            dimension,
            metric
        );
        *collection = Collection {
            dimension: Some(dimension),
            metric: Some(metric),
            ..Collection::default()
        };
        self.persist(&collection)
    }

    #[inline]
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), ProviderError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut collection = self.write();
        let dimension = collection.dimension.unwrap_or(entries[0].vector.len());
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimension) {
            return Err(dimension_error(dimension, bad.vector.len()));
        }

        collection.dimension = Some(dimension);
        for entry in entries {
            collection.entries.insert(
                entry.id.clone(),
                StoredEntry {
                    vector: entry.vector.clone(),
                    metadata: entry.metadata.clone(),
                },
            );
        }
        collection.unflushed = true;
        debug!(
            "Upserted {} entries ({} total)",
            entries.len(),
            collection.entries.len()
        );
        Ok(())
    }

    #[inline]
    fn flush(&self) -> Result<(), ProviderError> {
        let mut collection = self.write();
        if !collection.unflushed {
            return Ok(());
        }
        self.persist(&collection)?;
        collection.unflushed = false;
        Ok(())
    }

    #[inline]
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let collection = self.read();
        if let Some(dimension) = collection.dimension
            && dimension != vector.len()
        {
            return Err(dimension_error(dimension, vector.len()));
        }
        if let Some(built_with) = collection.metric
            && built_with != metric
        {
            return Err(metric_error(built_with, metric));
        }

        let mut hits: Vec<SearchHit> = collection
            .entries
            .iter()
            .map(|(id, stored)| SearchHit {
                id: id.clone(),
                score: metric.similarity(vector, &stored.vector),
                metadata: stored.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    #[inline]
    fn count(&self) -> Result<usize, ProviderError> {
        Ok(self.read().entries.len())
    }
}
