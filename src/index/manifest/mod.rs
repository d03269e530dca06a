
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Metric;
use crate::RagError;

/// What a built index was built with, recorded next to the configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimension: usize,
    pub metric: Metric,
    pub collection: String,
    pub record_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    /// `Ok(None)` when no index has been built yet
    #[inline]
    pub fn load(path: &Path) -> Result<Option<Self>, RagError> {
        if !path.exists() {
            debug!("No manifest at {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map(Some).map_err(|e| {
            RagError::Configuration(format!(
                "Failed to parse manifest {}: {}",
                path.display(),
                e
            ))
        })
    }

    #[inline]
    pub fn save(&self, path: &Path) -> Result<(), RagError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RagError::Configuration(format!("Failed to encode manifest: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Fail when vectors from `model` at `dimension` cannot be compared with this index
    #[inline]
    pub fn check_compatible(
        &self,
        model: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), RagError> {
        let mut mismatches = Vec::new();
        if self.embedding_model != model {
            mismatches.push(format!(
                "model {} (configured {})",
                self.embedding_model, model
            ));
        }
        if self.dimension != dimension {
            mismatches.push(format!(
                "dimension {} (configured {})",
                self.dimension, dimension
            ));
        }
        if self.metric != metric {
            mismatches.push(format!("metric {} (configured {})", self.metric, metric));
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(RagError::Configuration(format!(
                "index '{}' was built with {}; rebuild with --force to replace it",
                self.collection,
                mismatches.join(", ")
            )))
        }
    }
}
