// Index builder
// Embeds dataset records in batches and upserts them into the vector index


use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dataset::Record;
use crate::embeddings::{Embedder, embed_with_retry, prepare_input};
use crate::index::{EntryMetadata, IndexEntry, IndexManifest, Metric, VectorIndex};
use crate::providers::{RetryFailure, RetryPolicy, with_retry};
use crate::{RagError, Stage};

/// Knobs the builder takes from the configuration
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub batch_size: usize,
    pub workers: usize,
    pub metric: Metric,
    pub max_input_tokens: usize,
    pub collection: String,
    /// Where the manifest lives; `None` skips manifest checks entirely
    pub manifest_path: Option<PathBuf>,
}

impl BuilderSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.index.batch_size as usize,
            workers: config.index.workers as usize,
            metric: config.index.metric,
            max_input_tokens: config.embedding.max_input_tokens,
            collection: config.index.collection.clone(),
            manifest_path: Some(config.manifest_path()),
        }
    }
}

/// A record that did not make it into the index
#[derive(Debug)]
pub struct RecordFailure {
    pub id: String,
    pub error: RagError,
}

impl RecordFailure {
    #[inline]
    pub fn stage(&self) -> Option<Stage> {
        self.error.stage()
    }
}

fn index_write_error(failure: RetryFailure) -> RagError {
    match failure {
        RetryFailure::Failed { attempts, error } => RagError::IndexWrite {
            attempts,
            cause: error,
        },
        RetryFailure::Cancelled { .. } => RagError::Cancelled(Stage::Index),
    }
}

/// Outcome of one build; a partially built index shows up as failures here
#[derive(Debug, Default)]
pub struct BuildReport {
    pub total: usize,
    pub indexed: usize,
    pub failures: Vec<RecordFailure>,
    pub batches: usize,
    pub retries: u32,
}

impl BuildReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, outcome: BatchOutcome) {
        self.indexed += outcome.indexed;
        self.retries += outcome.retries;
        self.failures.extend(outcome.failures);
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    indexed: usize,
    retries: u32,
    failures: Vec<RecordFailure>,
}

impl BatchOutcome {
    fn all_failed(ids: Vec<String>, error: impl Fn() -> RagError) -> Self {
        Self {
            failures: ids
                .into_iter()
                .map(|id| RecordFailure { id, error: error() })
                .collect(),
            ..Self::default()
        }
    }
}

/// State shared by every batch worker
struct BatchContext {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    max_input_tokens: usize,
}

pub struct IndexBuilder {
    context: Arc<BatchContext>,
    settings: BuilderSettings,
}

impl IndexBuilder {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        settings: BuilderSettings,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context: Arc::new(BatchContext {
                embedder,
                index,
                policy,
                cancel,
                max_input_tokens: settings.max_input_tokens,
            }),
            settings,
        }
    }

    /// Embed and upsert every record, collecting per-record failures.
    ///
    /// Fails outright only when the index cannot be prepared or the manifest
    /// says the existing index was built with a different model.
    #[inline]
    pub async fn build(
        &self,
        records: Vec<Record>,
        force: bool,
    ) -> Result<BuildReport, RagError> {
        let replace = self.check_manifest(force)?;
        self.prepare_collection(replace).await?;

        let batches = partition(records, self.settings.batch_size);
        let mut report = BuildReport {
            total: batches.iter().map(Vec::len).sum(),
            batches: batches.len(),
            ..BuildReport::default()
        };
        info!(
            "Indexing {} records in {} batches ({} workers)",
            report.total,
            report.batches,
            self.settings.workers
        );

        let bar = progress_bar(report.total);
        let permits = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();

        for (number, batch) in batches.into_iter().enumerate() {
            let context = Arc::clone(&self.context);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
                let Ok(_permit) = permits.acquire_owned().await else {
                    return BatchOutcome::all_failed(ids, || RagError::Cancelled(Stage::Embed));
                };
                if context.cancel.is_cancelled() {
                    return BatchOutcome::all_failed(ids, || RagError::Cancelled(Stage::Embed));
                }

                debug!("Starting batch {} ({} records)", number + 1, ids.len());
                match tokio::task::spawn_blocking(move || context.process(&batch)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Batch {} worker failed: {}", number + 1, e);
                        let cause = e.to_string();
                        BatchOutcome::all_failed(ids, || {
                            RagError::Other(anyhow::anyhow!("batch worker failed: {}", cause))
                        })
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| anyhow::anyhow!("batch task failed: {}", e))?;
            bar.inc((outcome.indexed + outcome.failures.len()) as u64);
            report.absorb(outcome);
        }
        bar.finish_and_clear();
        self.flush_index().await?;

        // Failures arrive in completion order
        report.failures.sort_by(|a, b| a.id.cmp(&b.id));

        if report.indexed > 0 {
            self.write_manifest(&report)?;
        }

        info!(
            "Indexed {}/{} records ({} failed, {} retries)",
            report.indexed,
            report.total,
            report.failures.len(),
            report.retries
        );
        Ok(report)
    }

    /// Whether the existing collection must be replaced before building
    fn check_manifest(&self, force: bool) -> Result<bool, RagError> {
        let Some(path) = &self.settings.manifest_path else {
            return Ok(false);
        };
        let Some(manifest) = IndexManifest::load(path)? else {
            return Ok(false);
        };

        let embedder = &self.context.embedder;
        let compatible =
            manifest.check_compatible(embedder.model_id(), embedder.dimension(), self.settings.metric);
        match compatible {
            Ok(()) => Ok(false),
            Err(e) if force => {
                warn!("Replacing an incompatible index: {}", e);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn prepare_collection(&self, replace: bool) -> Result<(), RagError> {
        let context = Arc::clone(&self.context);
        let metric = self.settings.metric;
        tokio::task::spawn_blocking(move || {
            let dimension = context.embedder.dimension();
            let operation = if replace {
                "recreate collection"
            } else {
                "create collection"
            };
            with_retry(&context.policy, &context.cancel, operation, || {
                if replace {
                    context.index.recreate_collection(dimension, metric)
                } else {
                    context.index.ensure_collection(dimension, metric)
                }
            })
            .map(|_| ())
            .map_err(index_write_error)
        })
        .await
        .map_err(|e| anyhow::anyhow!("collection setup task failed: {}", e))?
    }

    async fn flush_index(&self) -> Result<(), RagError> {
        let context = Arc::clone(&self.context);
        // Runs even after cancellation so finished batches are kept
        tokio::task::spawn_blocking(move || {
            context
                .index
                .flush()
                .map_err(|cause| RagError::IndexWrite { attempts: 1, cause })
        })
        .await
        .map_err(|e| anyhow::anyhow!("index flush task failed: {}", e))?
    }

    fn write_manifest(&self, report: &BuildReport) -> Result<(), RagError> {
        let Some(path) = &self.settings.manifest_path else {
            return Ok(());
        };

        let manifest = IndexManifest {
            embedding_model: self.context.embedder.model_id().to_string(),
            dimension: self.context.embedder.dimension(),
            metric: self.settings.metric,
            collection: self.settings.collection.clone(),
            record_count: report.indexed,
            built_at: Utc::now(),
        };
        manifest.save(path)?;
        debug!("Wrote manifest to {}", path.display());
        Ok(())
    }
}

impl BatchContext {
    fn process(&self, batch: &[Record]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        let mut prepared: Vec<(&Record, String)> = Vec::with_capacity(batch.len());
        for record in batch {
            match prepare_input(Some(&record.id), &record.text, self.max_input_tokens) {
                Ok(text) => prepared.push((record, text)),
                Err(error) => outcome.failures.push(RecordFailure {
                    id: record.id.clone(),
                    error,
                }),
            }
        }
        if prepared.is_empty() {
            return outcome;
        }

        let entries = self.embed(&prepared, &mut outcome);
        if entries.is_empty() {
            return outcome;
        }

        let upserted = with_retry(&self.policy, &self.cancel, "upsert", || {
            self.index.upsert(&entries)
        });
        match upserted {
            Ok(retried) => {
                outcome.retries += retried.retries();
                outcome.indexed += entries.len();
            }
            Err(RetryFailure::Failed { attempts, error }) => {
                warn!(
                    "Upsert of {} entries failed after {} attempt(s): {}",
                    entries.len(),
                    attempts,
                    error
                );
                outcome.retries += attempts.saturating_sub(1);
                for entry in &entries {
                    outcome.failures.push(RecordFailure {
                        id: entry.id.clone(),
                        error: RagError::IndexWrite {
                            attempts,
                            cause: error.clone(),
                        },
                    });
                }
            }
            Err(RetryFailure::Cancelled { .. }) => {
                for entry in &entries {
                    outcome.failures.push(RecordFailure {
                        id: entry.id.clone(),
                        error: RagError::Cancelled(Stage::Index),
                    });
                }
            }
        }

        outcome
    }

    /// Embed the whole batch at once, falling back to one call per record so a
    /// single bad record cannot sink its neighbours
    fn embed(
        &self,
        prepared: &[(&Record, String)],
        outcome: &mut BatchOutcome,
    ) -> Vec<IndexEntry> {
        let texts: Vec<String> = prepared.iter().map(|(_, text)| text.clone()).collect();
        let embedder = self.embedder.as_ref();

        let vectors = match embed_with_retry(embedder, &texts, &self.policy, &self.cancel) {
            Ok(retried) => {
                outcome.retries += retried.retries();
                retried.value.into_iter().map(Ok).collect()
            }
            Err(RagError::Cancelled(stage)) => (0..prepared.len())
                .map(|_| Err(RagError::Cancelled(stage)))
                .collect(),
            Err(e) if prepared.len() == 1 => vec![Err(e)],
            Err(e) => {
                warn!(
                    "Batch embedding failed ({}); retrying {} records one at a time",
                    e,
                    prepared.len()
                );
                texts
                    .iter()
                    .map(|text| {
                        embed_with_retry(
                            embedder,
                            std::slice::from_ref(text),
                            &self.policy,
                            &self.cancel,
                        )
                        .map(|retried| {
                            outcome.retries += retried.retries();
                            retried.value.into_iter().next().unwrap_or_default()
                        })
                    })
                    .collect::<Vec<_>>()
            }
        };

        let mut entries = Vec::with_capacity(prepared.len());
        for ((record, text), vector) in prepared.iter().zip(vectors) {
            match vector {
                Ok(vector) => entries.push(IndexEntry {
                    id: record.id.clone(),
                    vector,
                    metadata: EntryMetadata {
                        text: text.clone(),
                        fields: record.fields.clone(),
                    },
                }),
                Err(error) => outcome.failures.push(RecordFailure {
                    id: record.id.clone(),
                    error: attach_id(error, &record.id),
                }),
            }
        }
        entries
    }
}

fn attach_id(error: RagError, id: &str) -> RagError {
    match error {
        RagError::Embedding { id: None, cause } => RagError::Embedding {
            id: Some(id.to_string()),
            cause,
        },
        other => other,
    }
}

/// Split records into batches of at most `batch_size`, one batch per identifier.
/// A repeated identifier keeps its first position and its last content.
#[inline]
pub fn partition(records: Vec<Record>, batch_size: usize) -> Vec<Vec<Record>> {
    let mut unique: Vec<Record> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in records {
        if let Some(&existing) = positions.get(&record.id) {
            warn!(
                "Record '{}' appears more than once; indexing the last copy",
                record.id
            );
            unique[existing] = record;
        } else {
            positions.insert(record.id.clone(), unique.len());
            unique.push(record);
        }
    }

    unique
        .into_iter()
        .chunks(batch_size.max(1))
        .into_iter()
        .map(Iterator::collect)
        .collect()
}

fn progress_bar(total: usize) -> ProgressBar {
    if console::user_attended_stderr() {
        let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Indexing records")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(total as u64).with_style(style)
    } else {
        ProgressBar::hidden()
    }
}
