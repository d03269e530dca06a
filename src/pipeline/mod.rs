// Query pipeline
// Question → embedding → nearest records → prompt → language model → answer

pub mod prompt;


use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::{Embedder, embed_with_retry, prepare_input};
use crate::index::{Metric, SearchHit, VectorIndex};
use crate::llm::LanguageModel;
use crate::providers::{RetryFailure, RetryPolicy, with_retry};
use crate::{RagError, Stage};

pub use prompt::{SYSTEM_PROMPT, build_prompt, dedupe, fit_to_budget, format_entry};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_tokens: usize,
    pub dedupe_context: bool,
    pub metric: Metric,
    pub max_input_tokens: usize,
}

impl PipelineSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k as usize,
            min_score: config.retrieval.min_score,
            max_context_tokens: config.retrieval.max_context_tokens,
            dedupe_context: config.retrieval.dedupe_context,
            metric: config.index.metric,
            max_input_tokens: config.embedding.max_input_tokens,
        }
    }
}

/// A record that made it into the prompt
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// Set when no context was retrieved and the model answered unaided
    pub degraded: bool,
    /// Generation attempts beyond the first
    pub retries: u32,
    /// Retrieved entries left out to stay within the context budget
    pub dropped_context: usize,
}

/// Embeds a question and finds the nearest index entries
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    settings: PipelineSettings,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Retriever {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        settings: PipelineSettings,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
            policy,
            cancel,
        }
    }

    #[inline]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Nearest entries for `query` at or above the score threshold, best first
    #[inline]
    pub fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>, RagError> {
        let input = prepare_input(None, query, self.settings.max_input_tokens)?;
        let embedded = embed_with_retry(
            self.embedder.as_ref(),
            std::slice::from_ref(&input),
            &self.policy,
            &self.cancel,
        )?;
        let vector = embedded.value.into_iter().next().unwrap_or_default();

        let top_k = self.settings.top_k;
        let metric = self.settings.metric;
        let hits = with_retry(&self.policy, &self.cancel, "retrieval", || {
            self.index.query(&vector, top_k, metric)
        })
        .map_err(|failure| match failure {
            RetryFailure::Failed { attempts, error } => RagError::IndexRead {
                attempts,
                cause: error,
            },
            RetryFailure::Cancelled { .. } => RagError::Cancelled(Stage::Retrieve),
        })?
        .value;

        let retrieved = hits.len();
        let hits: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.settings.min_score)
            .collect();
        debug!(
            "Retrieved {} entries ({} below min score)",
            hits.len(),
            retrieved - hits.len()
        );
        Ok(hits)
    }
}

/// Retrieval followed by a grounded model call
pub struct QueryPipeline {
    retriever: Retriever,
    model: Arc<dyn LanguageModel>,
}

impl QueryPipeline {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        settings: PipelineSettings,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_retriever(Retriever::new(embedder, index, settings, policy, cancel), model)
    }

    #[inline]
    pub fn with_retriever(retriever: Retriever, model: Arc<dyn LanguageModel>) -> Self {
        Self { retriever, model }
    }

    /// Answer one question. Blocks on the remote services.
    #[inline]
    pub fn answer(&self, query: &str) -> Result<Answer, RagError> {
        let settings = self.retriever.settings();
        let mut context = self.retriever.retrieve(query)?;

        if settings.dedupe_context {
            let removed = dedupe(&mut context);
            if removed > 0 {
                debug!("Removed {} duplicate context entries", removed);
            }
        }
        let dropped_context = fit_to_budget(&mut context, settings.max_context_tokens);
        if dropped_context > 0 {
            info!(
                "Dropped {} lowest-ranked entries to fit {} context tokens",
                dropped_context, settings.max_context_tokens
            );
        }

        let degraded = context.is_empty();
        if degraded {
            warn!("No context retrieved; answering without it");
        }

        let prompt = build_prompt(query.trim(), &context);
        debug!(
            "Generating with {} from {} context entries",
            self.model.model_id(),
            context.len()
        );
        let generated = with_retry(
            &self.retriever.policy,
            &self.retriever.cancel,
            "generation",
            || self.model.generate(&prompt),
        )
        .map_err(|failure| match failure {
            RetryFailure::Failed { attempts, error } => RagError::Generation {
                attempts,
                cause: error,
            },
            RetryFailure::Cancelled { .. } => RagError::Cancelled(Stage::Generate),
        })?;

        Ok(Answer {
            text: generated.value.trim().to_string(),
            sources: context
                .iter()
                .map(|hit| SourceRef {
                    id: hit.id.clone(),
                    score: hit.score,
                })
                .collect(),
            degraded,
            retries: generated.retries(),
            dropped_context,
        })
    }
}
