// Embeddings module
// Text → vector models and the input preparation shared by indexing and querying

pub mod hashing;
pub mod ollama;
pub mod text;


use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, Credentials, EmbeddingProvider};
use crate::providers::{ProviderError, Retried, RetryFailure, RetryPolicy, with_retry};
use crate::{RagError, Stage};

pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;
pub use text::{estimate_token_count, normalize_whitespace, split_sentences, truncate_to_tokens};

/// A model mapping text to fixed-dimension vectors
pub trait Embedder: Send + Sync {
    /// Identity recorded in the index manifest; must change when vectors would
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// One vector per input, in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Build the embedder selected in the configuration
#[inline]
pub fn embedder_from_config(
    config: &Config,
    credentials: &Credentials,
) -> Result<Arc<dyn Embedder>, RagError> {
    let dimension = config.embedding.dimension as usize;
    match config.embedding.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(dimension))),
        EmbeddingProvider::Ollama => {
            let url = match &credentials.embedding_url {
                Some(url) => url.clone(),
                None => config
                    .embedding
                    .embedding_url()
                    .map_err(|e| RagError::Configuration(e.to_string()))?,
            };
            Ok(Arc::new(OllamaClient::new(
                &url,
                &config.embedding.model,
                dimension,
                config.request_timeout(),
            )))
        }
    }
}

/// Normalize text and fit it into the model's input budget.
///
/// Text over `max_tokens` is cut at a word boundary; text that is empty after
/// normalization cannot be embedded.
#[inline]
pub fn prepare_input(id: Option<&str>, raw: &str, max_tokens: usize) -> Result<String, RagError> {
    let normalized = normalize_whitespace(raw);
    if normalized.is_empty() {
        return Err(RagError::embedding(id, "text is empty"));
    }

    let truncated = truncate_to_tokens(&normalized, max_tokens);
    if truncated.is_empty() {
        return Err(RagError::embedding(
            id,
            format!("no words fit in {} tokens", max_tokens),
        ));
    }
    if truncated.len() < normalized.len() {
        warn!(
            "Truncated {} from {} to {} estimated tokens",
            id.unwrap_or("input"),
            estimate_token_count(&normalized),
            estimate_token_count(&truncated)
        );
    }

    Ok(truncated.into_owned())
}

/// Embed prepared texts with retries, checking count and dimension of the output
#[inline]
pub fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Retried<Vec<Vec<f32>>>, RagError> {
    let retried = with_retry(policy, cancel, "embedding", || embedder.embed_batch(texts))
        .map_err(|failure| match failure {
            RetryFailure::Failed { attempts, error } => RagError::embedding(
                None,
                format!("{} (after {} attempt(s))", error, attempts),
            ),
            RetryFailure::Cancelled { .. } => RagError::Cancelled(Stage::Embed),
        })?;

    if retried.value.len() != texts.len() {
        return Err(RagError::embedding(
            None,
            format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                retried.value.len()
            ),
        ));
    }

    let expected = embedder.dimension();
    if let Some(bad) = retried.value.iter().find(|v| v.len() != expected) {
        return Err(RagError::embedding(
            None,
            format!(
                "model returned {} dimensions, index expects {}",
                bad.len(),
                expected
            ),
        ));
    }

    debug!(
        "Embedded {} texts with {} ({} dimensions)",
        texts.len(),
        embedder.model_id(),
        expected
    );
    Ok(retried)
}
