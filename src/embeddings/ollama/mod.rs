
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::Embedder;
use crate::providers::{FailureKind, HttpClient, ProviderError};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(base_url: &Url, model: &str, dimension: usize, timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(base_url, timeout, None),
            model: model.to_string(),
            dimension,
        }
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<(), ProviderError> {
        debug!(
            "Performing health check for Ollama at {}",
            self.http.base_url()
        );

        let models = self.list_models()?;
        if !models.iter().any(|m| m.name == self.model) {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            return Err(ProviderError::new(
                FailureKind::InvalidRequest,
                format!(
                    "Model '{}' is not available. Available models: {:?}",
                    self.model, available_models
                ),
            ));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.http.base_url(),
            self.model
        );
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let response: ModelsResponse = self.http.get_json("/api/tags")?;
        debug!("Found {} models", response.models.len());
        Ok(response.models)
    }
}

impl Embedder for OllamaClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbedRequest {
            model: &self.model,
            inputs: texts,
        };
        let response: EmbedResponse = self.http.post_json("/api/embed", &request)?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::protocol(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }
}
