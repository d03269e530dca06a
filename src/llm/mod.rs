// Hosted language model access

pub mod openai;

use std::sync::Arc;

use crate::RagError;
use crate::config::{Config, Credentials};
use crate::providers::ProviderError;

pub use openai::ChatCompletionsClient;

/// A fully assembled request to the language model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// One completion for `prompt`; the caller owns retries
    fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

/// Build the chat client from configuration; needs the LLM API key
#[inline]
pub fn language_model_from_config(
    config: &Config,
    credentials: &Credentials,
) -> Result<Arc<dyn LanguageModel>, RagError> {
    let (url, key) = credentials
        .require_llm()
        .map_err(|e| RagError::Configuration(e.to_string()))?;

    Ok(Arc::new(ChatCompletionsClient::new(
        url,
        key.clone(),
        &config.generation,
        config.request_timeout(),
    )))
}
