
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{LanguageModel, Prompt};
use crate::config::{GenerationConfig, Secret};
use crate::providers::{HttpClient, ProviderError};

/// Client for any OpenAI-compatible `/chat/completions` endpoint
pub struct ChatCompletionsClient {
    http: HttpClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsClient {
    #[inline]
    pub fn new(
        base_url: &Url,
        api_key: Secret,
        generation: &GenerationConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            http: HttpClient::new(base_url, timeout, Some(api_key)),
            model: generation.model.clone(),
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
        }
    }
}

impl LanguageModel for ChatCompletionsClient {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let response: ChatResponse = self.http.post_json("chat/completions", &request)?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| ProviderError::protocol("response has no choices[0].message.content"))?;

        debug!("{} returned {} characters", self.model, content.len());
        Ok(content)
    }
}
