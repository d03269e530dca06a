
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{FailureKind, ProviderError};
use crate::config::Secret;

/// Blocking JSON-over-HTTP client shared by the remote adapters
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: Url,
    agent: ureq::Agent,
    bearer: Option<Secret>,
}

impl HttpClient {
    /// `timeout` bounds every call made through this client
    #[inline]
    pub fn new(base_url: &Url, timeout: Duration, bearer: Option<Secret>) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            base_url: with_trailing_slash(base_url),
            agent,
            bearer,
        }
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path relative to the base URL, keeping any base path prefix
    #[inline]
    pub fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ProviderError::new(FailureKind::InvalidRequest, e.to_string()))
    }

    #[inline]
    pub fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let request_json = serde_json::to_string(body).map_err(|e| {
            ProviderError::new(
                FailureKind::InvalidRequest,
                format!("Failed to serialize request: {}", e),
            )
        })?;

        debug!("POST {} ({} bytes)", url, request_json.len());

        let mut request = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json");
        if let Some(token) = &self.bearer {
            request = request.header("Authorization", format!("Bearer {}", token.expose()));
        }

        let response_text = request
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(classify_error)?;

        parse_response(&response_text)
    }

    #[inline]
    pub fn get_json<R>(&self, path: &str) -> Result<R, ProviderError>
    where
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);

        let mut request = self.agent.get(url.as_str());
        if let Some(token) = &self.bearer {
            request = request.header("Authorization", format!("Bearer {}", token.expose()));
        }

        let response_text = request
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(classify_error)?;

        parse_response(&response_text)
    }
}

fn parse_response<R: DeserializeOwned>(text: &str) -> Result<R, ProviderError> {
    serde_json::from_str(text)
        .map_err(|e| ProviderError::protocol(format!("Failed to parse response: {}", e)))
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Map a transport-level error onto the retry classification
#[inline]
pub fn classify_error(error: ureq::Error) -> ProviderError {
    match error {
        ureq::Error::StatusCode(status) => classify_status(status),
        ureq::Error::Timeout(_) => ProviderError::timeout(error.to_string()),
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
            ProviderError::new(FailureKind::Transport, error.to_string())
        }
        other => ProviderError::protocol(other.to_string()),
    }
}

#[inline]
pub fn classify_status(status: u16) -> ProviderError {
    let kind = match status {
        401 | 403 => FailureKind::Auth,
        408 => FailureKind::Timeout,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::Server,
        _ => FailureKind::InvalidRequest,
    };
    ProviderError::new(kind, format!("HTTP {}", status))
}
