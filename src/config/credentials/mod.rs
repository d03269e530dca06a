#[cfg(test)]
mod tests;

use std::fmt;

use url::Url;
use zeroize::Zeroizing;

use super::settings::{ConfigError, parse_http_url};

pub const INDEX_URL_ENV: &str = "GARDEN_RAG_INDEX_URL";
pub const INDEX_API_KEY_ENV: &str = "GARDEN_RAG_INDEX_API_KEY";
pub const LLM_URL_ENV: &str = "GARDEN_RAG_LLM_URL";
pub const LLM_API_KEY_ENV: &str = "GARDEN_RAG_LLM_API_KEY";
pub const EMBEDDING_URL_ENV: &str = "GARDEN_RAG_EMBEDDING_URL";

const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1";

/// A credential value that never shows up in `Debug` or `Display` output.
/// The buffer is zeroed when the value is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    #[inline]
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    #[inline]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Endpoints and API keys read once from the environment at startup
#[derive(Debug, Clone)]
pub struct Credentials {
    pub index_url: Option<Url>,
    pub index_api_key: Option<Secret>,
    pub llm_url: Url,
    pub llm_api_key: Option<Secret>,
    pub embedding_url: Option<Url>,
}

impl Credentials {
    /// Read credentials from the process environment
    #[inline]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup`; blank values count as missing
    #[inline]
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let parse_url = |name: &'static str| -> Result<Option<Url>, ConfigError> {
            read(name)
                .map(|raw| {
                    parse_http_url(&raw)
                        .map_err(|_| ConfigError::InvalidVariable(name, "not an http(s) URL".into()))
                })
                .transpose()
        };

        let index_url = parse_url(INDEX_URL_ENV)?;
        let embedding_url = parse_url(EMBEDDING_URL_ENV)?;
        let llm_url = match parse_url(LLM_URL_ENV)? {
            Some(url) => url,
            None => parse_http_url(DEFAULT_LLM_URL)?,
        };

        Ok(Self {
            index_url,
            index_api_key: read(INDEX_API_KEY_ENV).map(Secret::new),
            llm_url,
            llm_api_key: read(LLM_API_KEY_ENV).map(Secret::new),
            embedding_url,
        })
    }

    /// URL and key of the remote vector index
    #[inline]
    pub fn require_index(&self) -> Result<(&Url, &Secret), ConfigError> {
        let url = self
            .index_url
            .as_ref()
            .ok_or(ConfigError::MissingVariable(INDEX_URL_ENV))?;
        let key = self
            .index_api_key
            .as_ref()
            .ok_or(ConfigError::MissingVariable(INDEX_API_KEY_ENV))?;
        Ok((url, key))
    }

    /// URL and key of the hosted language model
    #[inline]
    pub fn require_llm(&self) -> Result<(&Url, &Secret), ConfigError> {
        let key = self
            .llm_api_key
            .as_ref()
            .ok_or(ConfigError::MissingVariable(LLM_API_KEY_ENV))?;
        Ok((&self.llm_url, key))
    }
}
