
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::index::Metric;
use crate::providers::RetryPolicy;

pub const CONFIG_DIR_ENV: &str = "GARDEN_RAG_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Remote Ollama server
    Ollama,
    /// Deterministic in-process feature hashing
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub url: String,
    pub dimension: u32,
    /// Inputs longer than this (estimated tokens) are truncated before embedding
    pub max_input_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            model: "nomic-embed-text:latest".to_string(),
            url: "http://localhost:11434".to_string(),
            dimension: 768,
            max_input_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Milvus / Zilliz Cloud REST endpoint
    Remote,
    /// JSON snapshot in the data directory
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub collection: String,
    pub metric: Metric,
    pub batch_size: u32,
    pub workers: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Remote,
            collection: "garden_knowledge".to_string(),
            metric: Metric::Cosine,
            batch_size: 32,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: u32,
    pub min_score: f32,
    pub max_context_tokens: usize,
    pub dedupe_context: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
            max_context_tokens: 2000,
            dedupe_context: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatasetConfig {
    pub id_column: String,
    pub text_column: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            text_column: "text".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 8 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max input tokens: {0} (must be between 16 and 32768)")]
    InvalidMaxInputTokens(usize),
    #[error(
        "Invalid collection name: {0} (letters, digits and underscores, not starting with a digit)"
    )]
    InvalidCollection(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid worker count: {0} (must be between 1 and 64)")]
    InvalidWorkers(u32),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(u32),
    #[error("Invalid min_score: {0} (must be a finite number)")]
    InvalidMinScore(f32),
    #[error("Invalid max context tokens: {0} (must be between 64 and 128000)")]
    InvalidMaxContextTokens(usize),
    #[error("Invalid temperature: {0} (must be between 0 and 2)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and 32768)")]
    InvalidMaxTokens(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid max retries: {0} (must be 10 or less)")]
    InvalidMaxRetries(u32),
    #[error("Invalid backoff base: {0} (must be between 1 and 60000 milliseconds)")]
    InvalidBackoff(u64),
    #[error("Invalid column name for {0} (cannot be empty)")]
    InvalidColumn(&'static str),
    #[error("Missing environment variable {0}")]
    MissingVariable(&'static str),
    #[error("Invalid value in environment variable {0}: {1}")]
    InvalidVariable(&'static str, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `config.toml` from `config_dir`, falling back to defaults when absent
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the default directory (see [`Config::default_dir`])
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::default_dir()?;
        Self::load(dir)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// `$GARDEN_RAG_CONFIG_DIR`, or `garden-rag` under the platform config dir
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        dirs::config_dir()
            .map(|dir| dir.join("garden-rag"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.index.validate()?;
        self.retrieval.validate()?;
        self.generation.validate()?;
        self.network.validate()?;
        self.dataset.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Where the manifest for the configured collection is kept
    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.get_base_dir()
            .join("manifests")
            .join(format!("{}.toml", self.index.collection))
    }

    /// Snapshot file used by the local index backend
    #[inline]
    pub fn local_index_path(&self) -> PathBuf {
        self.get_base_dir()
            .join("index")
            .join(format!("{}.json", self.index.collection))
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.network.max_retries + 1,
            Duration::from_millis(self.network.backoff_base_ms),
        )
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.provider == EmbeddingProvider::Ollama {
            self.embedding_url()?;
        }

        if !(8..=8192).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if !(16..=32768).contains(&self.max_input_tokens) {
            return Err(ConfigError::InvalidMaxInputTokens(self.max_input_tokens));
        }

        Ok(())
    }

    pub fn embedding_url(&self) -> Result<Url, ConfigError> {
        parse_http_url(&self.url)
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_collection_name(&self.collection) {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=64).contains(&self.workers) {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }

        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_collection(&mut self, collection: String) -> Result<(), ConfigError> {
        if !is_valid_collection_name(&collection) {
            return Err(ConfigError::InvalidCollection(collection));
        }
        self.collection = collection;
        Ok(())
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !self.min_score.is_finite() {
            return Err(ConfigError::InvalidMinScore(self.min_score));
        }

        if !(64..=128_000).contains(&self.max_context_tokens) {
            return Err(ConfigError::InvalidMaxContextTokens(
                self.max_context_tokens,
            ));
        }

        Ok(())
    }

    pub fn set_top_k(&mut self, top_k: u32) -> Result<(), ConfigError> {
        if !(1..=100).contains(&top_k) {
            return Err(ConfigError::InvalidTopK(top_k));
        }
        self.top_k = top_k;
        Ok(())
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=32768).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if self.max_retries > 10 {
            return Err(ConfigError::InvalidMaxRetries(self.max_retries));
        }

        if !(1..=60_000).contains(&self.backoff_base_ms) {
            return Err(ConfigError::InvalidBackoff(self.backoff_base_ms));
        }

        Ok(())
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_column.trim().is_empty() {
            return Err(ConfigError::InvalidColumn("id_column"));
        }
        if self.text_column.trim().is_empty() {
            return Err(ConfigError::InvalidColumn("text_column"));
        }
        Ok(())
    }
}

/// Parse an http(s) URL, rejecting other schemes
#[inline]
pub fn parse_http_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(raw.to_string()));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

fn is_valid_collection_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 255
}
