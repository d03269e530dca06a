use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Load,
    Embed,
    Index,
    Retrieve,
    Generate,
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Load => "load",
            Self::Embed => "embed",
            Self::Index => "index",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("load: malformed dataset{}: {message}", row_suffix(.row))]
    DataFormat { row: Option<usize>, message: String },

    #[error("embed: {}{cause}", id_prefix(.id))]
    Embedding { id: Option<String>, cause: String },

    #[error("index: upsert failed after {attempts} attempt(s): {cause}")]
    IndexWrite {
        attempts: u32,
        cause: providers::ProviderError,
    },

    #[error("retrieve: query failed after {attempts} attempt(s): {cause}")]
    IndexRead {
        attempts: u32,
        cause: providers::ProviderError,
    },

    #[error("generate: model call failed after {attempts} attempt(s): {cause}")]
    Generation {
        attempts: u32,
        cause: providers::ProviderError,
    },

    #[error("config: {0}")]
    Configuration(String),

    #[error("{0}: cancelled")]
    Cancelled(Stage),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// The stage that produced this error
    #[inline]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::DataFormat { .. } => Some(Stage::Load),
            Self::Embedding { .. } => Some(Stage::Embed),
            Self::IndexWrite { .. } => Some(Stage::Index),
            Self::IndexRead { .. } => Some(Stage::Retrieve),
            Self::Generation { .. } => Some(Stage::Generate),
            Self::Configuration(_) => Some(Stage::Config),
            Self::Cancelled(stage) => Some(*stage),
            Self::Io(_) | Self::Other(_) => None,
        }
    }

    #[inline]
    pub fn data_format(row: Option<usize>, message: impl Into<String>) -> Self {
        Self::DataFormat {
            row,
            message: message.into(),
        }
    }

    #[inline]
    pub fn embedding(id: Option<&str>, cause: impl fmt::Display) -> Self {
        Self::Embedding {
            id: id.map(str::to_string),
            cause: cause.to_string(),
        }
    }
}

#[expect(clippy::ref_option, reason = "called from the thiserror format args")]
fn row_suffix(row: &Option<usize>) -> String {
    row.map(|r| format!(" at row {}", r)).unwrap_or_default()
}

#[expect(clippy::ref_option, reason = "called from the thiserror format args")]
fn id_prefix(id: &Option<String>) -> String {
    id.as_ref()
        .map(|id| format!("record '{}': ", id))
        .unwrap_or_default()
}

pub mod commands;
pub mod config;
pub mod dataset;
pub mod embeddings;
pub mod evaluation;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod pipeline;
pub mod providers;
