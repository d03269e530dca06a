// Configuration management module
// Tunables live in config.toml; endpoints and API keys come from the environment

pub mod credentials;
pub mod interactive;
pub mod settings;

pub use credentials::{Credentials, Secret};
pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, DatasetConfig, EmbeddingConfig, EmbeddingProvider, GenerationConfig,
    IndexBackend, IndexConfig, NetworkConfig, RetrievalConfig,
};
