use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::credentials::{INDEX_API_KEY_ENV, INDEX_URL_ENV, LLM_API_KEY_ENV};
use super::{Config, ConfigError, Credentials, EmbeddingConfig, EmbeddingProvider, IndexBackend};
use crate::index::Metric;

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🌱 Garden RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Embedding Model").bold().yellow());
    eprintln!("Choose how dataset rows and questions are turned into vectors.");
    eprintln!();
    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Vector Index").bold().yellow());
    configure_index(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Retrieval & Generation").bold().yellow());
    configure_retrieval(&mut config)?;

    if config.embedding.provider == EmbeddingProvider::Ollama {
        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        if test_ollama_connection(&config.embedding)? {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but make sure Ollama is running before building.");
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;
    let credentials = Credentials::from_env().context("Failed to read environment")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    eprintln!(
        "  Provider: {}",
        style(format!("{:?}", config.embedding.provider)).cyan()
    );
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    if config.embedding.provider == EmbeddingProvider::Ollama {
        let url = credentials
            .embedding_url
            .as_ref()
            .map_or_else(|| config.embedding.url.clone(), ToString::to_string);
        eprintln!("  URL: {}", style(url).cyan());
    }
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    eprintln!(
        "  Max input tokens: {}",
        style(config.embedding.max_input_tokens).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Index:").bold().yellow());
    eprintln!(
        "  Backend: {}",
        style(format!("{:?}", config.index.backend)).cyan()
    );
    eprintln!("  Collection: {}", style(&config.index.collection).cyan());
    eprintln!("  Metric: {}", style(config.index.metric).cyan());
    eprintln!("  Batch size: {}", style(config.index.batch_size).cyan());
    eprintln!("  Workers: {}", style(config.index.workers).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!("  Min score: {}", style(config.retrieval.min_score).cyan());
    eprintln!(
        "  Max context tokens: {}",
        style(config.retrieval.max_context_tokens).cyan()
    );
    eprintln!(
        "  Dedupe context: {}",
        style(config.retrieval.dedupe_context).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Generation:").bold().yellow());
    eprintln!("  Model: {}", style(&config.generation.model).cyan());
    eprintln!("  URL: {}", style(&credentials.llm_url).cyan());

    eprintln!();
    eprintln!("{}", style("Environment:").bold().yellow());
    print_presence(INDEX_URL_ENV, credentials.index_url.is_some());
    print_presence(INDEX_API_KEY_ENV, credentials.index_api_key.is_some());
    print_presence(LLM_API_KEY_ENV, credentials.llm_api_key.is_some());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn print_presence(name: &str, present: bool) {
    let state = if present {
        style("set").green()
    } else {
        style("not set").red()
    };
    eprintln!("  {}: {}", name, state);
}

fn load_existing_config() -> Result<Config> {
    let dir = Config::default_dir()?;
    Config::load(&dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: dir.clone(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let providers = &["ollama", "hashing (offline)"];
    let default_index = usize::from(embedding.provider == EmbeddingProvider::Hashing);

    let provider_index = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(providers)
        .interact()?;

    embedding.provider = if provider_index == 0 {
        EmbeddingProvider::Ollama
    } else {
        EmbeddingProvider::Hashing
    };

    if embedding.provider == EmbeddingProvider::Ollama {
        let url: String = Input::new()
            .with_prompt("Ollama URL")
            .default(embedding.url.clone())
            .validate_with(|input: &String| -> Result<(), ConfigError> {
                super::settings::parse_http_url(input).map(|_| ())
            })
            .interact_text()?;
        embedding.url = url;
    }

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (8..=8192).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 8 and 8192")
            }
        })
        .interact_text()?;

    embedding.model = model;
    embedding.dimension = dimension;
    embedding.validate()?;

    Ok(())
}

fn configure_index(config: &mut Config) -> Result<()> {
    let backends = &["remote (Milvus / Zilliz Cloud)", "local file"];
    let default_index = usize::from(config.index.backend == IndexBackend::Local);

    let backend_index = Select::new()
        .with_prompt("Index backend")
        .default(default_index)
        .items(backends)
        .interact()?;

    config.index.backend = if backend_index == 0 {
        IndexBackend::Remote
    } else {
        IndexBackend::Local
    };

    let collection: String = Input::new()
        .with_prompt("Collection name")
        .default(config.index.collection.clone())
        .interact_text()?;
    config.index.set_collection(collection)?;

    let metrics = &["cosine", "dot"];
    let metric_index = Select::new()
        .with_prompt("Similarity metric")
        .default(usize::from(config.index.metric == Metric::Dot))
        .items(metrics)
        .interact()?;
    config.index.metric = if metric_index == 0 {
        Metric::Cosine
    } else {
        Metric::Dot
    };

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for index building")
        .default(config.index.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    config.index.set_batch_size(batch_size)?;

    if config.index.backend == IndexBackend::Remote {
        eprintln!(
            "Set {} and {} in the environment (or a .env file) before building.",
            style(INDEX_URL_ENV).cyan(),
            style(INDEX_API_KEY_ENV).cyan()
        );
    }

    Ok(())
}

fn configure_retrieval(config: &mut Config) -> Result<()> {
    let top_k: u32 = Input::new()
        .with_prompt("Number of records to retrieve per question (top K)")
        .default(config.retrieval.top_k)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=100).contains(input) {
                Ok(())
            } else {
                Err("Top K must be between 1 and 100")
            }
        })
        .interact_text()?;
    config.retrieval.set_top_k(top_k)?;

    let model: String = Input::new()
        .with_prompt("Language model")
        .default(config.generation.model.clone())
        .interact_text()?;
    config.generation.set_model(model)?;

    Ok(())
}

fn test_ollama_connection(embedding: &EmbeddingConfig) -> Result<bool> {
    let url = embedding
        .embedding_url()?
        .join("/api/version")
        .context("Failed to build version URL")?;

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(url.as_str()).call() {
        Ok(_) => Ok(true),
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => Ok(true),
        Err(_) => Ok(false),
    }
}
