use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use garden_rag::commands::{
    Environment, ask, build_index, interactive_session, run_evaluation, show_status,
};
use garden_rag::config::{run_interactive_config, show_config};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "garden-rag")]
#[command(about = "Answer home gardening questions from an indexed gardening dataset")]
#[command(version)]
struct Cli {
    /// Without a subcommand, start an interactive question session
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding model, vector index and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Load a CSV dataset and build the vector index from it
    Build {
        /// Path to the merged gardening CSV
        #[arg(long)]
        dataset: PathBuf,
        /// Rebuild even if the existing index used a different model or metric
        #[arg(long)]
        force: bool,
    },
    /// Answer a single question
    Ask {
        /// The question to answer
        question: String,
    },
    /// Show the index manifest, entry count and model health
    Status,
    /// Score answers against gold answers from a JSON file of cases
    Eval {
        /// JSON array of {id, query, ground_truth, response?}
        cases: PathBuf,
        /// Score the retrieved context instead of a generated answer
        #[arg(long)]
        retrieval: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; the real environment still applies
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling in-flight work");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<ExitCode> {
    match cli.command {
        Some(Commands::Config { show }) => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Some(Commands::Build { dataset, force }) => {
            let env = Environment::load()?;
            let report = build_index(&env, &dataset, force, cancel).await?;
            if !report.is_complete() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Some(Commands::Ask { question }) => {
            let env = Environment::load()?;
            ask(&env, question, cancel).await?;
        }
        Some(Commands::Status) => {
            let env = Environment::load()?;
            show_status(&env).await?;
        }
        Some(Commands::Eval { cases, retrieval }) => {
            let env = Environment::load()?;
            run_evaluation(&env, &cases, retrieval, cancel).await?;
        }
        None => {
            let env = Environment::load()?;
            interactive_session(&env, cancel).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
