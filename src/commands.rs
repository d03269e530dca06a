use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::RagError;
use crate::config::{Config, Credentials, EmbeddingProvider, IndexBackend};
use crate::dataset::load_records;
use crate::embeddings::{Embedder, OllamaClient, embedder_from_config};
use crate::evaluation::{CaseScores, Evaluator, load_cases, render_table};
use crate::index::{IndexManifest, VectorIndex, index_from_config};
use crate::indexer::{BuildReport, BuilderSettings, IndexBuilder};
use crate::llm::language_model_from_config;
use crate::pipeline::{Answer, PipelineSettings, QueryPipeline, Retriever};

const EXIT_WORDS: &[&str] = &["exit", "quit"];

/// Configuration and credentials, loaded once and validated before any remote call
pub struct Environment {
    pub config: Config,
    pub credentials: Credentials,
}

impl Environment {
    #[inline]
    pub fn load() -> Result<Self> {
        let config = Config::load_default().context("Failed to load configuration")?;
        let credentials = Credentials::from_env().context("Failed to read environment")?;
        if config.index.backend == IndexBackend::Remote {
            credentials
                .require_index()
                .map_err(|e| RagError::Configuration(e.to_string()))?;
        }
        Ok(Self {
            config,
            credentials,
        })
    }
}

/// Load the dataset and build the index; the report says whether any record failed
#[inline]
pub async fn build_index(
    env: &Environment,
    dataset: &Path,
    force: bool,
    cancel: CancellationToken,
) -> Result<BuildReport> {
    let records = load_records(dataset, &env.config.dataset)?;
    if records.is_empty() {
        bail!("{} contains no records", dataset.display());
    }

    let embedder = embedder_from_config(&env.config, &env.credentials)?;
    let index = index_from_config(&env.config, &env.credentials)?;
    let builder = IndexBuilder::new(
        embedder,
        index,
        BuilderSettings::from_config(&env.config),
        env.config.retry_policy(),
        cancel,
    );

    let report = builder.build(records, force).await?;
    print!("{}", summarize_report(&report));
    Ok(report)
}

/// Answer a single question and print it
#[inline]
pub async fn ask(env: &Environment, question: String, cancel: CancellationToken) -> Result<()> {
    let pipeline = Arc::new(open_pipeline(env, cancel)?);
    let answer = answer_blocking(pipeline, question).await?;
    print!("{}", format_answer(&answer));
    Ok(())
}

/// Read questions from stdin until `exit`, `quit`, end of input or Ctrl-C.
/// A failed question is reported and the session carries on.
#[inline]
pub async fn interactive_session(env: &Environment, cancel: CancellationToken) -> Result<()> {
    let pipeline = Arc::new(open_pipeline(env, cancel.clone())?);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("🌱 Ask a gardening question (type 'exit' to quit).");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
            break;
        }

        match answer_blocking(Arc::clone(&pipeline), question.to_string()).await {
            Ok(answer) => print!("{}", format_answer(&answer)),
            Err(RagError::Cancelled(_)) => break,
            Err(e) => {
                error!("Question failed: {}", e);
                eprintln!("❌ {}", e);
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

/// Show the manifest, the number of indexed entries and embedding model health
#[inline]
pub async fn show_status(env: &Environment) -> Result<()> {
    let config = &env.config;

    println!("📊 Garden RAG Status");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗂️  Index Manifest:");
    match IndexManifest::load(&config.manifest_path())? {
        Some(manifest) => {
            println!("   Collection: {}", manifest.collection);
            println!(
                "   Model: {} ({} dimensions, {})",
                manifest.embedding_model, manifest.dimension, manifest.metric
            );
            println!("   Records at build: {}", manifest.record_count);
            println!(
                "   Built: {}",
                manifest.built_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => println!("   No index has been built yet. Run 'garden-rag build --dataset <csv>'."),
    }

    println!();
    println!("🔍 Vector Index ({:?}):", config.index.backend);
    match index_from_config(config, &env.credentials) {
        Ok(index) => match tokio::task::spawn_blocking(move || index.count()).await? {
            Ok(count) => println!("   ✅ {} entries in '{}'", count, config.index.collection),
            Err(e) => println!("   ❌ Could not count entries: {}", e),
        },
        Err(e) => println!("   ❌ {}", e),
    }

    println!();
    println!("🤖 Embedding Model:");
    if config.embedding.provider == EmbeddingProvider::Ollama {
        let url = match &env.credentials.embedding_url {
            Some(url) => url.clone(),
            None => config.embedding.embedding_url()?,
        };
        let client = OllamaClient::new(
            &url,
            &config.embedding.model,
            config.embedding.dimension as usize,
            config.request_timeout(),
        );
        let model = config.embedding.model.clone();
        let health = tokio::task::spawn_blocking(move || {
            client.health_check()?;
            client.list_models()
        })
        .await?;
        match health {
            Ok(models) if models.iter().any(|m| m.name == model) => {
                println!("   ✅ Ollama at {} serves {}", url, model);
            }
            Ok(_) => println!(
                "   ⚠️  Ollama at {} is up but '{}' is not pulled (ollama pull {})",
                url, model, model
            ),
            Err(e) => println!("   ❌ Ollama at {}: {}", url, e),
        }
    } else {
        println!(
            "   ✅ Local hashing embedder ({} dimensions)",
            config.embedding.dimension
        );
    }

    Ok(())
}

/// Score answers for every case in `cases_path`.
///
/// Cases without a recorded response are answered live. With `retrieval_only`
/// the retrieved context is scored instead of a generated answer.
#[inline]
pub async fn run_evaluation(
    env: &Environment,
    cases_path: &Path,
    retrieval_only: bool,
    cancel: CancellationToken,
) -> Result<Vec<CaseScores>> {
    let cases = load_cases(cases_path)?;
    if cases.is_empty() {
        bail!("{} contains no evaluation cases", cases_path.display());
    }

    let embedder = embedder_from_config(&env.config, &env.credentials)?;
    let evaluator = Arc::new(Evaluator::new(
        Arc::clone(&embedder),
        env.config.embedding.max_input_tokens,
        env.config.retry_policy(),
        cancel.clone(),
    ));

    // Retrieval-only scoring never calls the language model, so it needs no LLM key
    let retriever = if retrieval_only {
        Some(Arc::new(open_retriever(env, Arc::clone(&embedder), cancel.clone())?))
    } else {
        None
    };
    let pipeline = if !retrieval_only && cases.iter().any(|c| c.response.is_none()) {
        Some(Arc::new(open_pipeline_with(env, embedder, cancel)?))
    } else {
        None
    };

    let mut rows = Vec::with_capacity(cases.len());
    for case in cases {
        info!("Evaluating {}", case.id);
        let retriever = retriever.clone();
        let pipeline = pipeline.clone();
        let evaluator = Arc::clone(&evaluator);

        let scores = tokio::task::spawn_blocking(move || -> Result<CaseScores, RagError> {
            let generated = if let Some(retriever) = &retriever {
                retriever
                    .retrieve(&case.query)?
                    .into_iter()
                    .map(|hit| hit.metadata.text)
                    .collect::<Vec<_>>()
                    .join(" ")
            } else if let Some(response) = &case.response {
                response.clone()
            } else if let Some(pipeline) = &pipeline {
                pipeline.answer(&case.query)?.text
            } else {
                String::new()
            };
            evaluator.score(&case.id, &case.ground_truth, &generated)
        })
        .await??;
        rows.push(scores);
    }

    print!("{}", render_table(&rows));
    Ok(rows)
}

fn open_pipeline(env: &Environment, cancel: CancellationToken) -> Result<QueryPipeline> {
    let embedder = embedder_from_config(&env.config, &env.credentials)?;
    open_pipeline_with(env, embedder, cancel)
}

fn open_pipeline_with(
    env: &Environment,
    embedder: Arc<dyn Embedder>,
    cancel: CancellationToken,
) -> Result<QueryPipeline> {
    let model = language_model_from_config(&env.config, &env.credentials)?;
    let retriever = open_retriever(env, embedder, cancel)?;
    Ok(QueryPipeline::with_retriever(retriever, model))
}

fn open_retriever(
    env: &Environment,
    embedder: Arc<dyn Embedder>,
    cancel: CancellationToken,
) -> Result<Retriever> {
    match IndexManifest::load(&env.config.manifest_path())? {
        Some(manifest) => manifest.check_compatible(
            embedder.model_id(),
            embedder.dimension(),
            env.config.index.metric,
        )?,
        None => warn!("No index manifest found; answers may have no context until you build"),
    }

    let index: Arc<dyn VectorIndex> = index_from_config(&env.config, &env.credentials)?;
    Ok(Retriever::new(
        embedder,
        index,
        PipelineSettings::from_config(&env.config),
        env.config.retry_policy(),
        cancel,
    ))
}

async fn answer_blocking(
    pipeline: Arc<QueryPipeline>,
    question: String,
) -> Result<Answer, RagError> {
    tokio::task::spawn_blocking(move || pipeline.answer(&question))
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("query task failed: {}", e)))?
}

/// Human-readable answer followed by its sources
#[inline]
pub fn format_answer(answer: &Answer) -> String {
    let mut out = String::new();
    if answer.degraded {
        let _ = writeln!(
            out,
            "⚠️  No matching garden records were found; this answer is not grounded in the dataset."
        );
    }
    let _ = writeln!(out, "{}", answer.text);

    if !answer.sources.is_empty() {
        let sources = answer
            .sources
            .iter()
            .map(|s| format!("{} ({:.3})", s.id, s.score))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "\nSources: {}", sources);
    }
    if answer.dropped_context > 0 {
        let _ = writeln!(
            out,
            "({} lower-ranked records left out to fit the context budget)",
            answer.dropped_context
        );
    }
    out
}

/// Build summary with every failed record and its cause
#[inline]
pub fn summarize_report(report: &BuildReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Build finished:");
    let _ = writeln!(out, "  Records: {}", report.total);
    let _ = writeln!(out, "  Indexed: {}", report.indexed);
    let _ = writeln!(out, "  Failed: {}", report.failures.len());
    let _ = writeln!(out, "  Batches: {}", report.batches);
    let _ = writeln!(out, "  Retries: {}", report.retries);

    for failure in &report.failures {
        let _ = writeln!(out, "  ❌ {}: {}", failure.id, failure.error);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;
    use crate::config::{EmbeddingConfig, IndexConfig};
    use crate::indexer::RecordFailure;
    use crate::pipeline::SourceRef;
    use tempfile::TempDir;

    fn offline_environment(dir: &Path) -> Environment {
        Environment {
            config: Config {
                embedding: EmbeddingConfig {
                    provider: EmbeddingProvider::Hashing,
                    dimension: 256,
                    ..EmbeddingConfig::default()
                },
                index: IndexConfig {
                    backend: IndexBackend::Local,
                    ..IndexConfig::default()
                },
                base_dir: dir.to_path_buf(),
                ..Config::default()
            },
            credentials: Credentials::from_lookup(|_| None).expect("empty environment"),
        }
    }

    fn answer() -> Answer {
        Answer {
            text: "Water less often.".to_string(),
            sources: vec![
                SourceRef {
                    id: "overwatering".to_string(),
                    score: 0.8123,
                },
                SourceRef {
                    id: "ferns".to_string(),
                    score: 0.1,
                },
            ],
            degraded: false,
            retries: 0,
            dropped_context: 0,
        }
    }

    #[test]
    fn answer_lists_sources() {
        let text = format_answer(&answer());
        assert!(text.starts_with("Water less often."));
        assert!(text.contains("Sources: overwatering (0.812), ferns (0.100)"));
        assert!(!text.contains("not grounded"));
    }

    #[test]
    fn degraded_answer_is_flagged() {
        let degraded = Answer {
            sources: Vec::new(),
            degraded: true,
            dropped_context: 0,
            ..answer()
        };
        let text = format_answer(&degraded);
        assert!(text.contains("not grounded"));
        assert!(!text.contains("Sources"));
    }

    #[test]
    fn dropped_context_is_mentioned() {
        let trimmed = Answer {
            dropped_context: 2,
            ..answer()
        };
        assert!(format_answer(&trimmed).contains("2 lower-ranked records"));
    }

    #[test]
    fn report_lists_failures() {
        let report = BuildReport {
            total: 3,
            indexed: 2,
            failures: vec![RecordFailure {
                id: "r9".to_string(),
                error: RagError::Cancelled(Stage::Embed),
            }],
            batches: 1,
            retries: 1,
        };

        let summary = summarize_report(&report);
        assert!(summary.contains("Indexed: 2"));
        assert!(summary.contains("Failed: 1"));
        assert!(summary.contains("r9: embed: cancelled"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retrieval_evaluation_needs_no_model_key() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let env = offline_environment(temp_dir.path());

        let dataset = temp_dir.path().join("garden.csv");
        std::fs::write(
            &dataset,
            "id,text\noverwatering,overwatering causes yellow leaves\nferns,ferns prefer humidity\n",
        )
        .expect("write dataset");
        let report = build_index(&env, &dataset, false, CancellationToken::new())
            .await
            .expect("offline build should succeed");
        assert_eq!(report.indexed, 2);

        let cases = temp_dir.path().join("cases.json");
        std::fs::write(
            &cases,
            r#"[{"id": "q1", "query": "why are my plant leaves yellow?", "ground_truth": ["Overwatering causes yellow leaves."]}]"#,
        )
        .expect("write cases");

        let rows = run_evaluation(&env, &cases, true, CancellationToken::new())
            .await
            .expect("retrieval-only evaluation should not need an LLM key");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "q1");
        assert!(rows[0].coverage > 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_answers_still_need_a_model_key() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let env = offline_environment(temp_dir.path());

        let cases = temp_dir.path().join("cases.json");
        std::fs::write(
            &cases,
            r#"[{"id": "q1", "query": "why are my plant leaves yellow?", "ground_truth": ["Overwatering."]}]"#,
        )
        .expect("write cases");

        let error = run_evaluation(&env, &cases, false, CancellationToken::new())
            .await
            .expect_err("generating answers needs a key");
        assert!(error.to_string().contains("GARDEN_RAG_LLM_API_KEY"));
    }
}
