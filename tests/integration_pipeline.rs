#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end: CSV dataset → local index → question answered through a mocked
// OpenAI-compatible endpoint

use std::sync::Arc;
use std::time::Duration;

use garden_rag::Stage;
use garden_rag::RagError;
use garden_rag::config::{GenerationConfig, Secret};
use garden_rag::dataset::read_records;
use garden_rag::config::DatasetConfig;
use garden_rag::embeddings::HashingEmbedder;
use garden_rag::index::{MemoryIndex, Metric, VectorIndex};
use garden_rag::indexer::{BuilderSettings, IndexBuilder};
use garden_rag::llm::ChatCompletionsClient;
use garden_rag::pipeline::{Answer, PipelineSettings, QueryPipeline};
use garden_rag::providers::RetryPolicy;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMENSION: usize = 256;

const DATASET: &str = "\
id,text,plant
overwatering,\"Yellow leaves are usually a sign of overwatering. Let the soil dry out between waterings.\",houseplants
succulents,\"Succulents need bright light and sandy, fast-draining soil.\",succulent
ferns,\"Ferns prefer shade, high humidity and evenly moist soil.\",fern
";

const SHORT_DATASET: &str = "\
id,text
overwatering,overwatering causes yellow leaves
succulents,succulents need full sun
ferns,ferns prefer humidity
";

const QUESTION: &str = "why are my plant leaves yellow?";

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10))
}

async fn build_garden_index(dir: &TempDir) -> Arc<MemoryIndex> {
    build_index_from(dir, DATASET).await
}

async fn build_index_from(dir: &TempDir, dataset: &str) -> Arc<MemoryIndex> {
    let records = read_records(dataset.as_bytes(), &DatasetConfig::default())
        .expect("dataset should load");
    assert_eq!(records.len(), 3);

    let index = Arc::new(
        MemoryIndex::persistent(dir.path().join("index.json")).expect("index should open"),
    );
    let builder = IndexBuilder::new(
        Arc::new(HashingEmbedder::new(DIMENSION)),
        Arc::clone(&index) as Arc<dyn VectorIndex>,
        BuilderSettings {
            batch_size: 2,
            workers: 2,
            metric: Metric::Cosine,
            max_input_tokens: 512,
            collection: "garden_e2e".to_string(),
            manifest_path: Some(dir.path().join("manifest.toml")),
        },
        policy(),
        CancellationToken::new(),
    );

    let report = builder.build(records, false).await.expect("build should run");
    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(report.indexed, 3);
    index
}

fn pipeline_for(server: &MockServer, index: Arc<MemoryIndex>) -> Arc<QueryPipeline> {
    let url = Url::parse(&format!("{}/v1", server.uri())).expect("mock server uri");
    let model = ChatCompletionsClient::new(
        &url,
        Secret::new("sk-e2e".to_string()),
        &GenerationConfig::default(),
        Duration::from_secs(1),
    );

    Arc::new(QueryPipeline::new(
        Arc::new(HashingEmbedder::new(DIMENSION)),
        index,
        Arc::new(model),
        PipelineSettings {
            top_k: 3,
            min_score: 0.0,
            max_context_tokens: 2000,
            dedupe_context: true,
            metric: Metric::Cosine,
            max_input_tokens: 512,
        },
        policy(),
        CancellationToken::new(),
    ))
}

async fn answer(pipeline: Arc<QueryPipeline>) -> Result<Answer, RagError> {
    tokio::task::spawn_blocking(move || pipeline.answer(QUESTION))
        .await
        .expect("pipeline task should not panic")
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
    }))
}

#[tokio::test(flavor = "multi_thread")]
async fn overwatering_answer_is_grounded() {
    init_test_tracing();
    let dir = TempDir::new().expect("should create temp dir");
    let index = build_garden_index(&dir).await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("sign of overwatering"))
        .respond_with(completion(
            "  Yellow leaves usually mean overwatering; water less often and let the soil dry.\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let answer = answer(pipeline_for(&server, index)).await.expect("should answer");

    assert_eq!(answer.sources[0].id, "overwatering");
    assert!(!answer.degraded);
    assert_eq!(answer.retries, 0);
    assert!(answer.text.contains("water"));
    assert!(!answer.text.ends_with('\n'));
}

#[tokio::test(flavor = "multi_thread")]
async fn short_records_rank_overwatering_first() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = build_index_from(&dir, SHORT_DATASET).await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("overwatering causes yellow leaves"))
        .respond_with(completion(
            "Yellow leaves point to overwatering, so water less often.",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let answer = answer(pipeline_for(&server, index)).await.expect("should answer");

    assert_eq!(answer.sources[0].id, "overwatering");
    assert!(!answer.degraded);
    assert!(answer.text.contains("water"));
}

#[tokio::test(flavor = "multi_thread")]
async fn model_timeout_is_retried() {
    init_test_tracing();
    let dir = TempDir::new().expect("should create temp dir");
    let index = build_garden_index(&dir).await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion("too late").set_delay(Duration::from_secs(3)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion("Water less often."))
        .mount(&server)
        .await;

    let answer = answer(pipeline_for(&server, index))
        .await
        .expect("retry should recover");

    assert_eq!(answer.retries, 1);
    assert_eq!(answer.text, "Water less often.");
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_key_fails_without_retry() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = build_garden_index(&dir).await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let error = answer(pipeline_for(&server, index))
        .await
        .expect_err("401 should surface");

    assert_eq!(error.stage(), Some(Stage::Generate));
    assert!(matches!(error, RagError::Generation { attempts: 1, .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_index_still_answers() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = Arc::new(
        MemoryIndex::persistent(dir.path().join("empty.json")).expect("index should open"),
    );
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("No relevant context"))
        .respond_with(completion("Generally, check watering first."))
        .expect(1)
        .mount(&server)
        .await;

    let answer = answer(pipeline_for(&server, index)).await.expect("should answer");
    assert!(answer.degraded);
    assert!(answer.sources.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn persisted_index_is_reused() {
    let dir = TempDir::new().expect("should create temp dir");
    drop(build_garden_index(&dir).await);

    let reopened =
        MemoryIndex::persistent(dir.path().join("index.json")).expect("index should reopen");
    assert_eq!(reopened.count().expect("count"), 3);

    let larger_k = reopened
        .query(
            &HashingEmbedder::new(DIMENSION).embed_text(QUESTION),
            3,
            Metric::Cosine,
        )
        .expect("query");
    let smaller_k = reopened
        .query(
            &HashingEmbedder::new(DIMENSION).embed_text(QUESTION),
            1,
            Metric::Cosine,
        )
        .expect("query");
    assert_eq!(larger_k[0].id, smaller_k[0].id);
    assert_eq!(smaller_k[0].id, "overwatering");
}
