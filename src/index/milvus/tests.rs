use super::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn index_for(server: &MockServer) -> MilvusIndex {
    let url = Url::parse(&server.uri()).expect("mock server uri");
    MilvusIndex::new(
        &url,
        Secret::new("test-key".to_string()),
        "garden_knowledge",
        Duration::from_secs(5),
    )
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task should not panic")
}

#[test]
fn code_classification() {
    assert_eq!(classify_code(80001, "invalid token").kind, FailureKind::Auth);
    assert_eq!(
        classify_code(65535, "rate limit exceeded").kind,
        FailureKind::RateLimited
    );
    assert_eq!(
        classify_code(65535, "service not ready").kind,
        FailureKind::Server
    );
    let error = classify_code(1100, "collection not found");
    assert_eq!(error.kind, FailureKind::InvalidRequest);
    assert!(error.message.contains("1100"));
}

#[tokio::test(flavor = "multi_thread")]
async fn creates_missing_collection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"has": false}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/create"))
        .and(body_partial_json(json!({
            "collectionName": "garden_knowledge",
            "dimension": 4,
            "metricType": "COSINE",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let index = index_for(&server);
    blocking(move || index.ensure_collection(4, Metric::Cosine))
        .await
        .expect("collection should be created");
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_collection_is_left_alone() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"has": true}})),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
        .expect(0)
        .mount(&server)
        .await;

    let index = index_for(&server);
    blocking(move || index.ensure_collection(4, Metric::Dot))
        .await
        .expect("existing collection is fine");
}

#[tokio::test(flavor = "multi_thread")]
async fn upsert_sends_rows() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/upsert"))
        .and(body_partial_json(json!({
            "collectionName": "garden_knowledge",
            "data": [{"id": "r1", "text": "Water deeply", "fields": {"plant": "tomato"}}],
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 0, "data": {"upsertCount": 1}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let index = index_for(&server);
    let entry = IndexEntry {
        id: "r1".to_string(),
        vector: vec![0.5, 0.5],
        metadata: EntryMetadata {
            text: "Water deeply".to_string(),
            fields: BTreeMap::from([("plant".to_string(), "tomato".to_string())]),
        },
    };
    blocking(move || index.upsert(&[entry]))
        .await
        .expect("upsert should succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn search_returns_ranked_hits() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/search"))
        .and(body_partial_json(json!({"limit": 2, "annsField": "vector"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [
                {"id": "b", "distance": 0.4, "text": "Succulents need sun"},
                {"id": "a", "distance": 0.9, "text": "Overwatering yellows leaves", "fields": {"topic": "water"}},
            ],
        })))
        .mount(&server)
        .await;

    let index = index_for(&server);
    let hits = blocking(move || index.query(&[1.0, 0.0], 2, Metric::Cosine))
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "a");
    assert!((hits[0].score - 0.9).abs() < 1e-6);
    assert_eq!(hits[0].metadata.fields.get("topic").map(String::as_str), Some("water"));
    assert_eq!(hits[1].metadata.text, "Succulents need sun");
}

#[tokio::test(flavor = "multi_thread")]
async fn non_zero_code_is_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 80001,
            "message": "invalid token",
        })))
        .mount(&server)
        .await;

    let index = index_for(&server);
    let error = blocking(move || index.query(&[1.0], 1, Metric::Cosine))
        .await
        .expect_err("non-zero code should fail");
    assert_eq!(error.kind, FailureKind::Auth);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/upsert"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let index = index_for(&server);
    let entry = IndexEntry {
        id: "r1".to_string(),
        vector: vec![1.0],
        metadata: EntryMetadata::default(),
    };
    let error = blocking(move || index.upsert(&[entry]))
        .await
        .expect_err("503 should fail");
    assert_eq!(error.kind, FailureKind::Server);
    assert!(error.is_transient());
}

#[tokio::test(flavor = "multi_thread")]
async fn count_reads_aggregate() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 0, "data": [{"count(*)": 42}]})),
        )
        .mount(&server)
        .await;

    let index = index_for(&server);
    let count = blocking(move || index.count())
        .await
        .expect("count should succeed");
    assert_eq!(count, 42);
}

#[tokio::test(flavor = "multi_thread")]
async fn recreate_drops_then_creates() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"has": true}})),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/drop"))
        .and(body_partial_json(json!({"collectionName": "garden_knowledge"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/create"))
        .and(body_partial_json(json!({
            "collectionName": "garden_knowledge",
            "dimension": 8,
            "metricType": "IP",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let index = index_for(&server);
    blocking(move || index.recreate_collection(8, Metric::Dot))
        .await
        .expect("collection should be replaced");
}
