use std::collections::HashMap;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::providers::{FailureKind, ProviderError};

/// Maps known sentences to hand-picked vectors
struct LookupEmbedder {
    vectors: HashMap<&'static str, Vec<f32>>,
}

impl LookupEmbedder {
    fn new() -> Self {
        Self {
            vectors: HashMap::from([
                ("Water deeply", vec![1.0, 0.0]),
                ("Mulch the beds", vec![0.0, 1.0]),
                ("Use compost", vec![1.0, 1.0]),
                ("Water deeply. Mulch the beds", vec![1.0, 1.0]),
            ]),
        }
    }
}

impl Embedder for LookupEmbedder {
    fn model_id(&self) -> &str {
        "lookup"
    }

    fn dimension(&self) -> usize {
        2
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts
            .iter()
            .map(|text| {
                self.vectors.get(text.as_str()).cloned().ok_or_else(|| {
                    ProviderError::new(FailureKind::InvalidRequest, format!("unknown: {}", text))
                })
            })
            .collect()
    }
}

fn evaluator() -> Evaluator {
    Evaluator::new(
        Arc::new(LookupEmbedder::new()),
        512,
        RetryPolicy::new(1, Duration::from_millis(1)),
        CancellationToken::new(),
    )
}

fn spans(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

#[test]
fn coverage_averages_over_gold_spans() {
    let evaluator = evaluator();

    let exact = evaluator
        .semantic_coverage(&spans(&["Water deeply"]), "Water deeply")
        .expect("should score");
    assert!(close(exact, 1.0));

    let mixed = evaluator
        .semantic_coverage(&spans(&["Water deeply", "Mulch the beds"]), "Water deeply")
        .expect("should score");
    assert!(close(mixed, 0.5));
}

#[test]
fn empty_gold_scores_zero() {
    let evaluator = evaluator();
    assert!(close(
        evaluator
            .semantic_coverage(&[], "Water deeply")
            .expect("should score"),
        0.0
    ));
    assert!(close(
        evaluator
            .partial_correctness(&[], "Water deeply")
            .expect("should score"),
        0.0
    ));
}

#[test]
fn bertscore_uses_sentence_matching() {
    let evaluator = evaluator();

    // gold rows [1,0] and [0,1] against one generated sentence [1,0]:
    // precision = (1 + 0) / 2, recall = 1
    let score = evaluator
        .bertscore_f1("Water deeply. Mulch the beds", "Water deeply")
        .expect("should score");
    assert!(close(score, 2.0 / 3.0));

    let none = evaluator
        .bertscore_f1("Water deeply", "   ")
        .expect("should score");
    assert!(close(none, 0.0));
}

#[test]
fn partial_correctness_takes_best_sentence_per_span() {
    let evaluator = evaluator();

    let score = evaluator
        .partial_correctness(
            &spans(&["Water deeply", "Mulch the beds"]),
            "Water deeply. Use compost",
        )
        .expect("should score");
    let expected = f32::midpoint(1.0, std::f32::consts::FRAC_1_SQRT_2);
    assert!(close(score, expected));
}

#[test]
fn partial_correctness_without_sentences_falls_back_to_coverage() {
    let evaluator = evaluator();
    let score = evaluator
        .partial_correctness(&spans(&["Water deeply"]), " \n ")
        .expect("blank generated text scores zero");
    assert!(close(score, 0.0));
}

#[test]
fn score_combines_all_metrics() {
    let evaluator = evaluator();
    let scores = evaluator
        .score("Q1", &spans(&["Water deeply"]), "Water deeply")
        .expect("should score");

    assert_eq!(scores.id, "Q1");
    assert!(close(scores.coverage, 1.0));
    assert!(close(scores.bert_f1, 1.0));
    assert!(close(scores.partial, 1.0));
}

#[test]
fn load_cases_with_optional_response() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("cases.json");
    std::fs::write(
        &path,
        r#"[
            {"id": "Q1", "query": "How do I water?", "ground_truth": ["Water deeply"], "response": "Water deeply"},
            {"id": "Q2", "query": "Should I mulch?", "ground_truth": ["Mulch the beds"]}
        ]"#,
    )
    .expect("should write cases");

    let cases = load_cases(&path).expect("cases should load");
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].response.as_deref(), Some("Water deeply"));
    assert!(cases[1].response.is_none());
}

#[test]
fn invalid_cases_file_is_data_format_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("cases.json");
    std::fs::write(&path, r#"[{"id": "Q1"}]"#).expect("should write cases");

    assert!(matches!(
        load_cases(&path),
        Err(RagError::DataFormat { .. })
    ));
}

#[test]
fn table_lists_rows_and_average() {
    let rows = vec![
        CaseScores {
            id: "Q1".to_string(),
            coverage: 0.5,
            bert_f1: 0.25,
            partial: 1.0,
        },
        CaseScores {
            id: "Q2".to_string(),
            coverage: 1.0,
            bert_f1: 0.75,
            partial: 0.0,
        },
    ];

    let table = render_table(&rows);
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with("QueryID"));
    assert!(lines[2].starts_with("Q1"));
    assert!(lines[5].contains("0.750"));
    assert!(lines[5].contains("0.500"));
    assert!(lines[5].starts_with("AVERAGE"));
}
