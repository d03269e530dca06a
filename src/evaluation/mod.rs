// Evaluation harness
// Scores generated answers against gold answers with embedding similarity

pub mod metrics;

#[cfg(test)]
mod tests;

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::RagError;
use crate::embeddings::{
    Embedder, embed_with_retry, normalize_whitespace, split_sentences, truncate_to_tokens,
};
use crate::providers::RetryPolicy;

use metrics::{column_maxima, cosine_matrix, f1, mean, row_maxima};

/// One evaluation question with its gold answer spans
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EvalCase {
    pub id: String,
    pub query: String,
    pub ground_truth: Vec<String>,
    /// A pre-recorded answer; when absent the pipeline answers live
    #[serde(default)]
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseScores {
    pub id: String,
    pub coverage: f32,
    pub bert_f1: f32,
    pub partial: f32,
}

#[inline]
pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>, RagError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::data_format(None, format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        RagError::data_format(
            None,
            format!("invalid evaluation cases in {}: {}", path.display(), e),
        )
    })
}

pub struct Evaluator {
    embedder: Arc<dyn Embedder>,
    max_input_tokens: usize,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Evaluator {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        max_input_tokens: usize,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            embedder,
            max_input_tokens,
            policy,
            cancel,
        }
    }

    /// Embed texts in one call. Blank texts get a zero vector rather than an error.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        let prepared: Vec<String> = texts
            .iter()
            .map(|text| {
                truncate_to_tokens(&normalize_whitespace(text), self.max_input_tokens).into_owned()
            })
            .collect();
        let non_blank: Vec<String> = prepared
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect();

        let vectors = if non_blank.is_empty() {
            Vec::new()
        } else {
            embed_with_retry(
                self.embedder.as_ref(),
                &non_blank,
                &self.policy,
                &self.cancel,
            )?
            .value
        };
        let mut embedded = vectors.into_iter();

        let dimension = self.embedder.dimension();
        Ok(prepared
            .iter()
            .map(|text| {
                if text.is_empty() {
                    vec![0.0; dimension]
                } else {
                    embedded.next().unwrap_or_else(|| vec![0.0; dimension])
                }
            })
            .collect())
    }

    /// Mean similarity between each gold span and the whole generated text
    #[inline]
    pub fn semantic_coverage(
        &self,
        gold_spans: &[String],
        generated: &str,
    ) -> Result<f32, RagError> {
        if gold_spans.is_empty() {
            return Ok(0.0);
        }
        let generated = self.embed(&[generated])?;
        let gold: Vec<&str> = gold_spans.iter().map(String::as_str).collect();
        let gold = self.embed(&gold)?;

        let sims: Vec<f32> = cosine_matrix(&gold, &generated)
            .into_iter()
            .flatten()
            .collect();
        Ok(mean(&sims))
    }

    /// Sentence-level greedy matching F1 between gold and generated text
    #[inline]
    pub fn bertscore_f1(&self, gold_text: &str, generated: &str) -> Result<f32, RagError> {
        let gold_sentences = split_sentences(gold_text);
        let generated_sentences = split_sentences(generated);
        if gold_sentences.is_empty() || generated_sentences.is_empty() {
            return Ok(0.0);
        }

        let gold = self.embed(&gold_sentences)?;
        let generated = self.embed(&generated_sentences)?;
        let sims = cosine_matrix(&gold, &generated);

        let precision = mean(&row_maxima(&sims));
        let recall = mean(&column_maxima(&sims));
        Ok(f1(precision, recall))
    }

    /// Mean over gold spans of the best-matching generated sentence
    #[inline]
    pub fn partial_correctness(
        &self,
        gold_spans: &[String],
        generated: &str,
    ) -> Result<f32, RagError> {
        if gold_spans.is_empty() {
            return Ok(0.0);
        }
        let generated_sentences = split_sentences(generated);
        if generated_sentences.is_empty() {
            return self.semantic_coverage(gold_spans, generated);
        }

        let gold: Vec<&str> = gold_spans.iter().map(String::as_str).collect();
        let gold = self.embed(&gold)?;
        let generated = self.embed(&generated_sentences)?;
        Ok(mean(&row_maxima(&cosine_matrix(&gold, &generated))))
    }

    #[inline]
    pub fn score(
        &self,
        case_id: &str,
        gold_spans: &[String],
        generated: &str,
    ) -> Result<CaseScores, RagError> {
        Ok(CaseScores {
            id: case_id.to_string(),
            coverage: self.semantic_coverage(gold_spans, generated)?,
            bert_f1: self.bertscore_f1(&gold_spans.join(" "), generated)?,
            partial: self.partial_correctness(gold_spans, generated)?,
        })
    }
}

/// Fixed-width table of per-case scores followed by the averages
#[inline]
pub fn render_table(rows: &[CaseScores]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} | {:>8} | {:>8} | {:>8}",
        "QueryID", "Coverage", "BERT-F1", "Partial"
    );
    let _ = writeln!(out, "{}", "-".repeat(43));
    for row in rows {
        let _ = writeln!(
            out,
            "{:<8} | {:>8.3} | {:>8.3} | {:>8.3}",
            row.id, row.coverage, row.bert_f1, row.partial
        );
    }

    let column = |f: fn(&CaseScores) -> f32| mean(&rows.iter().map(f).collect::<Vec<_>>());
    let _ = writeln!(out, "{}", "-".repeat(43));
    let _ = writeln!(
        out,
        "{:<8} | {:>8.3} | {:>8.3} | {:>8.3}",
        "AVERAGE",
        column(|r| r.coverage),
        column(|r| r.bert_f1),
        column(|r| r.partial)
    );
    out
}
