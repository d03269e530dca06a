
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::embeddings::{estimate_token_count, normalize_whitespace};
use crate::index::SearchHit;
use crate::llm::Prompt;

pub const SYSTEM_PROMPT: &str = "You are a helpful home gardening assistant. \
Answer the user's question using the provided context when it is relevant. \
If the context does not cover the question, say so and answer from general gardening knowledge.";

const NO_CONTEXT: &str = "No relevant context was found.";

/// Render one retrieved entry as a numbered context block
#[inline]
pub fn format_entry(rank: usize, hit: &SearchHit) -> String {
    let mut block = format!("[{}] {}", rank, hit.metadata.text);
    if !hit.metadata.fields.is_empty() {
        let fields = hit
            .metadata
            .fields
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect::<Vec<_>>()
            .join("; ");
        let _ = write!(block, "\n({})", fields);
    }
    block
}

/// Remove hits whose text repeats a higher-ranked hit. Returns how many were removed.
#[inline]
pub fn dedupe(hits: &mut Vec<SearchHit>) -> usize {
    let before = hits.len();
    let mut seen = HashSet::new();
    hits.retain(|hit| seen.insert(normalize_whitespace(&hit.metadata.text).to_lowercase()));
    before - hits.len()
}

/// Drop the lowest-ranked hits until the rendered context fits `max_tokens`.
/// Returns how many were dropped.
#[inline]
pub fn fit_to_budget(hits: &mut Vec<SearchHit>, max_tokens: usize) -> usize {
    let costs: Vec<usize> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| estimate_token_count(&format_entry(i + 1, hit)))
        .collect();

    let mut total: usize = costs.iter().sum();
    let mut keep = hits.len();
    while keep > 0 && total > max_tokens {
        keep -= 1;
        total -= costs[keep];
    }

    let dropped = hits.len() - keep;
    hits.truncate(keep);
    dropped
}

/// Assemble the model prompt from the question and its context, best match first
#[inline]
pub fn build_prompt(query: &str, context: &[SearchHit]) -> Prompt {
    let context_text = if context.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        context
            .iter()
            .enumerate()
            .map(|(i, hit)| format_entry(i + 1, hit))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user: format!("Context:\n{}\n\nQuestion: {}", context_text, query),
    }
}
