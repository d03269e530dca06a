
use std::borrow::Cow;

/// Estimate the number of tokens in text (rough approximation)
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

/// Trim and collapse every whitespace run to a single space
#[inline]
pub fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(word);
    }
    normalized
}

/// Cut text at a word boundary so its estimated token count fits `max_tokens`.
/// Returns the input unchanged when it already fits.
#[inline]
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> Cow<'_, str> {
    if estimate_token_count(text) <= max_tokens {
        return Cow::Borrowed(text);
    }

    let word_ends: Vec<usize> = text
        .split_whitespace()
        .map(|word| word.as_ptr() as usize - text.as_ptr() as usize + word.len())
        .collect();

    // Largest word prefix that still fits; the estimate grows with every word
    let mut low = 0;
    let mut high = word_ends.len();
    while low < high {
        let mid = (low + high).div_ceil(2);
        if estimate_token_count(&text[..word_ends[mid - 1]]) <= max_tokens {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    if low == 0 {
        return Cow::Owned(String::new());
    }
    Cow::Owned(text[..word_ends[low - 1]].trim_start().to_string())
}

/// Split text into sentences on runs of `.`, `?`, `!` and newlines
#[inline]
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '?', '!', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
