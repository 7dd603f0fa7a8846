//! Heuristic topic extraction from free text.
//!
//! Deterministic and stateless: tokenize on word boundaries,
//! lowercase, drop short tokens and stop words, keep first-occurrence
//! order. Used to suggest topics during recall and to tag new
//! interactions during persist when the caller supplies none.

use std::sync::LazyLock;

use regex::Regex;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").unwrap());

/// Articles, conjunctions, common prepositions, forms of "to be".
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "is",
    "are", "was", "were", "be", "been", "being",
];

/// Default number of topics suggested per input.
pub const DEFAULT_TOPIC_LIMIT: usize = 5;

/// Tokenize text into lowercase words on word boundaries.
/// Shared by topic extraction and the embedding function.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract up to `limit` candidate topic keywords from `text`.
///
/// Tokens of length <= 3 and stop words are dropped; duplicates
/// collapse to their first occurrence so the result is usable directly
/// as an interaction's topic set.
pub fn extract_topics(text: &str, limit: usize) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for word in tokenize(text) {
        if word.len() <= 3 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        if topics.len() == limit {
            break;
        }
        if !topics.contains(&word) {
            topics.push(word);
        }
    }
    topics
}
