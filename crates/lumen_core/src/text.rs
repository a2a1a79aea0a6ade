//! Tokenization shared by the grounding scorer and the lexical reranker.
//!
//! Tokens are whitespace-separated, lowercased, with leading/trailing
//! punctuation stripped. Stopwords are dropped from "content" tokens.

use std::collections::HashSet;
use std::sync::LazyLock;

const STOPWORDS_LIST: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOPWORDS_LIST.iter().copied().collect());

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Lowercased whitespace tokens with surrounding punctuation removed.
/// Empty tokens (pure punctuation) are skipped.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().filter_map(|raw| {
        let trimmed = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_lowercase())
        }
    })
}

/// Tokens with stopwords removed.
pub fn content_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    tokens(text).filter(|t| !is_stopword(t))
}

/// Distinct keyword terms of at least `min_len` characters, in first-seen order.
pub fn keyword_terms(text: &str, min_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens(text)
        .filter(|t| t.chars().count() >= min_len)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
