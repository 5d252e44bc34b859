//! Text helpers shared by the extraction heuristics

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Words that carry no topical signal when comparing texts
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "here", "how", "i", "if", "in", "into", "is", "it", "its", "just", "more", "most",
    "no", "not", "now", "of", "on", "one", "only", "or", "other", "our", "out", "over", "should",
    "so", "some", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "to", "too", "up", "use", "very", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "why", "will", "with", "would", "you", "your",
];

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](?:\s+|$)|\n+").expect("valid regex"));

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("valid regex"));

/// Split text into trimmed, non-empty sentences
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END_RE.find_iter(text) {
        // Keep terminal punctuation with its sentence
        let end = if m.as_str().starts_with(['.', '!', '?']) {
            m.start() + 1
        } else {
            m.start()
        };
        push_trimmed(&mut out, &text[start..end]);
        start = m.end();
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s);
    }
}

/// First sentence of `text`, or the trimmed text if it has no boundary
pub fn first_sentence(text: &str) -> &str {
    sentences(text).into_iter().next().unwrap_or("")
}

/// Truncate to `max` characters, appending "..." when anything was cut
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

/// Lowercased words of three or more characters, minus stop words
pub fn keywords(text: &str) -> BTreeSet<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Case-insensitive substring test
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentences() {
        let text = "We decided to use Postgres. It scales well!\nNext step: migrate.";
        assert_eq!(
            sentences(text),
            vec!["We decided to use Postgres.", "It scales well!", "Next step: migrate."]
        );
    }

    #[test]
    fn test_sentence_keeps_file_names_intact() {
        assert_eq!(
            first_sentence("Refactor main.go to drop globals. Then test."),
            "Refactor main.go to drop globals."
        );
    }

    #[test]
    fn test_first_sentence_without_boundary() {
        assert_eq!(first_sentence("  no punctuation here "), "no punctuation here");
        assert_eq!(first_sentence(""), "");
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
    }

    #[test]
    fn test_keywords_drop_stop_words() {
        let words = keywords("We should cache the Database connection pool");
        assert!(words.contains("cache"));
        assert!(words.contains("database"));
        assert!(words.contains("pool"));
        assert!(!words.contains("should"));
        assert!(!words.contains("the"));
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("Going with OAuth", "oauth"));
        assert!(!contains_ignore_case("anything", ""));
    }
}
