//! BM25 lexical scoring over workspace chunks.
//!
//! BM25 is a probabilistic ranking function combining term frequency,
//! inverse document frequency, and document length normalization. It is
//! computed in-process over the workspace's chunks; corpus statistics
//! (df, avgdl) are derived from the same set.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Bm25Config;
use crate::core::Chunk;

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").unwrap_or_else(|_| unreachable!()))
}

/// Tokenizes text by lowercasing and splitting on non-word characters.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    word_regex()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Scores one document against the query tokens.
#[allow(clippy::cast_precision_loss)]
fn score_document(
    query_tokens: &HashSet<&str>,
    doc_term_freq: &HashMap<&str, usize>,
    doc_length: usize,
    avg_doc_length: f64,
    doc_count: usize,
    term_doc_freq: &HashMap<String, usize>,
    config: Bm25Config,
) -> f64 {
    let mut score = 0.0;
    for term in query_tokens {
        let Some(&tf) = doc_term_freq.get(term) else {
            continue;
        };
        let df = term_doc_freq.get(*term).copied().unwrap_or(0);
        if df == 0 {
            continue;
        }

        // IDF component: ln((N - df + 0.5) / (df + 0.5) + 1)
        let idf = (((doc_count as f64) - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();

        // Document length normalization
        let norm = 1.0 - config.b + config.b * (doc_length as f64 / avg_doc_length);

        score += idf * (tf as f64 * (config.k1 + 1.0)) / (tf as f64 + config.k1 * norm);
    }
    score
}

/// Ranks workspace chunks against a query with BM25.
///
/// Returns up to `top_k` `(chunk_id, score)` pairs sorted by score
/// descending, chunk ID ascending on ties. An empty query (after
/// tokenization) or empty corpus yields an empty list.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rank(query: &str, chunks: &[Chunk], config: Bm25Config, top_k: usize) -> Vec<(String, f64)> {
    let query_tokens_owned = tokenize(query);
    if query_tokens_owned.is_empty() || chunks.is_empty() {
        return Vec::new();
    }
    let query_tokens: HashSet<&str> = query_tokens_owned.iter().map(String::as_str).collect();

    // Tokenize the corpus once, collecting length and df statistics.
    let tokenized: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.text)).collect();
    let total_length: usize = tokenized.iter().map(Vec::len).sum();
    let avg_doc_length = if total_length == 0 {
        1.0
    } else {
        total_length as f64 / chunks.len() as f64
    };

    let mut term_doc_freq: HashMap<String, usize> = HashMap::new();
    for tokens in &tokenized {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for term in unique {
            *term_doc_freq.entry(term.to_string()).or_insert(0) += 1;
        }
    }

    // Chunks matching no query term carry no lexical signal and are
    // not returned.
    let mut scored: Vec<(String, f64)> = chunks
        .iter()
        .zip(&tokenized)
        .filter_map(|(chunk, tokens)| {
            let mut doc_term_freq: HashMap<&str, usize> = HashMap::new();
            for token in tokens {
                *doc_term_freq.entry(token.as_str()).or_insert(0) += 1;
            }
            let score = score_document(
                &query_tokens,
                &doc_term_freq,
                tokens.len(),
                avg_doc_length,
                chunks.len(),
                &term_doc_freq,
                config,
            );
            (score > 0.0).then(|| (chunk.chunk_id.clone(), score))
        })
        .collect();

    scored.sort_by(|(a_id, a_score), (b_id, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a_id.cmp(b_id))
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "d".to_string(),
            workspace_id: "w".to_string(),
            chunk_index: 0,
            text: text.to_string(),
            embedding: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test_case("Hello, World!", &["hello", "world"]; "punctuation split")]
    #[test_case("agentic-AI uses LLMs", &["agentic", "ai", "uses", "llms"]; "hyphen split")]
    #[test_case("", &[]; "empty")]
    fn test_tokenize(input: &str, expected: &[&str]) {
        assert_eq!(tokenize(input), expected);
    }

    #[test]
    fn test_matching_chunk_ranks_first() {
        let chunks = vec![
            chunk("a", "recipes for pasta and sauce"),
            chunk("b", "kernel scheduling and process priority"),
        ];
        let ranked = rank("kernel scheduling", &chunks, Bm25Config::default(), 10);
        assert_eq!(ranked[0].0, "b");
        assert!(ranked[0].1 > 0.0);
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let chunks = vec![chunk("a", "text")];
        assert!(rank("!!!", &chunks, Bm25Config::default(), 10).is_empty());
    }

    #[test]
    fn test_empty_corpus_returns_empty() {
        assert!(rank("query", &[], Bm25Config::default(), 10).is_empty());
    }

    #[test]
    fn test_top_k_cap_and_unique_ids() {
        let chunks: Vec<Chunk> = (0..20)
            .map(|i| chunk(&format!("c{i}"), "shared term document"))
            .collect();
        let ranked = rank("term", &chunks, Bm25Config::default(), 5);
        assert_eq!(ranked.len(), 5);
        let unique: std::collections::HashSet<&str> =
            ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_term_frequency_saturation() {
        // With k1 finite, doubling tf less than doubles the score.
        let chunks = vec![
            chunk("once", "apple pie"),
            chunk("many", "apple apple apple apple pie"),
        ];
        let ranked = rank("apple", &chunks, Bm25Config::default(), 10);
        let many = ranked.iter().find(|(id, _)| id == "many").map(|(_, s)| *s);
        let once = ranked.iter().find(|(id, _)| id == "once").map(|(_, s)| *s);
        let (many, once) = (many.unwrap_or(0.0), once.unwrap_or(0.0));
        assert!(many > once);
        assert!(many < once * 4.0);
    }

    #[test]
    fn test_rare_term_outweighs_common() {
        let chunks = vec![
            chunk("a", "common words common words zebra"),
            chunk("b", "common words common words"),
            chunk("c", "common words again"),
        ];
        let ranked = rank("zebra common", &chunks, Bm25Config::default(), 10);
        assert_eq!(ranked[0].0, "a");
    }
}
