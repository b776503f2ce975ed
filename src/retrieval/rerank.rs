//! Final reordering of fused results against query-text signals.
//!
//! `final = w_orig · norm(fused) + w_keyword · overlap + w_length · length_penalty`
//!
//! `norm` is min-max normalization over the current candidate set; a
//! degenerate set where every fused score is equal maps to 1.0 for all
//! members so the other signals decide the order.

use std::collections::HashSet;

use crate::config::RerankWeights;
use crate::retrieval::SearchHit;
use crate::retrieval::bm25::tokenize;

/// Fraction of unique query tokens present in the text.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn keyword_overlap(query: &str, text: &str) -> f64 {
    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let overlap = query_tokens.intersection(&text_tokens).count();
    overlap as f64 / query_tokens.len() as f64
}

/// Penalty decaying linearly with absolute deviation from the optimal
/// chunk length, clamped at 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn length_penalty(text: &str, optimal_length: usize) -> f64 {
    if optimal_length == 0 {
        return 0.0;
    }
    let diff = text.len().abs_diff(optimal_length);
    (1.0 - diff as f64 / optimal_length as f64).max(0.0)
}

fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || (max - min).abs() < f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

/// Reranks hits, truncates to `top_k`, and assigns 1-based ranks.
///
/// The output is always a subset of the input hits; only ordering,
/// `score_rerank`, and `rank` change.
#[must_use]
pub fn rerank(
    query: &str,
    mut hits: Vec<SearchHit>,
    weights: RerankWeights,
    optimal_length: usize,
    top_k: usize,
) -> Vec<SearchHit> {
    let fused_scores: Vec<f64> = hits
        .iter()
        .map(|h| h.score_hybrid.unwrap_or(0.0))
        .collect();
    let normalized = min_max_normalize(&fused_scores);

    for (hit, norm) in hits.iter_mut().zip(normalized) {
        let keyword = keyword_overlap(query, &hit.text);
        let length = length_penalty(&hit.text, optimal_length);
        hit.score_rerank = Some(
            weights.original * norm + weights.keyword * keyword + weights.length * length,
        );
    }

    hits.sort_by(|a, b| {
        let a_score = a.score_rerank.unwrap_or(0.0);
        let b_score = b.score_rerank.unwrap_or(0.0);
        b_score
            .partial_cmp(&a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k);
    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = Some(i + 1);
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, text: &str, hybrid: f64) -> SearchHit {
        SearchHit {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: serde_json::json!({}),
            document_id: "d".to_string(),
            workspace_id: "w".to_string(),
            chunk_index: 0,
            score_vector: None,
            score_lexical: None,
            score_hybrid: Some(hybrid),
            score_rerank: None,
            rank: None,
        }
    }

    #[test]
    fn test_keyword_overlap_full_and_none() {
        assert!((keyword_overlap("agentic ai", "Agentic AI plans and acts") - 1.0).abs() < 1e-9);
        assert!(keyword_overlap("kernel", "cooking pasta").abs() < 1e-9);
        assert!(keyword_overlap("", "anything").abs() < 1e-9);
    }

    #[test]
    fn test_keyword_overlap_partial() {
        let overlap = keyword_overlap("kernel scheduling latency", "kernel docs");
        assert!((overlap - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_length_penalty_optimal_is_one() {
        let text = "x".repeat(500);
        assert!((length_penalty(&text, 500) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_length_penalty_clamped_at_zero() {
        let text = "x".repeat(2000);
        assert!(length_penalty(&text, 500).abs() < 1e-9);
    }

    #[test]
    fn test_rerank_preserves_chunk_set_and_ranks() {
        let hits = vec![hit("a", "alpha", 0.2), hit("b", "beta", 0.9), hit("c", "gamma", 0.5)];
        let input_ids: std::collections::HashSet<String> =
            hits.iter().map(|h| h.chunk_id.clone()).collect();
        let reranked = rerank("beta", hits, RerankWeights::default(), 500, 10);
        assert_eq!(reranked.len(), 3);
        for h in &reranked {
            assert!(input_ids.contains(&h.chunk_id));
        }
        let ranks: Vec<usize> = reranked.iter().filter_map(|h| h.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_rerank_keyword_signal_lifts_match() {
        // Equal fused scores: normalization degenerates to 1.0 for all,
        // so keyword overlap decides.
        let hits = vec![
            hit("a", "nothing relevant here", 0.5),
            hit("b", "kernel scheduling details", 0.5),
        ];
        let reranked = rerank("kernel scheduling", hits, RerankWeights::default(), 500, 2);
        assert_eq!(reranked[0].chunk_id, "b");
    }

    #[test]
    fn test_rerank_truncates_to_top_k() {
        let hits: Vec<SearchHit> = (0..10)
            .map(|i| hit(&format!("c{i}"), "text", f64::from(i) / 10.0))
            .collect();
        let reranked = rerank("text", hits, RerankWeights::default(), 500, 3);
        assert_eq!(reranked.len(), 3);
    }

    #[test]
    fn test_min_max_normalization_applied() {
        let hits = vec![hit("low", "same text", 0.0), hit("high", "same text", 10.0)];
        let reranked = rerank("unrelated", hits, RerankWeights::default(), 500, 2);
        // Identical text signals: only the fused score separates them.
        assert_eq!(reranked[0].chunk_id, "high");
        let top = reranked[0].score_rerank.unwrap_or(0.0);
        let bottom = reranked[1].score_rerank.unwrap_or(0.0);
        assert!((top - bottom - RerankWeights::default().original).abs() < 1e-9);
    }
}
