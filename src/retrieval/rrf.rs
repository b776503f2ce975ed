//! Reciprocal Rank Fusion (RRF).
//!
//! Combines multiple ranked lists into a single fused ranking.
//! Based on: Cormack, Clarke, Buettcher (2009) - "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods"

use std::collections::HashMap;

/// Performs Reciprocal Rank Fusion over ranked lists of chunk IDs.
///
/// The RRF score for each item is `score(d) = Σ 1 / (k + rank(d))`
/// summed over every list that contains `d`, with 1-based ranks. Only
/// each item's rank within a list matters, so the result is invariant
/// under reordering of the input lists.
#[must_use]
pub fn reciprocal_rank_fusion(rankings: &[&[String]], k: u32) -> HashMap<String, f64> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for ranking in rankings {
        for (rank, chunk_id) in ranking.iter().enumerate() {
            let rrf = 1.0 / f64::from(k + u32::try_from(rank).unwrap_or(u32::MAX - k) + 1);
            *scores.entry(chunk_id.clone()).or_insert(0.0) += rrf;
        }
    }

    scores
}

/// Fuses a vector ranking and a lexical ranking into one ordered list.
///
/// Scores come from [`reciprocal_rank_fusion`]. Ties are broken by
/// (a) presence in both lists, (b) higher vector score, (c) lower
/// chunk ID in lexicographic order, which makes the output fully
/// deterministic for fixed inputs.
#[must_use]
pub fn fuse_rankings(
    vector: &[(String, f64)],
    lexical: &[(String, f64)],
    k: u32,
) -> Vec<(String, f64)> {
    let vector_ranking: Vec<String> = vector.iter().map(|(id, _)| id.clone()).collect();
    let lexical_ranking: Vec<String> = lexical.iter().map(|(id, _)| id.clone()).collect();
    let scores = reciprocal_rank_fusion(&[&vector_ranking, &lexical_ranking], k);

    let vector_scores: HashMap<&str, f64> =
        vector.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    let lexical_ids: std::collections::HashSet<&str> =
        lexical.iter().map(|(id, _)| id.as_str()).collect();

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|(a_id, a_score), (b_id, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_both = vector_scores.contains_key(a_id.as_str())
                    && lexical_ids.contains(a_id.as_str());
                let b_both = vector_scores.contains_key(b_id.as_str())
                    && lexical_ids.contains(b_id.as_str());
                b_both.cmp(&a_both)
            })
            .then_with(|| {
                let a_vec = vector_scores.get(a_id.as_str()).copied().unwrap_or(0.0);
                let b_vec = vector_scores.get(b_id.as_str()).copied().unwrap_or(0.0);
                b_vec.partial_cmp(&a_vec).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a_id.cmp(b_id))
    });
    fused
}

/// Fuses by weighted sum of raw scores instead of rank fusion.
///
/// Items missing from one list contribute 0 for that list.
#[must_use]
pub fn fuse_weighted(
    vector: &[(String, f64)],
    lexical: &[(String, f64)],
    vector_weight: f64,
    bm25_weight: f64,
) -> Vec<(String, f64)> {
    let mut combined: HashMap<String, f64> = HashMap::new();
    for (id, score) in vector {
        *combined.entry(id.clone()).or_insert(0.0) += score * vector_weight;
    }
    for (id, score) in lexical {
        *combined.entry(id.clone()).or_insert(0.0) += score * bm25_weight;
    }
    let mut fused: Vec<(String, f64)> = combined.into_iter().collect();
    fused.sort_by(|(a_id, a_score), (b_id, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a_id.cmp(b_id))
    });
    fused
}
