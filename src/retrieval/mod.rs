//! Hybrid retrieval engine.
//!
//! Vector similarity and BM25 lexical search fused with Reciprocal Rank
//! Fusion, then reranked against query-text signals:
//!
//! 1. Vector search over the workspace's chunk embeddings (2·top_k)
//! 2. BM25 over all workspace chunks (2·top_k)
//! 3. RRF fusion (or weighted sum, by configuration)
//! 4. Rerank: normalized fused score + keyword overlap + length penalty
//! 5. Truncate to top_k and assign 1-based ranks
//!
//! Deterministic for fixed inputs and configuration.

pub mod bm25;
pub mod rerank;
pub mod rrf;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{FusionMode, RetrievalConfig};
use crate::core::Chunk;
use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::storage::ChunkRepo;

pub use bm25::tokenize;
pub use rerank::{keyword_overlap, length_penalty, rerank};
pub use rrf::{fuse_rankings, fuse_weighted, reciprocal_rank_fusion};

/// A transient search result.
///
/// Every hit carries at least one non-null score; `rank` is 1-based
/// once assigned by the final pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Matched chunk.
    pub chunk_id: String,
    /// Chunk text.
    pub text: String,
    /// Chunk metadata.
    pub metadata: serde_json::Value,
    /// Owning document.
    pub document_id: String,
    /// Workspace scope.
    pub workspace_id: String,
    /// Position within the document.
    pub chunk_index: usize,
    /// Cosine similarity from the vector stage.
    pub score_vector: Option<f64>,
    /// BM25 score from the lexical stage.
    pub score_lexical: Option<f64>,
    /// Fused score.
    pub score_hybrid: Option<f64>,
    /// Final rerank score.
    pub score_rerank: Option<f64>,
    /// 1-based rank in the final result list.
    pub rank: Option<usize>,
}

/// Hybrid vector + lexical retriever.
pub struct HybridRetriever {
    config: RetrievalConfig,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("config", &self.config)
            .finish()
    }
}

impl HybridRetriever {
    /// Creates a retriever with the given configuration and embedder.
    #[must_use]
    pub fn new(config: RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    /// Returns the retriever's configuration.
    #[must_use]
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Runs the full hybrid pipeline.
    ///
    /// Returns hits sorted by final score descending with ranks
    /// 1..n, all belonging to `workspace_id`, with no duplicate chunk
    /// IDs. An empty workspace yields an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Fails when the embedder or the chunk repository fails.
    #[instrument(skip(self, chunks, query), fields(workspace = workspace_id, top_k))]
    pub fn search(
        &self,
        chunks: &dyn ChunkRepo,
        query: &str,
        workspace_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let search_k = top_k * 2;

        // Vector stage. Corrupt chunks (no embedding) are excluded here
        // but stay eligible lexically; matches below the similarity
        // floor carry no vector signal.
        let query_embedding = self.embedder.embed(query)?;
        let vector_results: Vec<(Chunk, f32)> = chunks
            .similarity_search(workspace_id, &query_embedding, search_k)
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?
            .into_iter()
            .filter(|(_, score)| *score >= self.config.min_vector_similarity)
            .collect();

        // Lexical stage over the whole workspace.
        let all_chunks = chunks
            .list_by_workspace(workspace_id)
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        if all_chunks.is_empty() && vector_results.is_empty() {
            return Ok(Vec::new());
        }
        let lexical: Vec<(String, f64)> =
            bm25::rank(query, &all_chunks, self.config.bm25, search_k);

        let vector: Vec<(String, f64)> = vector_results
            .iter()
            .map(|(chunk, score)| (chunk.chunk_id.clone(), f64::from(*score)))
            .collect();

        debug!(
            vector_hits = vector.len(),
            lexical_hits = lexical.len(),
            "hybrid stages complete"
        );

        // Fusion.
        let fused = match self.config.fusion {
            FusionMode::Rrf => rrf::fuse_rankings(&vector, &lexical, self.config.rrf_k),
            FusionMode::Weighted { vector: vw, bm25: bw } => {
                rrf::fuse_weighted(&vector, &lexical, vw, bw)
            }
        };

        // Assemble hits from chunk records known to either stage.
        let mut by_id: HashMap<&str, &Chunk> = all_chunks
            .iter()
            .map(|c| (c.chunk_id.as_str(), c))
            .collect();
        for (chunk, _) in &vector_results {
            by_id.entry(chunk.chunk_id.as_str()).or_insert(chunk);
        }
        let vector_scores: HashMap<&str, f64> =
            vector.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let lexical_scores: HashMap<&str, f64> =
            lexical.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        let candidates: Vec<SearchHit> = fused
            .into_iter()
            .filter_map(|(chunk_id, hybrid_score)| {
                let chunk = by_id.get(chunk_id.as_str())?;
                Some(SearchHit {
                    chunk_id: chunk.chunk_id.clone(),
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    document_id: chunk.document_id.clone(),
                    workspace_id: chunk.workspace_id.clone(),
                    chunk_index: chunk.chunk_index,
                    score_vector: vector_scores.get(chunk_id.as_str()).copied(),
                    score_lexical: lexical_scores.get(chunk_id.as_str()).copied(),
                    score_hybrid: Some(hybrid_score),
                    score_rerank: None,
                    rank: None,
                })
            })
            .collect();

        // Rerank and truncate.
        let hits = rerank::rerank(
            query,
            candidates,
            self.config.weights,
            self.config.optimal_chunk_len,
            top_k,
        );
        debug!(results = hits.len(), "search complete");
        Ok(hits)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::storage::SqliteStorage;
    use crate::storage::traits::ChunkRepo as _;

    fn seeded_storage() -> SqliteStorage {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let embedder = HashEmbedder::default();
        let texts = [
            "Agentic AI uses LLMs to plan and act.",
            "Pasta recipes require boiling water and salt.",
            "Kernel scheduling balances latency and throughput.",
            "Board visualizations include kanban and gantt charts.",
        ];
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                chunk_id: format!("c{i}"),
                document_id: "doc-1".to_string(),
                workspace_id: "w1".to_string(),
                chunk_index: i,
                text: (*text).to_string(),
                embedding: Some(embedder.embed(text).unwrap()),
                metadata: serde_json::json!({"document_name": "notes.md"}),
            })
            .collect();
        storage.insert_chunks(&chunks).unwrap();
        storage
    }

    fn retriever() -> HybridRetriever {
        HybridRetriever::new(RetrievalConfig::default(), Arc::new(HashEmbedder::default()))
    }

    #[test]
    fn test_search_returns_ranked_unique_hits() {
        let storage = seeded_storage();
        let hits = retriever()
            .search(&storage, "agentic AI planning", "w1", 3)
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.len() <= 3);
        let ids: std::collections::HashSet<&str> =
            hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), hits.len());
        for (i, hit) in hits.iter().enumerate() {
            assert_eq!(hit.rank, Some(i + 1));
            assert_eq!(hit.workspace_id, "w1");
            assert!(hit.score_hybrid.is_some());
        }
        assert_eq!(hits[0].chunk_id, "c0");
    }

    #[test]
    fn test_empty_workspace_returns_empty() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let hits = retriever().search(&storage, "anything", "w1", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_corrupt_chunk_still_eligible_lexically() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        storage
            .insert_chunks(&[Chunk {
                chunk_id: "broken".to_string(),
                document_id: "doc-1".to_string(),
                workspace_id: "w1".to_string(),
                chunk_index: 0,
                text: "kernel scheduling internals".to_string(),
                embedding: None,
                metadata: serde_json::json!({}),
            }])
            .unwrap();
        let hits = retriever()
            .search(&storage, "kernel scheduling", "w1", 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score_vector.is_none());
        assert!(hits[0].score_lexical.is_some());
    }

    #[test]
    fn test_deterministic_for_fixed_inputs() {
        let storage = seeded_storage();
        let retriever = retriever();
        let a = retriever.search(&storage, "kanban chart", "w1", 4).unwrap();
        let b = retriever.search(&storage, "kanban chart", "w1", 4).unwrap();
        let a_ids: Vec<&str> = a.iter().map(|h| h.chunk_id.as_str()).collect();
        let b_ids: Vec<&str> = b.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(a_ids, b_ids);
    }

    #[test]
    fn test_weighted_fusion_mode() {
        let storage = seeded_storage();
        let config = RetrievalConfig {
            fusion: FusionMode::Weighted {
                vector: 0.5,
                bm25: 0.5,
            },
            ..RetrievalConfig::default()
        };
        let retriever = HybridRetriever::new(config, Arc::new(HashEmbedder::default()));
        let hits = retriever
            .search(&storage, "pasta recipes", "w1", 2)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, "c1");
    }
}
