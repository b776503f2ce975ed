//! Embedding contract for the retrieval engine.
//!
//! The document parsing/embedding pipeline lives outside this crate; it
//! only needs to satisfy the [`Embedder`] trait. A deterministic
//! hash-based implementation ships in-tree so search, tests, and the CLI
//! work without a model download. Hash embeddings capture lexical
//! overlap, not semantics.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::RetrievalError;

/// Default embedding dimensions for the in-tree hash embedder.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Trait for embedding generators.
///
/// Implementations must be thread-safe (`Send + Sync`); the embedder is
/// shared across concurrent request tasks. All vectors from a given
/// embedder have the fixed dimension reported by [`Embedder::dimensions`].
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Generates embeddings for multiple texts.
    ///
    /// The default implementation calls `embed` for each text sequentially.
    /// Implementations may override this for batch optimization.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails for any text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Hash-based embedder.
///
/// Generates deterministic pseudo-embeddings using a combination of:
/// - Word-level hashing for vocabulary capture
/// - Character n-gram hashing for fuzzy matching
/// - Normalization to unit length for cosine similarity
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates a new hash embedder with the specified dimensions.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Hashes a string to a u64 value.
    fn hash_string(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Generates a pseudo-embedding from text.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        // Word-level hashing (primary signal)
        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Character trigram hashing (secondary signal for fuzzy matching)
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() >= 3 {
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::hash_string(&trigram);
                let idx = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
                embedding[idx] += sign;
            }
        }

        // Normalize to unit length for cosine similarity
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.generate_embedding(text))
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical).
/// Returns 0.0 if vectors have different lengths or zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::default();
        let emb1 = embedder.embed("hello world").unwrap();
        let emb2 = embedder.embed("hello world").unwrap();
        assert_eq!(emb1, emb2);
    }

    #[test]
    fn test_dimensions() {
        let embedder = HashEmbedder::new(128);
        let emb = embedder.embed("test").unwrap();
        assert_eq!(emb.len(), 128);
        assert_eq!(embedder.dimensions(), 128);
    }

    #[test]
    fn test_normalized() {
        let embedder = HashEmbedder::default();
        let emb = embedder.embed("hello world").unwrap();
        let magnitude: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_text_higher_similarity() {
        let embedder = HashEmbedder::default();
        let emb_base = embedder.embed("the quick brown fox").unwrap();
        let emb_similar = embedder.embed("the quick brown dog").unwrap();
        let emb_different = embedder.embed("completely unrelated text").unwrap();

        let sim_similar = cosine_similarity(&emb_base, &emb_similar);
        let sim_different = cosine_similarity(&emb_base, &emb_different);

        assert!(
            sim_similar > sim_different,
            "Similar text should have higher similarity: {sim_similar} vs {sim_different}"
        );
    }

    #[test]
    fn test_batch_embedding() {
        let embedder = HashEmbedder::default();
        let texts = vec!["hello", "world", "test"];
        let embeddings = embedder.embed_batch(&texts).unwrap();

        assert_eq!(embeddings.len(), 3);
        for emb in embeddings {
            assert_eq!(emb.len(), DEFAULT_DIMENSIONS);
        }
    }

    #[test]
    fn test_empty_text() {
        let embedder = HashEmbedder::default();
        let emb = embedder.embed("").unwrap();
        assert_eq!(emb.len(), DEFAULT_DIMENSIONS);
        assert!(emb.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_different_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
