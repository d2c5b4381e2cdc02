//! Embedding generation and cosine similarity.
//!
//! Phrase embeddings only have to be stable and locally comparable: they
//! feed near-duplicate grouping, never retrieval. The default provider is a
//! hashed character n-gram projection, deterministic across runs and
//! processes, so the pipeline needs no model files and no network. Swap in
//! another [`EmbeddingProvider`] for model-backed vectors.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rayon::prelude::*;

/// Provider of phrase/sentence embeddings.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Embed multiple texts.
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Embedding dimension of this provider.
    fn dimension(&self) -> usize;
}

/// Deterministic hashed character n-gram embedder.
#[derive(Debug, Clone)]
pub struct HashedNgramEmbedder {
    dimension: usize,
}

impl HashedNgramEmbedder {
    /// Create an embedder with the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    /// Character 1- to 3-grams over the normalized text, word boundaries
    /// marked so `"ab cd"` and `"abcd"` land in different buckets.
    fn ngrams(text: &str) -> Vec<String> {
        let normalized: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        let mut grams = Vec::new();
        for word in normalized.split_whitespace() {
            let chars: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for n in 1..=3 {
                if chars.len() < n {
                    continue;
                }
                for window in chars.windows(n) {
                    grams.push(window.iter().collect());
                }
            }
        }
        grams
    }
}

impl EmbeddingProvider for HashedNgramEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for gram in Self::ngrams(text) {
            let mut hasher = DefaultHasher::new();
            gram.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            // Signed hashing keeps the expected bucket value centered.
            let sign = if h & (1u64 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity between two vectors; zero vectors compare as 0.
#[must_use]
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Cosine similarity between two `f32` vectors, computed in `f64`.
#[must_use]
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Above this many rows the pairwise matrix is computed in parallel.
const PARALLEL_CUTOFF: usize = 64;

/// Symmetric pairwise cosine matrix with a unit diagonal.
#[must_use]
pub fn cosine_matrix(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = rows.len();
    let compute_row = |i: usize| -> Vec<f64> {
        (0..n)
            .map(|j| if i == j { 1.0 } else { cosine(&rows[i], &rows[j]) })
            .collect()
    };

    if n > PARALLEL_CUTOFF {
        (0..n).into_par_iter().map(compute_row).collect()
    } else {
        (0..n).map(compute_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_deterministic() {
        let embedder = HashedNgramEmbedder::new(64);
        assert_eq!(embedder.embed("knowledge graph"), embedder.embed("knowledge graph"));
    }

    #[test]
    fn test_embedding_normalized() {
        let embedder = HashedNgramEmbedder::new(64);
        let v = embedder.embed("quantum entanglement");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_strings_score_higher() {
        let embedder = HashedNgramEmbedder::new(256);
        let a = embedder.embed("quantum computing");
        let b = embedder.embed("quantum computer");
        let c = embedder.embed("weather forecast");
        assert!(cosine_f32(&a, &b) > cosine_f32(&a, &c));
    }

    #[test]
    fn test_cosine_identity_and_zero() {
        assert!((cosine(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-12);
        assert!(cosine(&[0.0, 0.0], &[1.0, 2.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_matrix_symmetric_unit_diagonal() {
        let rows = vec![vec![1.0, 0.0], vec![0.5, 0.5], vec![0.0, 1.0]];
        let m = cosine_matrix(&rows);
        for i in 0..3 {
            assert!((m[i][i] - 1.0).abs() < 1e-12);
            for j in 0..3 {
                assert!((m[i][j] - m[j][i]).abs() < 1e-12);
            }
        }
    }
}
