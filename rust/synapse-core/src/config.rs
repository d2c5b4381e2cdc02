//! Pipeline configuration.
//!
//! All tunables live here, including the topic-model hyperparameters whose
//! fixed seed is a reproducibility contract: two runs over the same text
//! must emit the same nodes and edges.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_fit_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_merge_backoff() -> Duration {
    Duration::from_millis(100)
}

/// Topic-model hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Number of latent topics (default: 5).
    pub topics: usize,
    /// Burn-in sweeps over the corpus before counts are trusted (default: 20).
    pub passes: usize,
    /// Sampling sweeps whose counts are accumulated (default: 400).
    pub iterations: usize,
    /// Symmetric document-topic prior (default: 0.1).
    pub alpha: f64,
    /// Symmetric topic-word prior (default: 0.01).
    pub beta: f64,
    /// Seed for the sampler; fixed so runs are reproducible (default: 42).
    pub seed: u64,
    /// Wall-clock bound on a single fit; exceeding it counts as a fit
    /// failure and the chunk is treated as terminal (default: 60 s).
    #[serde(skip, default = "default_fit_timeout")]
    pub fit_timeout: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            topics: 5,
            passes: 20,
            iterations: 400,
            alpha: 0.1,
            beta: 0.01,
            seed: 42,
            fit_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for the whole construction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Topic-model block.
    pub topic: TopicConfig,
    /// Lines at most this many characters long are treated as standalone
    /// blocks (titles, headings) during segmentation (default: 25).
    pub short_line_max_chars: usize,
    /// Chunks with at most this many sentences are dropped (default: 3).
    pub min_chunk_sentences: usize,
    /// Chunks with at most this many tokens are dropped (default: 20).
    pub min_chunk_tokens: usize,
    /// Recursion depth cap (default: 20).
    pub max_depth: usize,
    /// Upper bound on sub-chunks produced by one split (default: 10).
    pub max_groups: usize,
    /// Per-depth growth factor applied to the split threshold (default: 1.1).
    pub threshold_growth: f64,
    /// Percentile of the root similarity entries seeding the threshold
    /// (default: 0.25).
    pub threshold_percentile: f64,
    /// Sentence width of the flat-fallback windows (default: 10).
    pub flat_window_sentences: usize,
    /// New top-level phrase nodes emitted per finalized chunk (default: 5).
    pub max_new_nodes_per_chunk: usize,
    /// Group members attached below a representative phrase (default: 5).
    pub max_group_children: usize,
    /// Embedding cosine at or above which two phrases are near-duplicates
    /// (default: 0.85).
    pub group_threshold: f64,
    /// Phrase-score weight on the number of containing sentences.
    pub weight_sentence_count: f64,
    /// Phrase-score weight on the phrase length in characters.
    pub weight_length: f64,
    /// Phrase-score weight on the TF-IDF score.
    pub weight_tfidf: f64,
    /// Upper bound on relation-label length in characters (default: 80).
    pub relation_max_chars: usize,
    /// Dimension of the hashed n-gram embeddings (default: 256).
    pub embedding_dimension: usize,
    /// Retries for transient graph-store failures (default: 2).
    pub merge_retries: u32,
    /// Initial backoff before a graph-store retry; doubled per attempt
    /// (default: 100 ms).
    #[serde(skip, default = "default_merge_backoff")]
    pub merge_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: TopicConfig::default(),
            short_line_max_chars: 25,
            min_chunk_sentences: 3,
            min_chunk_tokens: 20,
            max_depth: 20,
            max_groups: 10,
            threshold_growth: 1.1,
            threshold_percentile: 0.25,
            flat_window_sentences: 10,
            max_new_nodes_per_chunk: 5,
            max_group_children: 5,
            group_threshold: 0.85,
            weight_sentence_count: 1.0,
            weight_length: 0.1,
            weight_tfidf: 2.0,
            relation_max_chars: 80,
            embedding_dimension: 256,
            merge_retries: 2,
            merge_backoff: Duration::from_millis(100),
        }
    }
}

impl PipelineConfig {
    /// Override the topic-model seed, keeping everything else.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.topic.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.topic.topics, 5);
        assert_eq!(config.topic.passes, 20);
        assert_eq!(config.topic.iterations, 400);
        assert_eq!(config.max_groups, 10);
        assert!((config.threshold_growth - 1.1).abs() < f64::EPSILON);
        assert_eq!(config.max_new_nodes_per_chunk, 5);
    }

    #[test]
    fn test_with_seed() {
        let config = PipelineConfig::default().with_seed(7);
        assert_eq!(config.topic.seed, 7);
    }
}
