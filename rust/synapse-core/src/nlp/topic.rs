//! Latent topic model over tokenized sentences.
//!
//! A small collapsed Gibbs sampler. The corpus here is one chunk of one
//! document, so the vocabulary is tiny and a few hundred sweeps cost
//! milliseconds. The sampler is seeded from the configuration and therefore
//! fully reproducible; the per-sentence topic distributions feed the
//! similarity matrix that drives chunk splitting.

use crate::config::TopicConfig;
use crate::nlp::embeddings::cosine_matrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Instant;

/// Symmetric sentence-to-sentence similarity matrix with a unit diagonal.
#[derive(Debug, Clone, Default)]
pub struct SimilarityMatrix {
    data: Vec<Vec<f64>>,
}

impl SimilarityMatrix {
    /// Build from precomputed rows.
    #[must_use]
    pub fn new(data: Vec<Vec<f64>>) -> Self {
        Self { data }
    }

    /// Number of sentences covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the matrix covers no sentences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Similarity between local sentence positions `i` and `j`.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i][j]
    }

    /// Entries strictly above the diagonal, row by row.
    #[must_use]
    pub fn upper_triangle(&self) -> Vec<f64> {
        let mut values = Vec::new();
        for i in 0..self.data.len() {
            for j in (i + 1)..self.data.len() {
                values.push(self.data[i][j]);
            }
        }
        values
    }
}

/// Result of a successful topic fit.
#[derive(Debug, Clone)]
pub struct TopicFit {
    /// Highest-weight term of topic 0; never empty on a successful fit.
    pub top_keyword: String,
    /// Dense per-sentence topic distributions.
    pub topic_vectors: Vec<Vec<f64>>,
    /// Pairwise cosine similarity of the topic distributions.
    pub similarity: SimilarityMatrix,
}

/// Fit the topic model over one chunk's token lists.
///
/// Returns `None` on fit failure: empty vocabulary, zero tokens, or the
/// wall-clock bound exceeded. Callers treat the chunk as terminal in that
/// case.
#[must_use]
pub fn fit(docs: &[&[String]], config: &TopicConfig) -> Option<TopicFit> {
    let mut vocab_index: HashMap<&str, usize> = HashMap::new();
    let mut vocab: Vec<&str> = Vec::new();
    let mut corpus: Vec<Vec<usize>> = Vec::with_capacity(docs.len());

    for tokens in docs {
        let ids = tokens
            .iter()
            .map(|token| {
                *vocab_index.entry(token.as_str()).or_insert_with(|| {
                    vocab.push(token.as_str());
                    vocab.len() - 1
                })
            })
            .collect::<Vec<_>>();
        corpus.push(ids);
    }

    let total_tokens: usize = corpus.iter().map(Vec::len).sum();
    if vocab.is_empty() || total_tokens == 0 {
        return None;
    }

    let k = config.topics.max(1);
    let v = vocab.len();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let deadline = Instant::now() + config.fit_timeout;

    let mut doc_topic = vec![vec![0usize; k]; corpus.len()];
    let mut topic_word = vec![vec![0usize; v]; k];
    let mut topic_total = vec![0usize; k];

    let mut assignments: Vec<Vec<usize>> = corpus
        .iter()
        .enumerate()
        .map(|(d, ids)| {
            ids.iter()
                .map(|&w| {
                    let topic = rng.random_range(0..k);
                    doc_topic[d][topic] += 1;
                    topic_word[topic][w] += 1;
                    topic_total[topic] += 1;
                    topic
                })
                .collect()
        })
        .collect();

    let mut acc_doc_topic = vec![vec![0.0f64; k]; corpus.len()];
    let mut acc_word_topic0 = vec![0.0f64; v];
    let mut sampled_sweeps = 0usize;

    let mut weights = vec![0.0f64; k];
    for sweep in 0..(config.passes + config.iterations) {
        if Instant::now() >= deadline {
            tracing::warn!(sweep, "topic fit exceeded its wall-clock bound");
            return None;
        }

        for (d, ids) in corpus.iter().enumerate() {
            for (pos, &w) in ids.iter().enumerate() {
                let old = assignments[d][pos];
                doc_topic[d][old] -= 1;
                topic_word[old][w] -= 1;
                topic_total[old] -= 1;

                let mut total = 0.0;
                for (topic, weight) in weights.iter_mut().enumerate() {
                    *weight = (doc_topic[d][topic] as f64 + config.alpha)
                        * (topic_word[topic][w] as f64 + config.beta)
                        / (topic_total[topic] as f64 + config.beta * v as f64);
                    total += *weight;
                }

                let mut target = rng.random::<f64>() * total;
                let mut new = k - 1;
                for (topic, weight) in weights.iter().enumerate() {
                    if target < *weight {
                        new = topic;
                        break;
                    }
                    target -= *weight;
                }

                assignments[d][pos] = new;
                doc_topic[d][new] += 1;
                topic_word[new][w] += 1;
                topic_total[new] += 1;
            }
        }

        if sweep >= config.passes {
            sampled_sweeps += 1;
            for (d, counts) in doc_topic.iter().enumerate() {
                for (topic, &count) in counts.iter().enumerate() {
                    acc_doc_topic[d][topic] += count as f64;
                }
            }
            for (w, acc) in acc_word_topic0.iter_mut().enumerate() {
                *acc += topic_word[0][w] as f64;
            }
        }
    }

    // No sampling sweeps configured: fall back to the final state.
    if sampled_sweeps == 0 {
        sampled_sweeps = 1;
        for (d, counts) in doc_topic.iter().enumerate() {
            for (topic, &count) in counts.iter().enumerate() {
                acc_doc_topic[d][topic] += count as f64;
            }
        }
        for (w, acc) in acc_word_topic0.iter_mut().enumerate() {
            *acc += topic_word[0][w] as f64;
        }
    }

    let topic_vectors: Vec<Vec<f64>> = acc_doc_topic
        .iter()
        .map(|counts| {
            let smoothed: Vec<f64> = counts
                .iter()
                .map(|c| c / sampled_sweeps as f64 + config.alpha)
                .collect();
            let total: f64 = smoothed.iter().sum();
            smoothed.into_iter().map(|c| c / total).collect()
        })
        .collect();

    // Ties break toward the first-seen vocabulary term.
    let top = acc_word_topic0
        .iter()
        .enumerate()
        .max_by(|(i, a), (j, b)| {
            a.partial_cmp(b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(j.cmp(&i))
        })
        .map(|(w, _)| vocab[w].to_string())?;

    let similarity = SimilarityMatrix::new(cosine_matrix(&topic_vectors));

    Some(TopicFit {
        top_keyword: top,
        topic_vectors,
        similarity,
    })
}
