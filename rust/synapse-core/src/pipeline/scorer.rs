//! Phrase importance scoring.
//!
//! TF-IDF over a collection of chunks plus a weighted phrase score
//! combining sentence coverage, phrase length, and TF-IDF. Near-duplicate
//! phrases are grouped by embedding cosine; the higher-scored phrase
//! represents its group.

use crate::config::PipelineConfig;
use crate::nlp::embeddings::cosine_f32;
use std::collections::HashMap;

/// TF-IDF index over one document's chunk collection.
#[derive(Debug)]
pub struct TfIdfIndex {
    doc_count: usize,
    document_frequency: HashMap<String, usize>,
    term_counts: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_tokens: Vec<Vec<String>>,
}

impl TfIdfIndex {
    /// Build an index where each chunk's token list is one document.
    #[must_use]
    pub fn new(docs: Vec<Vec<String>>) -> Self {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut term_counts = Vec::with_capacity(docs.len());
        let mut doc_lens = Vec::with_capacity(docs.len());

        for tokens in &docs {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *counts.entry(token.clone()).or_insert(0) += 1;
            }
            for term in counts.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            term_counts.push(counts);
        }

        Self {
            doc_count: docs.len(),
            document_frequency,
            term_counts,
            doc_lens,
            doc_tokens: docs,
        }
    }

    /// TF-IDF of a term within one chunk; 0 for unseen terms.
    #[must_use]
    pub fn score(&self, term: &str, doc: usize) -> f64 {
        let Some(counts) = self.term_counts.get(doc) else {
            return 0.0;
        };
        let count = counts.get(term).copied().unwrap_or(0);
        if count == 0 {
            // Multiword phrases that never appear verbatim fall back to the
            // mean of their component words.
            let words: Vec<&str> = term.split_whitespace().collect();
            if words.len() > 1 {
                let sum: f64 = words.iter().map(|w| self.score(w, doc)).sum();
                return sum / words.len() as f64;
            }
            return 0.0;
        }

        let tf = count as f64 / self.doc_lens[doc].max(1) as f64;
        let df = self.document_frequency.get(term).copied().unwrap_or(1);
        let idf = (1.0 + self.doc_count as f64 / df as f64).ln();
        tf * idf
    }

    /// Highest-scoring term of one chunk; ties go to the term appearing
    /// earliest in the chunk.
    #[must_use]
    pub fn top_keyword(&self, doc: usize) -> Option<String> {
        let tokens = self.doc_tokens.get(doc)?;
        let mut best: Option<(&str, f64)> = None;
        let mut seen = std::collections::HashSet::new();
        for token in tokens {
            if !seen.insert(token.as_str()) {
                continue;
            }
            let score = self.score(token, doc);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((token, score));
            }
        }
        best.map(|(term, _)| term.to_string())
    }

    /// Number of indexed chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_count
    }

    /// True when no chunks were indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}

/// A phrase with its containing sentences and importance score.
#[derive(Debug, Clone)]
pub struct ScoredPhrase {
    /// The phrase text.
    pub phrase: String,
    /// Document-wide indices of sentences containing the phrase.
    pub sentence_indices: Vec<usize>,
    /// Weighted importance score.
    pub score: f64,
}

/// Score phrases of one chunk and sort them by descending score.
///
/// `phrase_info` pairs each phrase with its containing sentence indices, in
/// first-occurrence order; equal scores keep that order.
#[must_use]
pub fn score_phrases(
    phrase_info: &[(String, Vec<usize>)],
    tfidf: &TfIdfIndex,
    doc: usize,
    config: &PipelineConfig,
) -> Vec<ScoredPhrase> {
    let mut scored: Vec<(usize, ScoredPhrase)> = phrase_info
        .iter()
        .enumerate()
        .map(|(order, (phrase, indices))| {
            let score = config.weight_sentence_count * indices.len() as f64
                + config.weight_length * phrase.chars().count() as f64
                + config.weight_tfidf * tfidf.score(phrase, doc);
            (
                order,
                ScoredPhrase {
                    phrase: phrase.clone(),
                    sentence_indices: indices.clone(),
                    score,
                },
            )
        })
        .collect();

    scored.sort_by(|(ia, a), (ib, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ia.cmp(ib))
    });
    scored.into_iter().map(|(_, phrase)| phrase).collect()
}

/// A near-duplicate group over indices into a scored phrase slice.
#[derive(Debug, Clone)]
pub struct PhraseGroup {
    /// Index of the representative (the highest-scored member).
    pub representative: usize,
    /// Indices of the other members.
    pub members: Vec<usize>,
}

/// Group phrases whose embedding cosine reaches the threshold.
///
/// `scored` must already be sorted by descending score so the greedy pass
/// picks the higher-scored phrase as representative.
#[must_use]
pub fn group_near_duplicates(
    scored: &[ScoredPhrase],
    embeddings: &[Vec<f32>],
    threshold: f64,
) -> Vec<PhraseGroup> {
    let mut grouped = vec![false; scored.len()];
    let mut groups = Vec::new();

    for i in 0..scored.len() {
        if grouped[i] {
            continue;
        }
        grouped[i] = true;
        let mut members = Vec::new();
        for j in (i + 1)..scored.len() {
            if grouped[j] {
                continue;
            }
            if cosine_f32(&embeddings[i], &embeddings[j]) >= threshold {
                grouped[j] = true;
                members.push(j);
            }
        }
        groups.push(PhraseGroup {
            representative: i,
            members,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::embeddings::{EmbeddingProvider, HashedNgramEmbedder};

    fn docs() -> Vec<Vec<String>> {
        vec![
            vec!["alpha".into(), "beta".into(), "alpha".into()],
            vec!["gamma".into(), "delta".into()],
            vec!["alpha".into(), "gamma".into()],
        ]
    }

    #[test]
    fn test_rare_terms_outscore_common_ones() {
        let index = TfIdfIndex::new(docs());
        // "delta" appears in one chunk, "alpha" in two.
        assert!(index.score("delta", 1) > index.score("gamma", 1));
    }

    #[test]
    fn test_unseen_term_scores_zero() {
        let index = TfIdfIndex::new(docs());
        assert!(index.score("omega", 0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_top_keyword_prefers_repeated_rare_term() {
        let index = TfIdfIndex::new(docs());
        assert_eq!(index.top_keyword(0), Some("alpha".to_string()));
    }

    #[test]
    fn test_top_keyword_tie_goes_to_earlier_term() {
        let index = TfIdfIndex::new(vec![vec!["one".into(), "two".into()]]);
        assert_eq!(index.top_keyword(0), Some("one".to_string()));
    }

    #[test]
    fn test_score_phrases_orders_by_score() {
        let index = TfIdfIndex::new(vec![vec!["alpha".into(), "beta".into()]]);
        let info = vec![
            ("beta".to_string(), vec![0]),
            ("alpha".to_string(), vec![0, 1, 2]),
        ];
        let scored = score_phrases(&info, &index, 0, &PipelineConfig::default());
        assert_eq!(scored[0].phrase, "alpha");
    }

    #[test]
    fn test_equal_scores_keep_occurrence_order() {
        let index = TfIdfIndex::new(vec![Vec::new()]);
        let info = vec![
            ("aa".to_string(), vec![0]),
            ("bb".to_string(), vec![1]),
        ];
        let scored = score_phrases(&info, &index, 0, &PipelineConfig::default());
        assert_eq!(scored[0].phrase, "aa");
    }

    #[test]
    fn test_grouping_picks_higher_scored_representative() {
        let embedder = HashedNgramEmbedder::new(256);
        let phrases = ["quantum computing", "quantum computing", "weather"];
        let scored: Vec<ScoredPhrase> = phrases
            .iter()
            .enumerate()
            .map(|(i, p)| ScoredPhrase {
                phrase: (*p).to_string(),
                sentence_indices: vec![i],
                score: 10.0 - i as f64,
            })
            .collect();
        let embeddings: Vec<Vec<f32>> = phrases.iter().map(|p| embedder.embed(p)).collect();

        let groups = group_near_duplicates(&scored, &embeddings, 0.85);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].representative, 0);
        assert_eq!(groups[0].members, vec![1]);
        assert!(groups[1].members.is_empty());
    }
}
