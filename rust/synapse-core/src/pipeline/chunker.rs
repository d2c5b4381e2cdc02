//! Recursive topic-driven chunking.
//!
//! Top-down divide and conquer over the sentence sequence. Each chunk fits
//! its own topic model; adjacent-sentence similarity against a per-depth
//! threshold decides where the chunk breaks. The threshold starts at the
//! 25th percentile of the root similarity entries and grows by a constant
//! factor per depth, so recursion always bottoms out. Sub-chunks are
//! contiguous and partition their parent, which keeps source order intact
//! all the way down the tree.

use crate::config::PipelineConfig;
use crate::graph::{base_name, Edge, GraphBatch, KeywordNode};
use crate::nlp::topic::{self, SimilarityMatrix, TopicFit};
use crate::nlp::Sentence;
use crate::pipeline::builder::relation_label;
use crate::pipeline::scorer::TfIdfIndex;
use std::collections::HashSet;

/// A chunk the recursion stopped at; input to the chunk graph builder.
#[derive(Debug, Clone)]
pub struct FinalizedChunk {
    /// Document-wide indices of the chunk's sentences, in order.
    pub sentence_indices: Vec<usize>,
    /// Keyword the chunk hangs under (may carry the root `*` marker).
    pub keyword: String,
}

/// Mutable state threaded through the recursion.
///
/// `already_made` holds base names (root marker stripped) of every node
/// emitted so far in this job, preventing duplicate emission within one
/// document.
#[derive(Debug)]
pub struct BuildContext {
    /// Base names of nodes already emitted in this job.
    pub already_made: HashSet<String>,
    /// Source document identifier.
    pub source_id: String,
    /// Name of the root node, once emitted (carries the `*` marker).
    pub root_name: Option<String>,
}

impl BuildContext {
    /// Fresh context for one source.
    #[must_use]
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            already_made: HashSet::new(),
            source_id: source_id.into(),
            root_name: None,
        }
    }

    /// Node name an edge endpoint with this base name must use. The root
    /// keyword only exists as its starred node; everything else is emitted
    /// under its plain name.
    #[must_use]
    pub fn resolve_name(&self, base: &str) -> String {
        match &self.root_name {
            Some(root) if base_name(root) == base => root.clone(),
            _ => base.to_string(),
        }
    }
}

/// Result of running the chunker over a document.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Root topic keyword (without the `*` marker); empty when the root
    /// fit failed and the source produced nothing.
    pub root_keyword: String,
    /// Chunks to feed to the chunk graph builder, in document order.
    pub finalized: Vec<FinalizedChunk>,
}

/// Recursive chunker over one document's sentences.
#[derive(Debug)]
pub struct RecursiveChunker<'a> {
    sentences: &'a [Sentence],
    config: &'a PipelineConfig,
}

impl<'a> RecursiveChunker<'a> {
    /// Create a chunker over the document's analyzed sentences.
    #[must_use]
    pub fn new(sentences: &'a [Sentence], config: &'a PipelineConfig) -> Self {
        Self { sentences, config }
    }

    /// Run from depth 0, emitting hierarchy nodes and edges into `batch`.
    pub fn run(&self, ctx: &mut BuildContext, batch: &mut GraphBatch) -> ChunkOutcome {
        let indices: Vec<usize> = (0..self.sentences.len()).collect();
        let Some(root_fit) = self.fit_chunk(&indices) else {
            tracing::warn!(
                source_id = %ctx.source_id,
                depth = 0,
                "root topic fit failed, emitting nothing for this source"
            );
            return ChunkOutcome::default();
        };
        if root_fit.similarity.is_empty() {
            return ChunkOutcome::default();
        }

        let root_keyword = root_fit.top_keyword.clone();
        let root_name = format!("{root_keyword}*");
        batch.push_node(KeywordNode::bare(root_name.clone(), ctx.source_id.clone()));
        ctx.already_made.insert(root_keyword.clone());
        ctx.root_name = Some(root_name.clone());

        let threshold = percentile(
            root_fit.similarity.upper_triangle(),
            self.config.threshold_percentile,
        );

        let mut finalized = Vec::new();
        self.recurse(
            &indices,
            &root_name,
            threshold,
            0,
            Some(root_fit),
            ctx,
            batch,
            &mut finalized,
        );

        ChunkOutcome {
            root_keyword,
            finalized,
        }
    }

    /// Fit the topic model over one chunk.
    fn fit_chunk(&self, indices: &[usize]) -> Option<TopicFit> {
        let docs: Vec<&[String]> = indices
            .iter()
            .map(|&i| self.sentences[i].tokens.as_slice())
            .collect();
        topic::fit(&docs, &self.config.topic)
    }

    #[allow(
        clippy::too_many_arguments,
        reason = "recursion threads explicit mutable state instead of capturing it"
    )]
    fn recurse(
        &self,
        indices: &[usize],
        parent_keyword: &str,
        threshold: f64,
        depth: usize,
        fit: Option<TopicFit>,
        ctx: &mut BuildContext,
        batch: &mut GraphBatch,
        finalized: &mut Vec<FinalizedChunk>,
    ) {
        let total_tokens: usize = indices
            .iter()
            .map(|&i| self.sentences[i].tokens.len())
            .sum();

        // Too little material to say anything about. The root chunk is the
        // exception: a short document still gets concept nodes.
        if indices.len() <= self.config.min_chunk_sentences
            || total_tokens <= self.config.min_chunk_tokens
        {
            if depth == 0 {
                finalized.push(FinalizedChunk {
                    sentence_indices: indices.to_vec(),
                    keyword: parent_keyword.to_string(),
                });
            }
            return;
        }

        if depth >= self.config.max_depth {
            finalized.push(FinalizedChunk {
                sentence_indices: indices.to_vec(),
                keyword: parent_keyword.to_string(),
            });
            return;
        }

        let fit = match fit.or_else(|| self.fit_chunk(indices)) {
            Some(fit) => fit,
            None => {
                tracing::warn!(
                    source_id = %ctx.source_id,
                    depth,
                    "topic fit failed, finalizing chunk as terminal"
                );
                finalized.push(FinalizedChunk {
                    sentence_indices: indices.to_vec(),
                    keyword: parent_keyword.to_string(),
                });
                return;
            }
        };

        let (groups, effective_threshold) = group_adjacent(
            indices,
            &fit.similarity,
            threshold,
            self.config.max_groups,
        );

        if groups.len() == 1 {
            if indices.len() > self.config.flat_window_sentences {
                tracing::warn!(
                    source_id = %ctx.source_id,
                    depth,
                    sentences = indices.len(),
                    "chunk not splittable at current threshold, using flat windows"
                );
                self.flat_fallback(indices, parent_keyword, ctx, batch, finalized);
            } else {
                finalized.push(FinalizedChunk {
                    sentence_indices: indices.to_vec(),
                    keyword: parent_keyword.to_string(),
                });
            }
            return;
        }

        let index = TfIdfIndex::new(self.group_docs(&groups));
        let next_threshold = effective_threshold * self.config.threshold_growth;

        for (g, group) in groups.iter().enumerate() {
            let keyword = index.top_keyword(g).filter(|kw| !kw.is_empty());
            match keyword {
                Some(keyword) if keyword != base_name(parent_keyword) => {
                    self.emit_hierarchy(parent_keyword, &keyword, group, ctx, batch);
                    self.recurse(
                        group,
                        &keyword,
                        next_threshold,
                        depth + 1,
                        None,
                        ctx,
                        batch,
                        finalized,
                    );
                }
                _ => {
                    self.recurse(
                        group,
                        parent_keyword,
                        next_threshold,
                        depth + 1,
                        None,
                        ctx,
                        batch,
                        finalized,
                    );
                }
            }
        }
    }

    /// Flat non-recursive chunking: consecutive windows under one parent.
    fn flat_fallback(
        &self,
        indices: &[usize],
        parent_keyword: &str,
        ctx: &mut BuildContext,
        batch: &mut GraphBatch,
        finalized: &mut Vec<FinalizedChunk>,
    ) {
        let windows: Vec<&[usize]> = indices.chunks(self.config.flat_window_sentences).collect();
        let window_groups: Vec<Vec<usize>> = windows.iter().map(|w| w.to_vec()).collect();
        let index = TfIdfIndex::new(self.group_docs(&window_groups));

        for (w, window) in windows.iter().enumerate() {
            let keyword = index.top_keyword(w).filter(|kw| !kw.is_empty());
            match keyword {
                Some(keyword) if keyword != base_name(parent_keyword) => {
                    self.emit_hierarchy(parent_keyword, &keyword, window, ctx, batch);
                    finalized.push(FinalizedChunk {
                        sentence_indices: window.to_vec(),
                        keyword,
                    });
                }
                _ => {
                    finalized.push(FinalizedChunk {
                        sentence_indices: window.to_vec(),
                        keyword: parent_keyword.to_string(),
                    });
                }
            }
        }
    }

    /// Emit the hierarchy node (unless already made) and the parent edge.
    fn emit_hierarchy(
        &self,
        parent_keyword: &str,
        keyword: &str,
        group: &[usize],
        ctx: &mut BuildContext,
        batch: &mut GraphBatch,
    ) {
        if !ctx.already_made.contains(keyword) {
            batch.push_node(KeywordNode::bare(keyword, ctx.source_id.clone()));
            ctx.already_made.insert(keyword.to_string());
        }

        let texts: Vec<&str> = group
            .iter()
            .map(|&i| self.sentences[i].text.as_str())
            .collect();
        let relation = relation_label(
            &texts,
            base_name(parent_keyword),
            keyword,
            self.config.relation_max_chars,
        )
        .unwrap_or_else(|| "contains".to_string());

        batch.push_edge(Edge {
            source: parent_keyword.to_string(),
            target: ctx.resolve_name(keyword),
            relation,
            source_id: ctx.source_id.clone(),
        });
    }

    fn group_docs(&self, groups: &[Vec<usize>]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .flat_map(|&i| self.sentences[i].tokens.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Adjacency-only chain-break grouping.
///
/// Walks left to right and extends the current group while the adjacent
/// similarity meets the threshold. For wide chunks the threshold is clamped
/// to the 9th-smallest adjacent similarity, which bounds one split to at
/// most `max_groups` groups. Returns the contiguous groups and the
/// threshold actually used.
pub(crate) fn group_adjacent(
    indices: &[usize],
    similarity: &SimilarityMatrix,
    threshold: f64,
    max_groups: usize,
) -> (Vec<Vec<usize>>, f64) {
    let n = indices.len();
    if n == 0 {
        return (Vec::new(), threshold);
    }

    let mut effective = threshold;
    // The clamp needs at least two groups to bound anything; a smaller
    // configured bound leaves the threshold as is.
    if max_groups >= 2 && n > max_groups {
        let mut adjacent: Vec<f64> = (1..n).map(|i| similarity.get(i, i - 1)).collect();
        adjacent.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        effective = effective.min(adjacent[max_groups - 2]);
    }

    let mut groups = Vec::new();
    let mut current = vec![indices[0]];
    for i in 1..n {
        if similarity.get(i, i - 1) >= effective {
            current.push(indices[i]);
        } else {
            groups.push(std::mem::take(&mut current));
            current.push(indices[i]);
        }
    }
    groups.push(current);
    (groups, effective)
}

/// Percentile by ascending sort and floor indexing; 0 for no values.
fn percentile(mut values: Vec<f64>, p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((values.len() as f64 * p).floor() as usize).min(values.len() - 1);
    values[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::Lang;

    fn matrix(rows: Vec<Vec<f64>>) -> SimilarityMatrix {
        SimilarityMatrix::new(rows)
    }

    fn sentence(index: usize, text: &str, tokens: &[&str]) -> Sentence {
        Sentence {
            index,
            text: text.to_string(),
            lang: Lang::En,
            tokens: tokens.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    #[test]
    fn test_grouping_breaks_chain_below_threshold() {
        let sim = matrix(vec![
            vec![1.0, 0.9, 0.1, 0.1],
            vec![0.9, 1.0, 0.2, 0.1],
            vec![0.1, 0.2, 1.0, 0.95],
            vec![0.1, 0.1, 0.95, 1.0],
        ]);
        let (groups, _) = group_adjacent(&[4, 5, 6, 7], &sim, 0.5, 10);
        assert_eq!(groups, vec![vec![4, 5], vec![6, 7]]);
    }

    #[test]
    fn test_groups_partition_parent_in_order() {
        let sim = matrix(vec![
            vec![1.0, 0.1, 0.1],
            vec![0.1, 1.0, 0.9],
            vec![0.1, 0.9, 1.0],
        ]);
        let parent = [10, 11, 12];
        let (groups, _) = group_adjacent(&parent, &sim, 0.5, 10);
        let flattened: Vec<usize> = groups.iter().flatten().copied().collect();
        assert_eq!(flattened, parent);
    }

    #[test]
    fn test_grouping_bounded_by_max_groups() {
        // Every adjacent similarity is distinct and below the threshold, so
        // without the clamp this would produce 20 groups.
        let n = 20;
        let mut rows = vec![vec![0.0; n]; n];
        for (i, row) in rows.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        for i in 1..n {
            let sim = 0.01 * i as f64;
            rows[i][i - 1] = sim;
            rows[i - 1][i] = sim;
        }
        let indices: Vec<usize> = (0..n).collect();
        let (groups, effective) = group_adjacent(&indices, &matrix(rows), 0.9, 10);
        assert!(groups.len() <= 10);
        assert!(effective < 0.9);
    }

    #[test]
    fn test_degenerate_max_groups_does_not_clamp() {
        let sim = matrix(vec![
            vec![1.0, 0.2, 0.1],
            vec![0.2, 1.0, 0.3],
            vec![0.1, 0.3, 1.0],
        ]);
        let (groups, effective) = group_adjacent(&[0, 1, 2], &sim, 0.5, 1);
        assert_eq!(groups.len(), 3);
        assert!((effective - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentile_floor_indexing() {
        let values = vec![0.4, 0.1, 0.3, 0.2];
        assert!((percentile(values, 0.25) - 0.2).abs() < 1e-12);
        assert!((percentile(vec![0.7], 0.25) - 0.7).abs() < 1e-12);
        assert!(percentile(Vec::new(), 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_short_document_finalizes_at_root() {
        let sentences = vec![
            sentence(0, "Alpha beta gamma.", &["alpha beta gamma"]),
            sentence(1, "Alpha is a letter.", &["alpha", "letter"]),
            sentence(2, "Beta is also a letter.", &["beta", "letter"]),
        ];
        let config = PipelineConfig::default();
        let chunker = RecursiveChunker::new(&sentences, &config);
        let mut ctx = BuildContext::new("s1");
        let mut batch = GraphBatch::new();

        let outcome = chunker.run(&mut ctx, &mut batch);

        assert!(!outcome.root_keyword.is_empty());
        assert_eq!(outcome.finalized.len(), 1);
        assert_eq!(outcome.finalized[0].sentence_indices, vec![0, 1, 2]);
        // The root node is emitted with the marker, and its base name is
        // cached so no plain concept node can duplicate it later.
        assert_eq!(batch.nodes.len(), 1);
        assert!(batch.nodes[0].name.ends_with('*'));
        assert!(ctx.already_made.contains(&outcome.root_keyword));
    }

    #[test]
    fn test_empty_document_is_noop() {
        let sentences: Vec<Sentence> = Vec::new();
        let config = PipelineConfig::default();
        let chunker = RecursiveChunker::new(&sentences, &config);
        let mut ctx = BuildContext::new("s1");
        let mut batch = GraphBatch::new();

        let outcome = chunker.run(&mut ctx, &mut batch);
        assert!(outcome.root_keyword.is_empty());
        assert!(outcome.finalized.is_empty());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_emitted_names_unique_within_job() {
        // Two clearly separated topic blocks, enough sentences to recurse.
        let mut sentences = Vec::new();
        for i in 0..6 {
            sentences.push(sentence(
                i,
                "Quantum physics studies particles.",
                &["quantum", "particles", "physics"],
            ));
        }
        for i in 6..12 {
            sentences.push(sentence(
                i,
                "Cooking pasta needs boiling water.",
                &["cooking", "pasta", "water"],
            ));
        }
        let config = PipelineConfig::default();
        let chunker = RecursiveChunker::new(&sentences, &config);
        let mut ctx = BuildContext::new("s1");
        let mut batch = GraphBatch::new();
        chunker.run(&mut ctx, &mut batch);

        let mut seen = HashSet::new();
        for node in &batch.nodes {
            assert!(seen.insert(base_name(&node.name).to_string()));
        }
    }
}
