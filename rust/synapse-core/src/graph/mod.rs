//! Graph data model.
//!
//! Nodes and edges produced by the pipeline and merged into the persisted
//! project graph. Provenance records stay typed in memory and are
//! serialized to JSON only at the persistence boundary.

pub mod store;

pub use store::{GraphStore, SqliteGraphStore};

use serde::{Deserialize, Serialize};

/// Which sentences of which source contributed a phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Context text for the contribution.
    pub data: String,
    /// Source document identifier.
    pub source_id: String,
    /// Document-wide indices of the contributing sentences.
    pub sentence_indices: Vec<usize>,
}

/// A concept or hierarchy node.
///
/// Hierarchy roots carry a trailing `*` in `name` and `label` to keep them
/// distinct from concept nodes derived from the same string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordNode {
    /// Node name, unique within a project.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Per-source description records, parallel to `original_sentences`.
    pub descriptions: Vec<SourceRecord>,
    /// Per-source contributing-sentence records.
    pub original_sentences: Vec<SourceRecord>,
    /// Source document that first emitted this node.
    pub source_id: String,
}

impl KeywordNode {
    /// A node with empty provenance lists.
    #[must_use]
    pub fn bare(name: impl Into<String>, source_id: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            descriptions: Vec::new(),
            original_sentences: Vec::new(),
            source_id: source_id.into(),
        }
    }
}

/// A labelled relation between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node name.
    pub source: String,
    /// Target node name.
    pub target: String,
    /// Short human-readable relation label.
    pub relation: String,
    /// Source document that emitted this edge.
    pub source_id: String,
}

/// Strip the hierarchy-root marker from a node name.
#[must_use]
pub fn base_name(name: &str) -> &str {
    name.strip_suffix('*').unwrap_or(name)
}

/// In-memory batch of one source's emissions, merged in a single call.
///
/// Node pushes merge by name so every name appears at most once per batch;
/// edge pushes deduplicate on `(source, target, relation)`.
#[derive(Debug, Clone, Default)]
pub struct GraphBatch {
    /// Nodes in emission order.
    pub nodes: Vec<KeywordNode>,
    /// Edges in emission order.
    pub edges: Vec<Edge>,
}

impl GraphBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, merging provenance records into an existing entry with
    /// the same name.
    pub fn push_node(&mut self, node: KeywordNode) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.name == node.name) {
            for record in node.descriptions {
                if !existing.descriptions.contains(&record) {
                    existing.descriptions.push(record);
                }
            }
            for record in node.original_sentences {
                if !existing.original_sentences.contains(&record) {
                    existing.original_sentences.push(record);
                }
            }
        } else {
            self.nodes.push(node);
        }
    }

    /// Add an edge unless an identical relation is already queued.
    pub fn push_edge(&mut self, edge: Edge) {
        if edge.source == edge.target {
            return;
        }
        let duplicate = self.edges.iter().any(|e| {
            e.source == edge.source && e.target == edge.target && e.relation == edge.relation
        });
        if !duplicate {
            self.edges.push(edge);
        }
    }

    /// True when nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Outcome counters of one merge call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Nodes newly inserted by this call.
    pub nodes_created: usize,
    /// Edges newly inserted by this call.
    pub edges_created: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_strips_marker() {
        assert_eq!(base_name("quantum*"), "quantum");
        assert_eq!(base_name("quantum"), "quantum");
    }

    #[test]
    fn test_push_node_merges_by_name() {
        let mut batch = GraphBatch::new();
        batch.push_node(KeywordNode::bare("quantum", "s1"));

        let mut second = KeywordNode::bare("quantum", "s1");
        second.descriptions.push(SourceRecord {
            data: "Quantum mechanics.".to_string(),
            source_id: "s1".to_string(),
            sentence_indices: vec![0],
        });
        batch.push_node(second.clone());
        batch.push_node(second);

        assert_eq!(batch.nodes.len(), 1);
        assert_eq!(batch.nodes[0].descriptions.len(), 1);
    }

    #[test]
    fn test_push_edge_dedups_and_skips_self_loops() {
        let mut batch = GraphBatch::new();
        let edge = Edge {
            source: "a".to_string(),
            target: "b".to_string(),
            relation: "rel".to_string(),
            source_id: "s1".to_string(),
        };
        batch.push_edge(edge.clone());
        batch.push_edge(edge.clone());
        batch.push_edge(Edge {
            target: "a".to_string(),
            ..edge
        });
        assert_eq!(batch.edges.len(), 1);
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let record = SourceRecord {
            data: "Alpha is a letter.".to_string(),
            source_id: "doc-1".to_string(),
            sentence_indices: vec![1, 2],
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: SourceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
