//! Persisted project graph with idempotent MERGE semantics.
//!
//! SQLite emulation of a labelled property graph: node identity is
//! `(name, brain_id)`, edge identity is `(source, target, relation,
//! brain_id)`. Merging an existing node updates its label and unions the
//! provenance record lists with structural deduplication. A batch is
//! transactional; merges are serialized per project so list unions always
//! observe a consistent prior state.

use crate::error::StoreError;
use crate::graph::{Edge, GraphBatch, KeywordNode, MergeStats, SourceRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

/// SQLite schema for the project graph.
const GRAPH_SCHEMA: &str = r"
-- Keyword nodes, one row per (name, project)
CREATE TABLE IF NOT EXISTS nodes (
    name TEXT NOT NULL,
    brain_id TEXT NOT NULL,
    label TEXT NOT NULL,
    descriptions TEXT NOT NULL,
    original_sentences TEXT NOT NULL,
    source_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (name, brain_id)
);
CREATE INDEX IF NOT EXISTS idx_nodes_brain ON nodes(brain_id);

-- Labelled edges, one row per (source, target, relation, project)
CREATE TABLE IF NOT EXISTS edges (
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    relation TEXT NOT NULL,
    brain_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (source, target, relation, brain_id)
);
CREATE INDEX IF NOT EXISTS idx_edges_brain ON edges(brain_id);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(brain_id, source_id);
";

/// Persistent graph store addressed only through MERGE semantics.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge a batch of nodes and edges into a project graph.
    ///
    /// Idempotent: merging the same batch twice yields the same persisted
    /// state. Either the whole batch is persisted or none of it. A single
    /// attempt; callers own the retry policy for
    /// [`StoreError::Transient`] failures.
    ///
    /// # Errors
    ///
    /// Returns an error when the database is busy, when an edge references
    /// a node missing from the project graph, or on any other database
    /// failure.
    async fn merge(&self, batch: &GraphBatch, project_id: &str) -> Result<MergeStats, StoreError>;

    /// Remove exactly one source's contributions from a project graph.
    ///
    /// Edges tagged with the source are deleted; nodes lose only the
    /// matching provenance records and are deleted when the records run
    /// out.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    async fn remove_source(&self, source_id: &str, project_id: &str) -> Result<(), StoreError>;

    /// Load a whole project graph, nodes sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    async fn project_graph(
        &self,
        project_id: &str,
    ) -> Result<(Vec<KeywordNode>, Vec<Edge>), StoreError>;

    /// Load the sub-graph within `depth` undirected hops of the seed names.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    async fn neighborhood(
        &self,
        project_id: &str,
        names: &[String],
        depth: usize,
    ) -> Result<(Vec<KeywordNode>, Vec<Edge>), StoreError>;
}

/// SQLite-backed [`GraphStore`].
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
    project_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraphStore").finish_non_exhaustive()
    }
}

impl SqliteGraphStore {
    /// Open (or create) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(GRAPH_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            project_locks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Per-project critical section guarding all writes.
    async fn project_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        Arc::clone(
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            job(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn merge(&self, batch: &GraphBatch, project_id: &str) -> Result<MergeStats, StoreError> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let batch = batch.clone();
        let project = project_id.to_string();
        self.run_blocking(move |conn| merge_batch(conn, &batch, &project))
            .await
    }

    async fn remove_source(&self, source_id: &str, project_id: &str) -> Result<(), StoreError> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let source = source_id.to_string();
        let project = project_id.to_string();
        self.run_blocking(move |conn| remove_source_rows(conn, &source, &project))
            .await
    }

    async fn project_graph(
        &self,
        project_id: &str,
    ) -> Result<(Vec<KeywordNode>, Vec<Edge>), StoreError> {
        let project = project_id.to_string();
        self.run_blocking(move |conn| load_graph(conn, &project))
            .await
    }

    async fn neighborhood(
        &self,
        project_id: &str,
        names: &[String],
        depth: usize,
    ) -> Result<(Vec<KeywordNode>, Vec<Edge>), StoreError> {
        let (nodes, edges) = self.project_graph(project_id).await?;

        let mut reachable: HashSet<String> = names.iter().cloned().collect();
        let mut frontier: VecDeque<(String, usize)> =
            names.iter().map(|n| (n.clone(), 0)).collect();
        while let Some((name, dist)) = frontier.pop_front() {
            if dist >= depth {
                continue;
            }
            for edge in &edges {
                let next = if edge.source == name {
                    &edge.target
                } else if edge.target == name {
                    &edge.source
                } else {
                    continue;
                };
                if reachable.insert(next.clone()) {
                    frontier.push_back((next.clone(), dist + 1));
                }
            }
        }

        let nodes = nodes
            .into_iter()
            .filter(|n| reachable.contains(&n.name))
            .collect();
        let edges = edges
            .into_iter()
            .filter(|e| reachable.contains(&e.source) && reachable.contains(&e.target))
            .collect();
        Ok((nodes, edges))
    }
}

/// Merge one batch inside a single transaction.
fn merge_batch(
    conn: &mut Connection,
    batch: &GraphBatch,
    project_id: &str,
) -> Result<MergeStats, StoreError> {
    let tx = conn.transaction()?;
    let now = chrono::Utc::now().to_rfc3339();
    let mut stats = MergeStats::default();

    for node in &batch.nodes {
        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT descriptions, original_sentences FROM nodes
                 WHERE name = ?1 AND brain_id = ?2",
                params![node.name, project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((desc_json, orig_json)) = existing {
            let mut descriptions: Vec<SourceRecord> = serde_json::from_str(&desc_json)?;
            let mut originals: Vec<SourceRecord> = serde_json::from_str(&orig_json)?;
            union_records(&mut descriptions, &node.descriptions);
            union_records(&mut originals, &node.original_sentences);

            tx.execute(
                "UPDATE nodes SET label = ?3, descriptions = ?4, original_sentences = ?5,
                        updated_at = ?6
                 WHERE name = ?1 AND brain_id = ?2",
                params![
                    node.name,
                    project_id,
                    node.label,
                    serde_json::to_string(&descriptions)?,
                    serde_json::to_string(&originals)?,
                    now,
                ],
            )?;
        } else {
            tx.execute(
                "INSERT INTO nodes
                     (name, brain_id, label, descriptions, original_sentences,
                      source_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    node.name,
                    project_id,
                    node.label,
                    serde_json::to_string(&node.descriptions)?,
                    serde_json::to_string(&node.original_sentences)?,
                    node.source_id,
                    now,
                ],
            )?;
            stats.nodes_created += 1;
        }
    }

    // Edges need both endpoints. All batch nodes are in by now, so one
    // deterministic retry pass is enough to absorb ordering within the
    // batch; anything still missing is a real error.
    let mut pending: Vec<&Edge> = batch.edges.iter().collect();
    for _pass in 0..2 {
        let mut missing = Vec::new();
        for edge in pending {
            if node_exists(&tx, &edge.source, project_id)?
                && node_exists(&tx, &edge.target, project_id)?
            {
                let inserted = tx.execute(
                    "INSERT INTO edges (source, target, relation, brain_id, source_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (source, target, relation, brain_id) DO NOTHING",
                    params![
                        edge.source,
                        edge.target,
                        edge.relation,
                        project_id,
                        edge.source_id,
                        now,
                    ],
                )?;
                stats.edges_created += inserted;
            } else {
                missing.push(edge);
            }
        }
        pending = missing;
        if pending.is_empty() {
            break;
        }
    }
    if let Some(edge) = pending.first() {
        // Dropping the transaction rolls the whole batch back.
        return Err(StoreError::MissingEndpoint {
            source_node: edge.source.clone(),
            target: edge.target.clone(),
        });
    }

    tx.commit()?;
    Ok(stats)
}

fn node_exists(
    tx: &rusqlite::Transaction<'_>,
    name: &str,
    project_id: &str,
) -> Result<bool, StoreError> {
    Ok(tx
        .query_row(
            "SELECT 1 FROM nodes WHERE name = ?1 AND brain_id = ?2",
            params![name, project_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Append incoming records that are not structurally present yet.
fn union_records(existing: &mut Vec<SourceRecord>, incoming: &[SourceRecord]) {
    for record in incoming {
        if !existing.contains(record) {
            existing.push(record.clone());
        }
    }
}

fn remove_source_rows(
    conn: &mut Connection,
    source_id: &str,
    project_id: &str,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;

    tx.execute(
        "DELETE FROM edges WHERE brain_id = ?1 AND source_id = ?2",
        params![project_id, source_id],
    )?;

    let rows: Vec<(String, String, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT name, descriptions, original_sentences, source_id
             FROM nodes WHERE brain_id = ?1",
        )?;
        let mapped = stmt.query_map(params![project_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        mapped.collect::<Result<_, _>>()?
    };

    let now = chrono::Utc::now().to_rfc3339();
    let mut deleted = Vec::new();
    for (name, desc_json, orig_json, node_source) in rows {
        let mut descriptions: Vec<SourceRecord> = serde_json::from_str(&desc_json)?;
        let mut originals: Vec<SourceRecord> = serde_json::from_str(&orig_json)?;
        let before = descriptions.len() + originals.len();
        descriptions.retain(|r| r.source_id != source_id);
        originals.retain(|r| r.source_id != source_id);
        let stripped = descriptions.len() + originals.len() < before;

        let emptied = descriptions.is_empty() && originals.is_empty();
        if emptied && (stripped || node_source == source_id) {
            tx.execute(
                "DELETE FROM nodes WHERE name = ?1 AND brain_id = ?2",
                params![name, project_id],
            )?;
            deleted.push(name);
        } else if stripped {
            tx.execute(
                "UPDATE nodes SET descriptions = ?3, original_sentences = ?4, updated_at = ?5
                 WHERE name = ?1 AND brain_id = ?2",
                params![
                    name,
                    project_id,
                    serde_json::to_string(&descriptions)?,
                    serde_json::to_string(&originals)?,
                    now,
                ],
            )?;
        }
    }

    // Edges pointing at deleted nodes would dangle; drop them too.
    for name in deleted {
        tx.execute(
            "DELETE FROM edges WHERE brain_id = ?1 AND (source = ?2 OR target = ?2)",
            params![project_id, name],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn load_graph(
    conn: &mut Connection,
    project_id: &str,
) -> Result<(Vec<KeywordNode>, Vec<Edge>), StoreError> {
    let nodes: Vec<KeywordNode> = {
        let mut stmt = conn.prepare(
            "SELECT name, label, descriptions, original_sentences, source_id
             FROM nodes WHERE brain_id = ?1 ORDER BY name",
        )?;
        let mapped = stmt.query_map(params![project_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let raw: Vec<_> = mapped.collect::<Result<_, _>>()?;
        raw.into_iter()
            .map(|(name, label, desc_json, orig_json, source_id)| {
                Ok(KeywordNode {
                    name,
                    label,
                    descriptions: serde_json::from_str(&desc_json)?,
                    original_sentences: serde_json::from_str(&orig_json)?,
                    source_id,
                })
            })
            .collect::<Result<_, StoreError>>()?
    };

    let edges: Vec<Edge> = {
        let mut stmt = conn.prepare(
            "SELECT source, target, relation, source_id
             FROM edges WHERE brain_id = ?1 ORDER BY source, target, relation",
        )?;
        let mapped = stmt.query_map(params![project_id], |row| {
            Ok(Edge {
                source: row.get(0)?,
                target: row.get(1)?,
                relation: row.get(2)?,
                source_id: row.get(3)?,
            })
        })?;
        mapped.collect::<Result<_, _>>()?
    };

    Ok((nodes, edges))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source_id: &str, data: &str) -> SourceRecord {
        SourceRecord {
            data: data.to_string(),
            source_id: source_id.to_string(),
            sentence_indices: vec![0],
        }
    }

    fn sample_batch(source_id: &str) -> GraphBatch {
        let mut batch = GraphBatch::new();
        let mut root = KeywordNode::bare("letter*", source_id);
        root.label = "letter*".to_string();
        batch.push_node(root);

        let mut alpha = KeywordNode::bare("alpha", source_id);
        alpha.descriptions.push(record(source_id, "Alpha is a letter."));
        alpha
            .original_sentences
            .push(record(source_id, "Alpha is a letter."));
        batch.push_node(alpha);

        batch.push_edge(Edge {
            source: "letter*".to_string(),
            target: "alpha".to_string(),
            relation: "Alpha is a letter.".to_string(),
            source_id: source_id.to_string(),
        });
        batch
    }

    #[tokio::test]
    async fn test_merge_counts_new_rows() -> Result<(), StoreError> {
        let store = SqliteGraphStore::in_memory()?;
        let stats = store.merge(&sample_batch("s1"), "p1").await?;
        assert_eq!(stats.nodes_created, 2);
        assert_eq!(stats.edges_created, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() -> Result<(), StoreError> {
        let store = SqliteGraphStore::in_memory()?;
        let batch = sample_batch("s1");
        store.merge(&batch, "p1").await?;
        let (nodes_once, edges_once) = store.project_graph("p1").await?;

        let stats = store.merge(&batch, "p1").await?;
        assert_eq!(stats, MergeStats::default());

        let (nodes_twice, edges_twice) = store.project_graph("p1").await?;
        assert_eq!(nodes_once.len(), nodes_twice.len());
        assert_eq!(edges_once.len(), edges_twice.len());
        for (a, b) in nodes_once.iter().zip(&nodes_twice) {
            assert_eq!(a.descriptions.len(), b.descriptions.len());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_unions_records_across_sources() -> Result<(), StoreError> {
        let store = SqliteGraphStore::in_memory()?;
        store.merge(&sample_batch("s1"), "p1").await?;

        let mut second = GraphBatch::new();
        let mut alpha = KeywordNode::bare("alpha", "s2");
        alpha.descriptions.push(record("s2", "Alpha leads the list."));
        alpha
            .original_sentences
            .push(record("s2", "Alpha leads the list."));
        second.push_node(alpha);
        store.merge(&second, "p1").await?;

        let (nodes, _) = store.project_graph("p1").await?;
        let alpha = nodes.iter().find(|n| n.name == "alpha").unwrap();
        assert_eq!(alpha.descriptions.len(), 2);
        // First writer keeps node ownership.
        assert_eq!(alpha.source_id, "s1");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_endpoint_rolls_back_batch() -> Result<(), StoreError> {
        let store = SqliteGraphStore::in_memory()?;
        let mut batch = sample_batch("s1");
        batch.edges.push(Edge {
            source: "letter*".to_string(),
            target: "ghost".to_string(),
            relation: "rel".to_string(),
            source_id: "s1".to_string(),
        });

        let result = store.merge(&batch, "p1").await;
        assert!(matches!(result, Err(StoreError::MissingEndpoint { .. })));

        let (nodes, edges) = store.project_graph("p1").await?;
        assert!(nodes.is_empty());
        assert!(edges.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_source_keeps_other_contributions() -> Result<(), StoreError> {
        let store = SqliteGraphStore::in_memory()?;
        store.merge(&sample_batch("s1"), "p1").await?;

        let mut second = GraphBatch::new();
        let mut alpha = KeywordNode::bare("alpha", "s2");
        alpha.descriptions.push(record("s2", "Alpha leads the list."));
        second.push_node(alpha);
        store.merge(&second, "p1").await?;

        store.remove_source("s1", "p1").await?;
        let (nodes, edges) = store.project_graph("p1").await?;

        let alpha = nodes.iter().find(|n| n.name == "alpha").unwrap();
        assert_eq!(alpha.descriptions.len(), 1);
        assert_eq!(alpha.descriptions[0].source_id, "s2");
        // The root node and the s1 edge are gone.
        assert!(!nodes.iter().any(|n| n.name == "letter*"));
        assert!(edges.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_projects_are_isolated() -> Result<(), StoreError> {
        let store = SqliteGraphStore::in_memory()?;
        store.merge(&sample_batch("s1"), "p1").await?;
        store.merge(&sample_batch("s1"), "p2").await?;

        store.remove_source("s1", "p1").await?;
        let (nodes_p1, _) = store.project_graph("p1").await?;
        let (nodes_p2, _) = store.project_graph("p2").await?;
        assert!(nodes_p1.is_empty());
        assert_eq!(nodes_p2.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_neighborhood_limits_depth() -> Result<(), StoreError> {
        let store = SqliteGraphStore::in_memory()?;
        let mut batch = GraphBatch::new();
        for name in ["a", "b", "c", "d"] {
            batch.push_node(KeywordNode::bare(name, "s1"));
        }
        for (source, target) in [("a", "b"), ("b", "c"), ("c", "d")] {
            batch.push_edge(Edge {
                source: source.to_string(),
                target: target.to_string(),
                relation: "rel".to_string(),
                source_id: "s1".to_string(),
            });
        }
        store.merge(&batch, "p1").await?;

        let (nodes, edges) = store
            .neighborhood("p1", &["a".to_string()], 2)
            .await?;
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(edges.len(), 2);
        Ok(())
    }
}
