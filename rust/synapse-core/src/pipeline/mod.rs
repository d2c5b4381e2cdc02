//! Pipeline orchestration.
//!
//! Drives one `(source_id, project_id, text)` job end to end:
//!
//! 1. Segment and analyze sentences
//! 2. Recursively chunk and emit the topic hierarchy
//! 3. Emit concept nodes per finalized chunk
//! 4. Merge the in-memory batch into the persisted project graph
//!
//! Stages 1-3 are CPU-bound and run on the blocking pool; the merge is
//! serialized per project inside the store. Cancellation is cooperative and
//! checked between build and merge; a merge in flight is never interrupted.

pub mod builder;
pub mod chunker;
pub mod scorer;

pub use chunker::{BuildContext, ChunkOutcome, FinalizedChunk, RecursiveChunker};
pub use scorer::{ScoredPhrase, TfIdfIndex};

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result, StoreError};
use crate::graph::{GraphBatch, GraphStore, MergeStats};
use crate::nlp::{HashedNgramEmbedder, Sentence};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Completion report of one ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// Nodes newly inserted into the project graph.
    pub nodes_created: usize,
    /// Edges newly inserted into the project graph.
    pub edges_created: usize,
    /// Finalized chunks produced by the recursive chunker.
    pub chunks: usize,
    /// Root topic keyword of the document (empty on a zero-emit run).
    pub root_keyword: String,
    /// Wall-clock duration of the whole job.
    pub duration_ms: u64,
}

/// One document's build result, before the merge.
#[derive(Debug, Default)]
struct BuiltDocument {
    batch: GraphBatch,
    chunks: usize,
    root_keyword: String,
}

/// Knowledge graph construction service.
///
/// Holds the shared store; topic model, embedder, and TF-IDF instances are
/// created per job so vocabularies never leak between sources.
pub struct GraphPipeline {
    store: Arc<dyn GraphStore>,
    config: PipelineConfig,
}

impl std::fmt::Debug for GraphPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GraphPipeline {
    /// Create a pipeline with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self::with_config(store, PipelineConfig::default())
    }

    /// Create a pipeline with an explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn GraphStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest one source document into a project graph.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InputRejected`] for blank input and
    /// [`IngestError::Store`] when the merge fails; in both cases the
    /// project graph is unchanged.
    pub async fn ingest(
        &self,
        source_id: &str,
        project_id: &str,
        raw_text: &str,
    ) -> Result<IngestReport> {
        self.ingest_with_cancel(source_id, project_id, raw_text, &CancellationToken::new())
            .await
    }

    /// Ingest with cooperative cancellation.
    ///
    /// Cancellation between build and merge discards the batch and returns
    /// [`IngestError::Cancelled`]; once the merge started it runs to
    /// completion.
    ///
    /// # Errors
    ///
    /// As [`Self::ingest`], plus [`IngestError::Cancelled`].
    pub async fn ingest_with_cancel(
        &self,
        source_id: &str,
        project_id: &str,
        raw_text: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        if raw_text.trim().is_empty() {
            return Err(IngestError::InputRejected {
                reason: "raw text is empty".to_string(),
            });
        }

        let run_id = uuid::Uuid::new_v4();
        tracing::info!(%run_id, source_id, project_id, "ingest started");

        let config = self.config.clone();
        let source = source_id.to_string();
        let text = raw_text.to_string();
        let built = tokio::task::spawn_blocking(move || build_document(&config, &source, &text))
            .await
            .map_err(|e| IngestError::Task(e.to_string()))?;

        if cancel.is_cancelled() {
            tracing::info!(%run_id, source_id, "cancelled before merge, batch discarded");
            return Err(IngestError::Cancelled);
        }

        let stats = if built.batch.is_empty() {
            MergeStats::default()
        } else {
            self.with_transient_retry("merge", project_id, || {
                self.store.merge(&built.batch, project_id)
            })
            .await?
        };

        let report = IngestReport {
            nodes_created: stats.nodes_created,
            edges_created: stats.edges_created,
            chunks: built.chunks,
            root_keyword: built.root_keyword,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            %run_id,
            source_id,
            project_id,
            nodes_created = report.nodes_created,
            edges_created = report.edges_created,
            chunks = report.chunks,
            duration_ms = report.duration_ms,
            "ingest complete"
        );
        Ok(report)
    }

    /// Remove one source's contributions from a project graph.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Store`] on persistence failure.
    pub async fn remove_source(&self, source_id: &str, project_id: &str) -> Result<()> {
        self.with_transient_retry("remove_source", project_id, || {
            self.store.remove_source(source_id, project_id)
        })
        .await?;
        tracing::info!(source_id, project_id, "source removed from project graph");
        Ok(())
    }

    /// Run a store operation, retrying transient failures with exponential
    /// backoff per the configured policy.
    async fn with_transient_retry<T, F, Fut>(
        &self,
        operation: &str,
        project_id: &str,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let mut backoff = self.config.merge_backoff;
        let mut attempt = 0;
        loop {
            match op().await {
                Err(StoreError::Transient(err)) if attempt < self.config.merge_retries => {
                    attempt += 1;
                    tracing::warn!(
                        project_id,
                        operation,
                        attempt,
                        error = %err,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                other => return Ok(other?),
            }
        }
    }

    /// Load a whole project graph for rendering.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Store`] on persistence failure.
    pub async fn project_graph(
        &self,
        project_id: &str,
    ) -> Result<(Vec<crate::graph::KeywordNode>, Vec<crate::graph::Edge>)> {
        Ok(self.store.project_graph(project_id).await?)
    }

    /// Load the sub-graph around the given node names, for grounding
    /// question answering.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Store`] on persistence failure.
    pub async fn neighborhood(
        &self,
        project_id: &str,
        names: &[String],
        depth: usize,
    ) -> Result<(Vec<crate::graph::KeywordNode>, Vec<crate::graph::Edge>)> {
        Ok(self.store.neighborhood(project_id, names, depth).await?)
    }
}

/// Run the CPU-bound stages for one document.
fn build_document(config: &PipelineConfig, source_id: &str, text: &str) -> BuiltDocument {
    let sentences = Sentence::analyze_document(text, config.short_line_max_chars);
    if sentences.is_empty() {
        tracing::warn!(source_id, "segmentation produced no sentences, zero-emit run");
        return BuiltDocument::default();
    }

    let mut ctx = BuildContext::new(source_id);
    let mut batch = GraphBatch::new();
    let chunker = RecursiveChunker::new(&sentences, config);
    let outcome = chunker.run(&mut ctx, &mut batch);

    // Per-job instances: embeddings and TF-IDF never cross documents.
    let embedder = HashedNgramEmbedder::new(config.embedding_dimension);
    let docs: Vec<Vec<String>> = outcome
        .finalized
        .iter()
        .map(|chunk| {
            chunk
                .sentence_indices
                .iter()
                .flat_map(|&i| sentences[i].tokens.iter().cloned())
                .collect()
        })
        .collect();
    let tfidf = TfIdfIndex::new(docs);

    for (doc, chunk) in outcome.finalized.iter().enumerate() {
        builder::build_chunk_graph(
            chunk, &sentences, &tfidf, doc, &embedder, config, &mut ctx, &mut batch,
        );
    }

    BuiltDocument {
        batch,
        chunks: outcome.finalized.len(),
        root_keyword: outcome.root_keyword,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_document_empty_text_is_zero_emit() {
        let built = build_document(&PipelineConfig::default(), "s1", "\n\n");
        assert!(built.batch.is_empty());
        assert_eq!(built.chunks, 0);
        assert!(built.root_keyword.is_empty());
    }

    #[test]
    fn test_build_document_emits_root_and_concepts() {
        let built = build_document(
            &PipelineConfig::default(),
            "s1",
            "Alpha beta gamma. Alpha is a letter. Beta is also a letter.",
        );
        assert_eq!(built.chunks, 1);
        assert!(!built.root_keyword.is_empty());
        assert!(built
            .batch
            .nodes
            .iter()
            .any(|n| n.name == format!("{}*", built.root_keyword)));
    }
}
