//! Knowledge graph construction pipeline.
//!
//! Ingests extracted document text and builds a per-project knowledge graph
//! of concept nodes and labelled relations, ready to ground retrieval-
//! augmented question answering.
//!
//! # Components
//!
//! - **nlp**: language detection, sentence segmentation, phrase extraction,
//!   embeddings, and the seeded topic model
//! - **pipeline**: recursive topic chunking, phrase scoring, concept node
//!   emission, and the per-source orchestrator
//! - **graph**: the node/edge data model and the SQLite-backed store with
//!   idempotent MERGE semantics
//! - **config** / **error**: one configuration block and the error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use synapse_core::{GraphPipeline, SqliteGraphStore};
//!
//! # async fn run() -> synapse_core::error::Result<()> {
//! let store = Arc::new(SqliteGraphStore::open("graph.db")?);
//! let pipeline = GraphPipeline::new(store);
//!
//! let report = pipeline
//!     .ingest("source-1", "project-1", "Alpha is a letter. Beta is too.")
//!     .await?;
//! println!("created {} nodes", report.nodes_created);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod nlp;
pub mod pipeline;

pub use config::{PipelineConfig, TopicConfig};
pub use error::{IngestError, StoreError};
pub use graph::{
    base_name, Edge, GraphBatch, GraphStore, KeywordNode, MergeStats, SourceRecord,
    SqliteGraphStore,
};
pub use nlp::{Lang, Sentence};
pub use pipeline::{GraphPipeline, IngestReport};
