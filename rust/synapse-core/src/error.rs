//! Error types for the graph construction pipeline.

/// Errors surfaced by the graph store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient database failure (busy/locked); retried before surfacing.
    #[error("transient database failure: {0}")]
    Transient(rusqlite::Error),

    /// Non-retriable database failure.
    #[error("database failure: {0}")]
    Database(rusqlite::Error),

    /// An edge referenced a node that does not exist in the project graph.
    #[error("edge `{source_node}` -> `{target}` references a missing node")]
    MissingEndpoint {
        /// Source node name.
        source_node: String,
        /// Target node name.
        target: String,
    },

    /// Record (de)serialization failed.
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A store worker task died unexpectedly.
    #[error("store worker failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if is_transient(&err) {
            Self::Transient(err)
        } else {
            Self::Database(err)
        }
    }
}

/// Busy/locked failures are worth retrying; everything else is not.
fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(info, _)
            if matches!(
                info.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Errors surfaced by [`crate::pipeline::GraphPipeline::ingest`].
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The input could not be accepted at all; nothing was written.
    #[error("input rejected: {reason}")]
    InputRejected {
        /// Why the input was rejected.
        reason: String,
    },

    /// Cooperative cancellation before the merge; the batch was discarded.
    #[error("ingest cancelled before merge")]
    Cancelled,

    /// The graph store failed after exhausting retries.
    #[error("graph store failure: {0}")]
    Store(#[from] StoreError),

    /// A pipeline worker task died unexpectedly.
    #[error("pipeline task failed: {0}")]
    Task(String),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_failures_classify_as_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(matches!(StoreError::from(err), StoreError::Transient(_)));
    }

    #[test]
    fn other_failures_classify_as_fatal() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(StoreError::from(err), StoreError::Database(_)));
    }
}
