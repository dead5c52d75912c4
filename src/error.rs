//! Error types for variant storage, ranking and correlation.

use thiserror::Error;

use crate::model::Partition;

/// Errors from store and handler operations.
///
/// A missing variant is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite store failed. Propagated unchanged, never retried.
    #[error("store unavailable: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored document could not be encoded or decoded.
    #[error("invalid document payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Bad data found in the store (e.g. an unknown variant type).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A raw page limit below the `-1` sentinel.
    #[error("invalid page limit {0}, expected -1 or a non-negative count")]
    InvalidLimit(i64),

    /// Another assigner holds the rank lease for this partition.
    #[error("rank partition {partition} is locked by another assigner")]
    PartitionLocked { partition: Partition },

    /// The rank lease was taken over by another assigner mid-run.
    #[error("rank lease for {partition} was taken over by another assigner")]
    LeaseLost { partition: Partition },

    /// A rank assignment run stopped part way; the partition must be re-ranked.
    #[error("rank assignment for {partition} stopped after {ranked} of {total} variants")]
    PartitionInconsistency {
        partition: Partition,
        ranked: usize,
        total: usize,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// True for failures that leave a partition flagged for re-assignment.
    #[must_use]
    pub const fn requires_rerank(&self) -> bool {
        matches!(self, Self::PartitionInconsistency { .. })
    }
}
