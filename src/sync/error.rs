//! Error taxonomy for a sync run.
//!
//! Only [`SyncError::Fetch`] and [`SyncError::State`] abort a run. The other
//! variants are returned by the per-item helpers and folded into run counts.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reconciling source records with the destination.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Count or page request against the source failed.
    #[error("fetch failed on {stage}: {source:#}")]
    Fetch {
        /// `"count"` or `"page N"`.
        stage: String,
        source: anyhow::Error,
    },

    /// A whole submission batch was rejected.
    #[error("batch #{batch} ({size} events) rejected: {source:#}")]
    Submission {
        /// 1-based batch number within the run.
        batch: usize,
        size: usize,
        source: anyhow::Error,
    },

    /// A single media download or a per-event upload failed.
    #[error("attachment {what} failed for event {object_id}: {source:#}")]
    Attachment {
        /// Destination object reference.
        object_id: String,
        /// `"download <url>"`, `"filename <url>"` or `"upload"`.
        what: String,
        source: anyhow::Error,
    },

    /// Update of an already-synced event failed.
    #[error("patch of event {object_id} (source {source_id}) failed: {source:#}")]
    Patch {
        object_id: String,
        source_id: String,
        source: anyhow::Error,
    },

    /// Reading or writing persisted sync state failed.
    #[error("state store {op} failed for {key}: {source:#}")]
    State {
        /// `"get"` or `"set"`.
        op: &'static str,
        key: String,
        source: anyhow::Error,
    },

    /// Configuration did not validate.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true if this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Fetch { .. } | SyncError::State { .. } | SyncError::Config(_)
        )
    }
}
