//! Error taxonomy for backup coordination.
//!
//! Nothing here is fatal to the owning process: a failed backup is logged,
//! reported through status queries, and never blocks the partition's regular
//! log processing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Backup deletion is deliberately unsupported.
    #[error("backup deletion is not supported")]
    DeleteUnsupported,

    /// A `take_backup` call regressed behind an already accepted request.
    #[error(
        "checkpoint {checkpoint_id} at position {position} is out of order \
         (highest accepted: checkpoint {last_checkpoint_id} at position {last_position})"
    )]
    RequestOutOfOrder {
        checkpoint_id: u64,
        position: u64,
        last_checkpoint_id: u64,
        last_position: u64,
    },

    /// The checkpoint was requested before any snapshot covered it.
    #[error("no snapshot found at or before position {position}")]
    NoValidSnapshot { position: u64 },

    /// Sealed segments do not replay contiguously from the snapshot to the
    /// checkpoint, typically because compaction raced the backup.
    #[error("sealed segments leave log positions {from}..={to} uncovered")]
    SegmentGap { from: u64, to: u64 },

    #[error("snapshot provider failed")]
    Snapshot(#[source] anyhow::Error),

    #[error("segment directory listing failed")]
    Segments(#[source] anyhow::Error),

    #[error("backup store failed")]
    Store(#[source] anyhow::Error),

    /// The orchestrator was closed before the operation could be answered.
    #[error("backup service is closed")]
    Closed,

    #[error("metrics registration failed")]
    Metrics(#[from] prometheus::Error),
}

impl BackupError {
    /// True for failures that may succeed on a later attempt, once a snapshot
    /// exists or segment retention has been pinned.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoValidSnapshot { .. } | Self::SegmentGap { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
