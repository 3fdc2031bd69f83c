use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::models::{BackupIdentifier, BackupStatus};

/// Lifecycle phase of one backup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    /// Choosing the snapshot and the sealed segments to include.
    Collecting,
    /// Payload assembled, store submission in flight.
    Saving,
    Completed,
    Failed,
}

/// Working state of one backup attempt between request and completion.
///
/// Owned exclusively by the orchestrator task for its lifetime. Exactly one
/// instance exists per `(partition_id, checkpoint_id)` at any time; it leaves
/// the tracker when the store submission finishes or when a newer checkpoint
/// supersedes it.
#[derive(Debug, Clone)]
pub struct InProgressBackup {
    pub id: BackupIdentifier,
    /// Log position at which the checkpoint was declared.
    pub checkpoint_position: u64,
    /// Expected partition count of the cluster at backup time. Recorded for
    /// later completeness checks by the store or caller, not verified here.
    pub partition_count: u32,
    /// Covered position of the chosen snapshot, once assembly has picked one.
    pub snapshot_position: Option<u64>,
    /// Sealed segment files to include, ascending by on-disk segment order.
    pub sealed_segments: Vec<PathBuf>,
    pub phase: BackupPhase,
    pub created_at: DateTime<Utc>,
}

impl InProgressBackup {
    pub fn new(id: BackupIdentifier, checkpoint_position: u64, partition_count: u32) -> Self {
        Self {
            id,
            checkpoint_position,
            partition_count,
            snapshot_position: None,
            sealed_segments: Vec::new(),
            phase: BackupPhase::Collecting,
            created_at: Utc::now(),
        }
    }

    /// Status view of a live entry. The tracker is authoritative for
    /// liveness, so this is always `InProgress`.
    pub fn status(&self) -> BackupStatus {
        BackupStatus::in_progress(self.id, self.checkpoint_position, self.created_at)
    }
}
