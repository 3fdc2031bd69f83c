//! Interface to the durable, content-addressed backup store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{BackupIdentifier, BackupStatus};

/// Cluster-level facts recorded next to the payload so a restore can check
/// completeness across partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub checkpoint_position: u64,
    pub partition_count: u32,
}

/// Fully assembled backup payload handed to the store.
#[derive(Debug, Clone)]
pub struct Backup {
    pub id: BackupIdentifier,
    pub descriptor: BackupDescriptor,
    pub snapshot_files: Vec<PathBuf>,
    /// Sealed segment files, ascending by on-disk segment order.
    pub segment_files: Vec<PathBuf>,
}

#[async_trait]
pub trait BackupStore: Send + Sync + 'static {
    /// Persist `backup`. Idempotent per identifier: saving the same backup
    /// twice is equivalent to saving it once.
    async fn save(&self, backup: Backup) -> anyhow::Result<()>;

    /// Durable status for `id`, if the store has any record of it.
    async fn query_status(&self, id: BackupIdentifier)
        -> anyhow::Result<Option<BackupStatus>>;

    /// Record a durable `Failed` status for `id`. Idempotent. A save that
    /// completes after `mark_failed` must not resurrect the backup; the
    /// failed status wins.
    async fn mark_failed(&self, id: BackupIdentifier, reason: &str) -> anyhow::Result<()>;

    /// Remove the stored backup. Present for future use; the coordinator
    /// never invokes it.
    async fn delete(&self, id: BackupIdentifier) -> anyhow::Result<()>;
}
