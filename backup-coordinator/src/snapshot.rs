//! Interface to the persisted-snapshot subsystem.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Reference to one persisted snapshot of committed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    /// Highest log position whose effects are contained in the snapshot.
    pub covered_position: u64,
    /// Files making up the snapshot, handed to the backup store as-is.
    pub files: Vec<PathBuf>,
}

/// Pin on a snapshot, preventing its deletion while a backup reads it.
///
/// Dropping the guard releases the pin. Held for the whole lifetime of a
/// backup attempt, whatever the outcome.
pub struct SnapshotReservation {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SnapshotReservation {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard for providers that do not track pins, e.g. stores whose
    /// snapshots are immutable anyway.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for SnapshotReservation {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for SnapshotReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotReservation")
            .field("held", &self.release.is_some())
            .finish()
    }
}

#[async_trait]
pub trait SnapshotProvider: Send + Sync + 'static {
    /// Most recent persisted snapshot whose covered position is at or before
    /// `position`, if any exists yet.
    async fn latest_snapshot_at_or_before(&self, position: u64)
        -> anyhow::Result<Option<SnapshotRef>>;

    /// Pin `snapshot` against compaction until the returned guard is dropped.
    async fn reserve(&self, snapshot: &SnapshotRef) -> anyhow::Result<SnapshotReservation>;
}
