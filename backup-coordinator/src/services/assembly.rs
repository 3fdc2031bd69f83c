//! Assembly of a consistent backup payload.
//!
//! Picks the most recent snapshot at or before the checkpoint position,
//! reserves it, selects the sealed segments needed to replay from the
//! snapshot to the checkpoint, and verifies that the selection is gap-free.
//! Runs off the orchestrator task; the snapshot store and the segment
//! directory are only ever read, never mutated.

use std::path::Path;

use crate::error::{BackupError, Result};
use crate::segments::{SegmentDirectory, SegmentInfo};
use crate::snapshot::{SnapshotProvider, SnapshotRef, SnapshotReservation};

#[derive(Debug)]
pub(crate) struct AssembledBackup {
    pub snapshot: SnapshotRef,
    /// Sealed segments covering `(snapshot position, checkpoint position]`,
    /// ascending by base position.
    pub sealed_segments: Vec<SegmentInfo>,
    /// Held until the attempt finishes; dropping releases the snapshot pin.
    #[allow(dead_code)]
    pub reservation: SnapshotReservation,
}

pub(crate) async fn assemble<P, D>(
    snapshots: &P,
    segments: &D,
    checkpoint_position: u64,
) -> Result<AssembledBackup>
where
    P: SnapshotProvider,
    D: SegmentDirectory,
{
    let snapshot = snapshots
        .latest_snapshot_at_or_before(checkpoint_position)
        .await
        .map_err(BackupError::Snapshot)?
        .ok_or(BackupError::NoValidSnapshot {
            position: checkpoint_position,
        })?;

    let reservation = snapshots
        .reserve(&snapshot)
        .await
        .map_err(BackupError::Snapshot)?;

    let listing = segments.list().await.map_err(BackupError::Segments)?;
    let sealed_segments = select_segments(
        listing,
        |path| segments.is_segment_file(path),
        snapshot.covered_position,
        checkpoint_position,
    );
    verify_continuity(
        &sealed_segments,
        snapshot.covered_position,
        checkpoint_position,
    )?;

    Ok(AssembledBackup {
        snapshot,
        sealed_segments,
        reservation,
    })
}

/// Sealed segments contributing log positions in
/// `(snapshot_position, checkpoint_position]`, ascending by base position.
///
/// The active segment is never eligible: its length may still be mutating
/// concurrently with the backup read, so including it would risk a torn
/// read even when its content overlaps the wanted range.
fn select_segments(
    listing: Vec<SegmentInfo>,
    is_segment_file: impl Fn(&Path) -> bool,
    snapshot_position: u64,
    checkpoint_position: u64,
) -> Vec<SegmentInfo> {
    if snapshot_position >= checkpoint_position {
        // The snapshot already covers the checkpoint; replay needs nothing.
        return Vec::new();
    }
    let mut selected: Vec<SegmentInfo> = listing
        .into_iter()
        .filter(|segment| is_segment_file(&segment.path))
        .filter(|segment| segment.sealed)
        .filter(|segment| {
            segment.base_position <= checkpoint_position
                && segment.last_position > snapshot_position
        })
        .collect();
    selected.sort_by_key(|segment| segment.base_position);
    selected
}

/// Replaying `selected` on top of the snapshot must reconstruct a log
/// continuous from the snapshot position through at least the checkpoint
/// position. A gap means a segment was compacted away between checkpoint
/// declaration and backup execution.
fn verify_continuity(
    selected: &[SegmentInfo],
    snapshot_position: u64,
    checkpoint_position: u64,
) -> Result<()> {
    let mut next_needed = snapshot_position + 1;
    if snapshot_position >= checkpoint_position {
        return Ok(());
    }
    for segment in selected {
        if segment.base_position > next_needed {
            return Err(BackupError::SegmentGap {
                from: next_needed,
                to: segment.base_position - 1,
            });
        }
        next_needed = next_needed.max(segment.last_position.saturating_add(1));
        if next_needed > checkpoint_position {
            return Ok(());
        }
    }
    Err(BackupError::SegmentGap {
        from: next_needed,
        to: checkpoint_position,
    })
}
