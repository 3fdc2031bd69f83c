//! Interface to the partition's log-segment directory.
//!
//! The directory is read concurrently with the log's own append path, so a
//! backup may only ever touch sealed files. Segment naming conventions belong
//! to the log-storage layer and reach us through `is_segment_file`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One file in the segment directory, as described by the log-storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    /// Lowest log position contained in the segment.
    pub base_position: u64,
    /// Highest log position contained in the segment.
    pub last_position: u64,
    /// Sealed segments are closed for writes and safe to read without
    /// tearing. The currently appended-to segment is not sealed.
    pub sealed: bool,
}

#[async_trait]
pub trait SegmentDirectory: Send + Sync + 'static {
    /// Whether `path` names a log segment at all. Index files, lock files and
    /// other bookkeeping in the same directory must be rejected here.
    fn is_segment_file(&self, path: &Path) -> bool;

    /// Current contents of the segment directory. Entries whose path fails
    /// `is_segment_file` are ignored by the assembly.
    async fn list(&self) -> anyhow::Result<Vec<SegmentInfo>>;
}
