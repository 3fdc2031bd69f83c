use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-wide identity of one backup attempt.
///
/// The sole key into both the in-flight tracker and the durable store.
/// Within a fixed `(node_id, partition_id)` pair, identifiers order by
/// `checkpoint_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackupIdentifier {
    pub node_id: u32,
    pub partition_id: u32,
    pub checkpoint_id: u64,
}

impl BackupIdentifier {
    pub fn new(node_id: u32, partition_id: u32, checkpoint_id: u64) -> Self {
        Self {
            node_id,
            partition_id,
            checkpoint_id,
        }
    }
}

impl fmt::Display for BackupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.node_id, self.partition_id, self.checkpoint_id
        )
    }
}
