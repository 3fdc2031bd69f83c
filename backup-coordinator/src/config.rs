//! Static configuration of one partition's backup orchestrator.

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupServiceConfig {
    /// Cluster-unique id of this node.
    pub node_id: u32,

    /// Partition this orchestrator is responsible for.
    pub partition_id: u32,

    /// Expected partition count of the cluster, recorded in every backup so
    /// the store or caller can later check cross-partition completeness.
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,
}

fn default_partition_count() -> u32 {
    1
}

impl BackupServiceConfig {
    pub fn new(node_id: u32, partition_id: u32, partition_count: u32) -> Self {
        Self {
            node_id,
            partition_id,
            partition_count,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(BackupError::Config(
                "partition_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
