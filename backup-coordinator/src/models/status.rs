use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::BackupIdentifier;

/// Where a backup stands, merged from in-memory tracking and the durable
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatusCode {
    /// Neither the tracker nor the store has any record for the identifier.
    DoesNotExist,
    InProgress,
    Completed,
    Failed,
}

/// Read-only projection of a backup's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupStatus {
    pub id: BackupIdentifier,
    pub status_code: BackupStatusCode,
    pub checkpoint_position: Option<u64>,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackupStatus {
    pub fn does_not_exist(id: BackupIdentifier) -> Self {
        Self {
            id,
            status_code: BackupStatusCode::DoesNotExist,
            checkpoint_position: None,
            failure_reason: None,
            created_at: None,
            completed_at: None,
        }
    }

    pub fn in_progress(
        id: BackupIdentifier,
        checkpoint_position: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status_code: BackupStatusCode::InProgress,
            checkpoint_position: Some(checkpoint_position),
            failure_reason: None,
            created_at: Some(created_at),
            completed_at: None,
        }
    }
}
