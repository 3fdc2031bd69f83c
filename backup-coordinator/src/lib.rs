//! Per-partition coordination of consistent point-in-time backups for a
//! replicated, log-structured state machine.
//!
//! A backup pairs a snapshot of committed state with exactly the sealed log
//! segments needed to replay from the snapshot position through the
//! checkpoint position, assembled while the partition keeps appending. One
//! orchestrator task runs per partition; the durable store, the persisted
//! snapshot subsystem, and the log-segment directory are injected
//! collaborators behind traits.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod segments;
pub mod services;
pub mod snapshot;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::BackupServiceConfig;
pub use error::{BackupError, Result};
pub use models::{BackupIdentifier, BackupPhase, BackupStatus, BackupStatusCode, InProgressBackup};
pub use segments::{SegmentDirectory, SegmentInfo};
pub use services::{BackupService, BackupTracker};
pub use snapshot::{SnapshotProvider, SnapshotRef, SnapshotReservation};
pub use store::{Backup, BackupDescriptor, BackupStore};
