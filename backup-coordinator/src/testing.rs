//! Test doubles for the collaborator interfaces and polling helpers for the
//! asynchronous orchestrator tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use crate::models::{BackupIdentifier, BackupStatus, BackupStatusCode};
use crate::segments::{SegmentDirectory, SegmentInfo};
use crate::services::orchestrator::BackupService;
use crate::snapshot::{SnapshotProvider, SnapshotRef, SnapshotReservation};
use crate::store::{Backup, BackupStore};

pub(crate) struct FakeSnapshots {
    snapshots: Mutex<Vec<SnapshotRef>>,
    live_reservations: Arc<AtomicUsize>,
}

impl FakeSnapshots {
    pub(crate) fn empty() -> Self {
        Self {
            snapshots: Mutex::new(Vec::new()),
            live_reservations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_snapshot(covered_position: u64, files: &[&str]) -> Self {
        let snapshots = Self::empty();
        snapshots.add_snapshot(covered_position, files);
        snapshots
    }

    pub(crate) fn add_snapshot(&self, covered_position: u64, files: &[&str]) {
        self.snapshots.lock().unwrap().push(SnapshotRef {
            covered_position,
            files: files.iter().map(PathBuf::from).collect(),
        });
    }

    pub(crate) fn live_reservations(&self) -> usize {
        self.live_reservations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotProvider for FakeSnapshots {
    async fn latest_snapshot_at_or_before(
        &self,
        position: u64,
    ) -> anyhow::Result<Option<SnapshotRef>> {
        let snapshots = self.snapshots.lock().unwrap();
        Ok(snapshots
            .iter()
            .filter(|snapshot| snapshot.covered_position <= position)
            .max_by_key(|snapshot| snapshot.covered_position)
            .cloned())
    }

    async fn reserve(&self, _snapshot: &SnapshotRef) -> anyhow::Result<SnapshotReservation> {
        self.live_reservations.fetch_add(1, Ordering::SeqCst);
        let live = Arc::clone(&self.live_reservations);
        Ok(SnapshotReservation::new(move || {
            live.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

/// Segment directory with a fixed listing; only `.seg` files count as
/// segment files.
pub(crate) struct StaticSegments {
    segments: Vec<SegmentInfo>,
}

impl StaticSegments {
    pub(crate) fn new(segments: Vec<SegmentInfo>) -> Self {
        Self { segments }
    }
}

#[async_trait]
impl SegmentDirectory for StaticSegments {
    fn is_segment_file(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "seg" || ext == "open")
    }

    async fn list(&self) -> anyhow::Result<Vec<SegmentInfo>> {
        Ok(self.segments.clone())
    }
}

/// Filesystem-backed segment directory for integration-style tests:
/// `<base>-<last>.seg` files are sealed segments, `<base>.open` is the
/// active segment, anything else is not a segment file.
pub(crate) struct FsSegments {
    directory: PathBuf,
}

impl FsSegments {
    pub(crate) fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn parse(path: &Path) -> Option<SegmentInfo> {
        let stem = path.file_stem()?.to_str()?;
        match path.extension()?.to_str()? {
            "seg" => {
                let (base, last) = stem.split_once('-')?;
                Some(SegmentInfo {
                    path: path.to_path_buf(),
                    base_position: base.parse().ok()?,
                    last_position: last.parse().ok()?,
                    sealed: true,
                })
            }
            "open" => Some(SegmentInfo {
                path: path.to_path_buf(),
                base_position: stem.parse().ok()?,
                last_position: u64::MAX,
                sealed: false,
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl SegmentDirectory for FsSegments {
    fn is_segment_file(&self, path: &Path) -> bool {
        Self::parse(path).is_some()
    }

    async fn list(&self) -> anyhow::Result<Vec<SegmentInfo>> {
        let mut segments = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(segment) = Self::parse(&entry.path()) {
                segments.push(segment);
            }
        }
        Ok(segments)
    }
}

/// In-memory store that records every save and serves durable statuses the
/// way the real store contract requires: saves are idempotent, and a late
/// save cannot resurrect a backup that was already marked failed.
pub(crate) struct RecordingStore {
    saves: Mutex<Vec<Backup>>,
    statuses: Mutex<HashMap<BackupIdentifier, BackupStatus>>,
    gate: Semaphore,
    fail_saves: AtomicBool,
    fail_queries: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Store whose saves block until `release_save` is called, one save per
    /// call.
    pub(crate) fn gated() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            saves: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            gate: Semaphore::new(permits),
            fail_saves: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    pub(crate) fn release_save(&self) {
        self.gate.add_permits(1);
    }

    pub(crate) fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_queries(&self) {
        self.fail_queries.store(true, Ordering::SeqCst);
    }

    pub(crate) fn saves(&self) -> Vec<Backup> {
        self.saves.lock().unwrap().clone()
    }

    pub(crate) fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }
}

#[async_trait]
impl BackupStore for RecordingStore {
    async fn save(&self, backup: Backup) -> anyhow::Result<()> {
        self.gate.acquire().await.expect("gate closed").forget();
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("injected save failure");
        }
        let id = backup.id;
        let checkpoint_position = backup.descriptor.checkpoint_position;
        self.saves.lock().unwrap().push(backup);

        let mut statuses = self.statuses.lock().unwrap();
        let already_failed = statuses
            .get(&id)
            .is_some_and(|status| status.status_code == BackupStatusCode::Failed);
        if !already_failed {
            statuses.insert(
                id,
                BackupStatus {
                    id,
                    status_code: BackupStatusCode::Completed,
                    checkpoint_position: Some(checkpoint_position),
                    failure_reason: None,
                    created_at: Some(Utc::now()),
                    completed_at: Some(Utc::now()),
                },
            );
        }
        Ok(())
    }

    async fn query_status(
        &self,
        id: BackupIdentifier,
    ) -> anyhow::Result<Option<BackupStatus>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            anyhow::bail!("injected query failure");
        }
        Ok(self.statuses.lock().unwrap().get(&id).cloned())
    }

    async fn mark_failed(&self, id: BackupIdentifier, reason: &str) -> anyhow::Result<()> {
        let mut statuses = self.statuses.lock().unwrap();
        let completed = statuses
            .get(&id)
            .is_some_and(|status| status.status_code == BackupStatusCode::Completed);
        if !completed {
            statuses.insert(
                id,
                BackupStatus {
                    id,
                    status_code: BackupStatusCode::Failed,
                    checkpoint_position: None,
                    failure_reason: Some(reason.to_string()),
                    created_at: None,
                    completed_at: Some(Utc::now()),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, _id: BackupIdentifier) -> anyhow::Result<()> {
        anyhow::bail!("delete is not implemented by the recording store");
    }
}

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll status queries until `code` is observed, panicking after a timeout.
pub(crate) async fn await_status(
    service: &BackupService,
    checkpoint_id: u64,
    code: BackupStatusCode,
) -> BackupStatus {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        let status = service
            .get_backup_status(checkpoint_id)
            .await
            .expect("status query failed");
        if status.status_code == code {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {code:?}, last saw {:?}",
            status.status_code
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub(crate) fn counter_value(
    registry: &prometheus::Registry,
    name: &str,
    labels: &[(&str, &str)],
) -> u64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric().iter())
        .filter(|metric| {
            labels.iter().all(|(key, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
            })
        })
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

/// Poll the operations counter until it reaches `expected`.
pub(crate) async fn await_counter(
    registry: &prometheus::Registry,
    labels: &[(&str, &str)],
    expected: u64,
) {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        let value = counter_value(registry, "backup_operations_total", labels);
        if value >= expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for counter {labels:?} to reach {expected}, last saw {value}"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
