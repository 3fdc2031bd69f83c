//! Per-partition backup orchestration actor.
//!
//! One `BackupService` handle per partition, backed by a single spawned task
//! that owns the tracker and all mutable state. Public calls arrive as
//! commands on one ordered channel; completions of asynchronous I/O arrive
//! as events on a second channel and are applied on the same task, so no two
//! completions can touch the same entry concurrently. Assembly and store
//! submission run in worker tasks and never block the actor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::BackupServiceConfig;
use crate::error::{BackupError, Result};
use crate::metrics::{BackupMetrics, BackupOperation, OperationOutcome, OperationTimer};
use crate::models::{BackupIdentifier, BackupPhase, BackupStatus, InProgressBackup};
use crate::segments::SegmentDirectory;
use crate::services::assembly;
use crate::services::tracker::BackupTracker;
use crate::snapshot::SnapshotProvider;
use crate::store::{Backup, BackupDescriptor, BackupStore};

enum Command {
    TakeBackup {
        checkpoint_id: u64,
        checkpoint_position: u64,
    },
    QueryStatus {
        checkpoint_id: u64,
        reply: oneshot::Sender<Result<BackupStatus>>,
    },
    DeleteBackup {
        checkpoint_id: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    FailInProgress {
        last_checkpoint_id: u64,
    },
    Close,
}

enum Event {
    Collected {
        id: BackupIdentifier,
        snapshot_position: u64,
        sealed_segments: Vec<PathBuf>,
    },
    AssemblyFailed {
        id: BackupIdentifier,
        error: BackupError,
    },
    SaveFinished {
        id: BackupIdentifier,
        result: Result<()>,
    },
}

/// Handle to one partition's backup orchestrator.
///
/// Cheap to clone; every call is marshalled onto the orchestrator's own task.
#[derive(Clone)]
pub struct BackupService {
    commands: mpsc::UnboundedSender<Command>,
}

impl BackupService {
    /// Spawn the orchestrator for one partition.
    pub fn spawn<P, D, S>(
        config: BackupServiceConfig,
        snapshots: Arc<P>,
        segments: Arc<D>,
        store: Arc<S>,
        registry: &prometheus::Registry,
    ) -> Result<Self>
    where
        P: SnapshotProvider,
        D: SegmentDirectory,
        S: BackupStore,
    {
        config.validate()?;
        let metrics = BackupMetrics::register(registry, config.partition_id)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator {
            config,
            snapshots,
            segments,
            store,
            metrics,
            tracker: BackupTracker::new(),
            take_timers: HashMap::new(),
            highest_accepted: None,
            commands_rx,
            events_tx,
            events_rx,
        };
        tokio::spawn(orchestrator.run());
        Ok(Self {
            commands: commands_tx,
        })
    }

    /// Request a backup for `checkpoint_id` declared at
    /// `checkpoint_position`. Fire-and-forget; the outcome is observable via
    /// `get_backup_status`, logs, and metrics.
    pub fn take_backup(&self, checkpoint_id: u64, checkpoint_position: u64) {
        let sent = self.commands.send(Command::TakeBackup {
            checkpoint_id,
            checkpoint_position,
        });
        if sent.is_err() {
            debug!(checkpoint_id, "backup service closed, dropping take request");
        }
    }

    /// Status for `checkpoint_id`: `InProgress` straight from the tracker,
    /// otherwise whatever the store has durably recorded, or `DoesNotExist`.
    pub async fn get_backup_status(&self, checkpoint_id: u64) -> Result<BackupStatus> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::QueryStatus {
                checkpoint_id,
                reply,
            })
            .map_err(|_| BackupError::Closed)?;
        response.await.map_err(|_| BackupError::Closed)?
    }

    /// Always fails: backups cannot be deleted through this service.
    pub async fn delete_backup(&self, checkpoint_id: u64) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::DeleteBackup {
                checkpoint_id,
                reply,
            })
            .map_err(|_| BackupError::Closed)?;
        response.await.map_err(|_| BackupError::Closed)?
    }

    /// Fail every tracked backup whose checkpoint id is at or below
    /// `last_checkpoint_id`, because a newer checkpoint supersedes them.
    pub fn fail_in_progress_backups(&self, last_checkpoint_id: u64) {
        let sent = self.commands.send(Command::FailInProgress { last_checkpoint_id });
        if sent.is_err() {
            debug!(last_checkpoint_id, "backup service closed, dropping supersession request");
        }
    }

    /// Release local bookkeeping without waiting for outstanding store
    /// writes. Their results are discarded and their timers reported as
    /// canceled.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

struct Orchestrator<P, D, S> {
    config: BackupServiceConfig,
    snapshots: Arc<P>,
    segments: Arc<D>,
    store: Arc<S>,
    metrics: BackupMetrics,
    tracker: BackupTracker,
    /// Timers for in-flight take operations; dropped as canceled on close.
    take_timers: HashMap<BackupIdentifier, OperationTimer>,
    /// Highest `(checkpoint_id, position)` accepted so far, for rejecting
    /// regressed input.
    highest_accepted: Option<(u64, u64)>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl<P, D, S> Orchestrator<P, D, S>
where
    P: SnapshotProvider,
    D: SegmentDirectory,
    S: BackupStore,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(Command::Close) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
            }
        }
        // Dropping unfinished timers records them as canceled. Workers still
        // running find the event channel closed and their results are
        // discarded.
        self.take_timers.clear();
        debug!(
            partition_id = self.config.partition_id,
            in_flight = self.tracker.len(),
            "backup orchestrator closed"
        );
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::TakeBackup {
                checkpoint_id,
                checkpoint_position,
            } => self.on_take_backup(checkpoint_id, checkpoint_position),
            Command::QueryStatus {
                checkpoint_id,
                reply,
            } => self.on_query_status(checkpoint_id, reply),
            Command::DeleteBackup {
                checkpoint_id,
                reply,
            } => self.on_delete_backup(checkpoint_id, reply),
            Command::FailInProgress { last_checkpoint_id } => {
                self.on_fail_in_progress(last_checkpoint_id)
            }
            Command::Close => unreachable!("close is handled by the run loop"),
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Collected {
                id,
                snapshot_position,
                sealed_segments,
            } => self.on_collected(id, snapshot_position, sealed_segments),
            Event::AssemblyFailed { id, error } => self.on_assembly_failed(id, error),
            Event::SaveFinished { id, result } => self.on_save_finished(id, result),
        }
    }

    fn backup_id(&self, checkpoint_id: u64) -> BackupIdentifier {
        BackupIdentifier::new(self.config.node_id, self.config.partition_id, checkpoint_id)
    }

    fn on_take_backup(&mut self, checkpoint_id: u64, checkpoint_position: u64) {
        let id = self.backup_id(checkpoint_id);
        if self.tracker.get(&id).is_some() {
            debug!(
                checkpoint_id,
                checkpoint_position, "backup already in progress, ignoring duplicate request"
            );
            return;
        }
        if let Err(error) = self.check_request_order(checkpoint_id, checkpoint_position) {
            warn!(
                checkpoint_id,
                checkpoint_position,
                error = %error,
                "rejecting out-of-order backup request"
            );
            self.metrics
                .start(BackupOperation::Take)
                .complete(OperationOutcome::Failed);
            return;
        }
        self.highest_accepted = Some((checkpoint_id, checkpoint_position));

        let inserted = self.tracker.insert_if_absent(InProgressBackup::new(
            id,
            checkpoint_position,
            self.config.partition_count,
        ));
        debug_assert!(inserted, "duplicate was checked above");
        self.take_timers
            .insert(id, self.metrics.start(BackupOperation::Take));
        info!(
            partition_id = self.config.partition_id,
            checkpoint_id, checkpoint_position, "starting backup"
        );

        let snapshots = Arc::clone(&self.snapshots);
        let segments = Arc::clone(&self.segments);
        let store = Arc::clone(&self.store);
        let events = self.events_tx.clone();
        let partition_count = self.config.partition_count;
        tokio::spawn(async move {
            let assembled =
                match assembly::assemble(&*snapshots, &*segments, checkpoint_position).await {
                    Ok(assembled) => assembled,
                    Err(error) => {
                        let _ = events.send(Event::AssemblyFailed { id, error });
                        return;
                    }
                };

            let segment_files: Vec<PathBuf> = assembled
                .sealed_segments
                .iter()
                .map(|segment| segment.path.clone())
                .collect();
            let _ = events.send(Event::Collected {
                id,
                snapshot_position: assembled.snapshot.covered_position,
                sealed_segments: segment_files.clone(),
            });

            let backup = Backup {
                id,
                descriptor: BackupDescriptor {
                    checkpoint_position,
                    partition_count,
                },
                snapshot_files: assembled.snapshot.files.clone(),
                segment_files,
            };
            let result = store.save(backup).await.map_err(BackupError::Store);
            // The store is done reading; release the snapshot reservation
            // before the completion is reported.
            drop(assembled);
            let _ = events.send(Event::SaveFinished { id, result });
        });
    }

    /// Checkpoint ids and positions must be non-decreasing across accepted
    /// requests; a regressed input is rejected rather than silently taken.
    fn check_request_order(&self, checkpoint_id: u64, position: u64) -> Result<()> {
        let Some((last_checkpoint_id, last_position)) = self.highest_accepted else {
            return Ok(());
        };
        let ordered = if checkpoint_id == last_checkpoint_id {
            position == last_position
        } else {
            checkpoint_id > last_checkpoint_id && position >= last_position
        };
        if ordered {
            Ok(())
        } else {
            Err(BackupError::RequestOutOfOrder {
                checkpoint_id,
                position,
                last_checkpoint_id,
                last_position,
            })
        }
    }

    fn on_query_status(&mut self, checkpoint_id: u64, reply: oneshot::Sender<Result<BackupStatus>>) {
        let timer = self.metrics.start(BackupOperation::Query);
        let id = self.backup_id(checkpoint_id);
        if let Some(entry) = self.tracker.get(&id) {
            // The tracker is authoritative for liveness; the store is not
            // consulted for a live entry.
            let _ = reply.send(Ok(entry.status()));
            timer.complete(OperationOutcome::Completed);
            return;
        }
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let result = match store.query_status(id).await {
                Ok(Some(status)) => Ok(status),
                Ok(None) => Ok(BackupStatus::does_not_exist(id)),
                Err(error) => Err(BackupError::Store(error)),
            };
            timer.complete(if result.is_ok() {
                OperationOutcome::Completed
            } else {
                OperationOutcome::Failed
            });
            let _ = reply.send(result);
        });
    }

    fn on_delete_backup(&mut self, checkpoint_id: u64, reply: oneshot::Sender<Result<()>>) {
        // Deletion is deliberately unsupported; still timed so the recorder
        // sees the attempt.
        let timer = self.metrics.start(BackupOperation::Delete);
        debug!(checkpoint_id, "rejecting backup deletion request");
        let _ = reply.send(Err(BackupError::DeleteUnsupported));
        timer.complete(OperationOutcome::Failed);
    }

    fn on_fail_in_progress(&mut self, last_checkpoint_id: u64) {
        // The boundary is inclusive: the pivot checkpoint itself is
        // superseded too.
        for mut backup in self.tracker.drain_superseded(last_checkpoint_id) {
            backup.phase = BackupPhase::Failed;
            let id = backup.id;
            info!(
                checkpoint_id = id.checkpoint_id,
                checkpoint_position = backup.checkpoint_position,
                last_checkpoint_id,
                "failing superseded in-progress backup"
            );
            if let Some(timer) = self.take_timers.remove(&id) {
                timer.complete(OperationOutcome::Failed);
            }
            let store = Arc::clone(&self.store);
            let reason = format!("superseded by checkpoint {last_checkpoint_id}");
            tokio::spawn(async move {
                if let Err(error) = store.mark_failed(id, &reason).await {
                    warn!(
                        checkpoint_id = id.checkpoint_id,
                        error = %error,
                        "could not record superseded backup as failed in the store"
                    );
                }
            });
        }
    }

    fn on_collected(
        &mut self,
        id: BackupIdentifier,
        snapshot_position: u64,
        sealed_segments: Vec<PathBuf>,
    ) {
        // A missing entry means the backup was superseded mid-collection;
        // the save result will be discarded when it arrives.
        if let Some(entry) = self.tracker.get_mut(&id) {
            entry.phase = BackupPhase::Saving;
            entry.snapshot_position = Some(snapshot_position);
            entry.sealed_segments = sealed_segments;
            debug!(
                checkpoint_id = id.checkpoint_id,
                snapshot_position,
                segments = entry.sealed_segments.len(),
                "backup contents collected, saving"
            );
        }
    }

    fn on_assembly_failed(&mut self, id: BackupIdentifier, error: BackupError) {
        if self.tracker.remove(&id).is_none() {
            debug!(
                checkpoint_id = id.checkpoint_id,
                "assembly result for untracked backup, discarding"
            );
            return;
        }
        if let Some(timer) = self.take_timers.remove(&id) {
            timer.complete(OperationOutcome::Failed);
        }
        warn!(
            checkpoint_id = id.checkpoint_id,
            error = %error,
            retryable = error.is_retryable(),
            "failed to assemble backup"
        );
    }

    fn on_save_finished(&mut self, id: BackupIdentifier, result: Result<()>) {
        let Some(mut entry) = self.tracker.remove(&id) else {
            debug!(
                checkpoint_id = id.checkpoint_id,
                "store completion for untracked backup, discarding"
            );
            return;
        };
        let timer = self.take_timers.remove(&id);
        match result {
            Ok(()) => {
                entry.phase = BackupPhase::Completed;
                info!(
                    partition_id = self.config.partition_id,
                    checkpoint_id = id.checkpoint_id,
                    checkpoint_position = entry.checkpoint_position,
                    "backup completed"
                );
                if let Some(timer) = timer {
                    timer.complete(OperationOutcome::Completed);
                }
            }
            Err(error) => {
                entry.phase = BackupPhase::Failed;
                warn!(
                    checkpoint_id = id.checkpoint_id,
                    checkpoint_position = entry.checkpoint_position,
                    error = %error,
                    "failed to save backup"
                );
                if let Some(timer) = timer {
                    timer.complete(OperationOutcome::Failed);
                }
            }
        }
    }
}
