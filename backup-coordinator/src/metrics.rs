//! Prometheus metrics for backup operations.
//!
//! One recorder per partition, registered against a caller-supplied registry
//! and const-labelled with the partition id. The recorder's lifecycle is
//! bound to the orchestrator: timers still running when the orchestrator
//! closes are reported as canceled and contribute no latency sample, so
//! operations that outlive their owner do not skew the histogram.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOperation {
    Take,
    Query,
    Delete,
}

impl BackupOperation {
    fn as_label(self) -> &'static str {
        match self {
            Self::Take => "take",
            Self::Query => "query",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    Failed,
    Canceled,
}

impl OperationOutcome {
    fn as_label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Clone)]
pub struct BackupMetrics {
    latency: HistogramVec,
    operations: IntCounterVec,
    in_progress: IntGaugeVec,
}

impl BackupMetrics {
    pub fn register(registry: &Registry, partition_id: u32) -> prometheus::Result<Self> {
        let partition = partition_id.to_string();

        let latency = HistogramVec::new(
            HistogramOpts::new(
                "backup_operation_duration_seconds",
                "Duration of backup operations in seconds",
            )
            .const_label("partition", partition.clone()),
            &["operation"],
        )?;
        registry.register(Box::new(latency.clone()))?;

        let operations = IntCounterVec::new(
            Opts::new(
                "backup_operations_total",
                "Number of finished backup operations by outcome",
            )
            .const_label("partition", partition.clone()),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let in_progress = IntGaugeVec::new(
            Opts::new(
                "backup_operations_in_progress",
                "Number of backup operations currently in flight",
            )
            .const_label("partition", partition),
            &["operation"],
        )?;
        registry.register(Box::new(in_progress.clone()))?;

        Ok(Self {
            latency,
            operations,
            in_progress,
        })
    }

    pub fn start(&self, operation: BackupOperation) -> OperationTimer {
        self.in_progress
            .with_label_values(&[operation.as_label()])
            .inc();
        OperationTimer {
            metrics: self.clone(),
            operation,
            started_at: Instant::now(),
            finished: false,
        }
    }
}

/// Timer for one operation. `complete` records a latency sample and an
/// outcome; dropping an unfinished timer counts as canceled without a
/// sample.
pub struct OperationTimer {
    metrics: BackupMetrics,
    operation: BackupOperation,
    started_at: Instant,
    finished: bool,
}

impl OperationTimer {
    pub fn complete(mut self, outcome: OperationOutcome) {
        self.finished = true;
        let operation = self.operation.as_label();
        self.metrics.in_progress.with_label_values(&[operation]).dec();
        self.metrics
            .operations
            .with_label_values(&[operation, outcome.as_label()])
            .inc();
        self.metrics
            .latency
            .with_label_values(&[operation])
            .observe(self.started_at.elapsed().as_secs_f64());
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let operation = self.operation.as_label();
        self.metrics.in_progress.with_label_values(&[operation]).dec();
        self.metrics
            .operations
            .with_label_values(&[operation, OperationOutcome::Canceled.as_label()])
            .inc();
    }
}
