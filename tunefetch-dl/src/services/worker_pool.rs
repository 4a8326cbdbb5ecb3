//! Bounded acquisition worker pool
//!
//! A fixed number of workers pull units from one queue shared by all jobs,
//! which bounds concurrent external-tool invocations globally. Workers report
//! every attempt through a [`UnitReporter`] and never hold a job reference.

use crate::models::{JobContext, JobId, TrackUnit, UnitId};
use crate::services::acquirer::UnitFailure;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One unit handed to the pool
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: JobId,
    pub unit: TrackUnit,
    pub context: Arc<JobContext>,
    /// Cancelled when the owning job is cancelled
    pub cancel: CancellationToken,
}

#[derive(Debug, Error)]
#[error("work queue closed")]
pub struct QueueClosed(pub Box<WorkItem>);

/// Sending half of the shared pending-unit queue
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
}

/// Receiving half, consumed by [`WorkerPool::start`]
#[derive(Debug)]
pub struct WorkReceiver {
    rx: mpsc::UnboundedReceiver<WorkItem>,
}

impl WorkQueue {
    pub fn channel() -> (WorkQueue, WorkReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WorkQueue { tx }, WorkReceiver { rx })
    }

    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueClosed> {
        self.tx.send(item).map_err(|e| QueueClosed(Box::new(e.0)))
    }
}

/// Callback through which workers report progress to the job owner
#[async_trait]
pub trait UnitReporter: Send + Sync {
    /// Mark the unit InProgress. `None` means the unit must not run
    /// (job cancelled, or the unit is no longer pending); otherwise the
    /// attempt number is returned.
    async fn claim(&self, job_id: JobId, unit_id: UnitId) -> Option<u32>;

    /// Record the result of the attempt started by `claim`
    async fn report(&self, job_id: JobId, unit_id: UnitId, result: Result<PathBuf, UnitFailure>);
}

/// Runs one attempt of a unit
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem) -> Result<PathBuf, UnitFailure>;
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `worker_count` workers (at least one)
    pub fn start(
        worker_count: usize,
        receiver: WorkReceiver,
        executor: Arc<dyn UnitExecutor>,
        reporter: Arc<dyn UnitReporter>,
        shutdown: CancellationToken,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let rx = Arc::new(Mutex::new(receiver.rx));

        let handles = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&executor),
                    Arc::clone(&reporter),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers = worker_count, "Worker pool started");
        Self { handles, shutdown }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop taking new units and wait for in-flight units to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn next_item(
    rx: &Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    shutdown: &CancellationToken,
) -> Option<WorkItem> {
    let mut rx = rx.lock().await;
    tokio::select! {
        _ = shutdown.cancelled() => None,
        item = rx.recv() => item,
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    executor: Arc<dyn UnitExecutor>,
    reporter: Arc<dyn UnitReporter>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Worker started");

    while let Some(item) = next_item(&rx, &shutdown).await {
        let (job_id, unit_id) = (item.job_id, item.unit.unit_id);

        if item.cancel.is_cancelled() {
            debug!(worker_id, job_id = %job_id, unit_id = %unit_id, "Skipping unit of cancelled job");
            continue;
        }

        let Some(attempt) = reporter.claim(job_id, unit_id).await else {
            debug!(worker_id, job_id = %job_id, unit_id = %unit_id, "Unit not claimable, skipping");
            continue;
        };

        debug!(worker_id, job_id = %job_id, unit_id = %unit_id, attempt, "Executing unit");

        let result = match AssertUnwindSafe(executor.execute(&item)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                error!(worker_id, job_id = %job_id, unit_id = %unit_id, panic = %message, "Unit execution panicked");
                Err(UnitFailure::Internal(message))
            }
        };

        reporter.report(job_id, unit_id, result).await;
    }

    debug!(worker_id, "Worker stopped");
}
