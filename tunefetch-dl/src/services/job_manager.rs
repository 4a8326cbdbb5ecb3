//! Job manager
//!
//! Owns every job for its whole lifetime. Callers and workers never get a
//! reference to a `Job`: callers receive snapshots, workers receive a
//! `TrackUnit` plus the [`UnitReporter`] callback.
//!
//! Each job sits behind its own mutex, so state transitions for one job are
//! applied one at a time while different jobs progress independently.

use crate::db::{HistoryStore, JobSummary};
use crate::events::{EventBus, JobEvent};
use crate::models::{
    ClassifiedRequest, Job, JobContext, JobId, JobSnapshot, JobState, UnitId, UnitOutcome,
    UnitStatus, CANCELLED_REASON,
};
use crate::services::acquirer::UnitFailure;
use crate::services::expander::{ExpansionError, SubmitOptions, TrackListExpander};
use crate::services::retry::RetryPolicy;
use crate::services::worker_pool::{UnitReporter, WorkItem, WorkQueue};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason used when a unit cannot be handed to the pool
const POOL_STOPPED_REASON: &str = "worker pool stopped";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error("expansion timed out after {0}s")]
    TimedOut(u64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
}

#[derive(Debug, Clone)]
pub struct JobManagerSettings {
    pub retry_policy: RetryPolicy,
    pub expansion_timeout: Duration,
    pub download_root: PathBuf,
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
    context: Arc<JobContext>,
}

type SharedEntry = Arc<Mutex<JobEntry>>;

struct Inner {
    jobs: RwLock<HashMap<JobId, SharedEntry>>,
    expander: TrackListExpander,
    queue: WorkQueue,
    events: EventBus,
    history: Option<HistoryStore>,
    settings: JobManagerSettings,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(
        expander: TrackListExpander,
        queue: WorkQueue,
        events: EventBus,
        history: Option<HistoryStore>,
        settings: JobManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                expander,
                queue,
                events,
                history,
                settings,
            }),
        }
    }

    /// Expand the request, create the job and enqueue its units.
    ///
    /// Returns once the units are queued; it never waits for downloads. No job
    /// is created when expansion fails.
    pub async fn submit(
        &self,
        request: ClassifiedRequest,
        options: SubmitOptions,
    ) -> Result<JobId, SubmissionError> {
        let timeout = self.inner.settings.expansion_timeout;
        let expansion = tokio::time::timeout(timeout, self.inner.expander.expand(&request, &options))
            .await
            .map_err(|_| SubmissionError::TimedOut(timeout.as_secs()))??;

        let job = Job::new(
            request,
            expansion.units,
            expansion.playlist_name,
            expansion.warnings,
        );
        let job_id = job.job_id;
        let kind = job.request.kind();
        let context = Arc::new(job.context(self.inner.settings.download_root.clone()));
        let entry = Arc::new(Mutex::new(JobEntry {
            job,
            cancel: CancellationToken::new(),
            context,
        }));

        // Hold the entry while enqueueing so no worker sees a half-started job
        let mut guard = entry.lock().await;
        self.inner.jobs.write().await.insert(job_id, Arc::clone(&entry));

        let unit_count = guard.job.units.len();
        guard.job.transition_to(JobState::Running);

        let items: Vec<WorkItem> = guard
            .job
            .units
            .iter()
            .map(|unit| WorkItem {
                job_id,
                unit: unit.clone(),
                context: Arc::clone(&guard.context),
                cancel: guard.cancel.clone(),
            })
            .collect();

        for item in items {
            let unit_id = item.unit.unit_id;
            if self.inner.queue.enqueue(item).is_err() {
                error!(job_id = %job_id, unit_id = %unit_id, "Worker pool stopped, failing unit");
                if let Some(outcome) = guard.job.outcomes.get_mut(&unit_id) {
                    outcome.fail(POOL_STOPPED_REASON.to_string());
                }
            }
        }

        info!(
            job_id = %job_id,
            kind = %kind,
            units = unit_count,
            playlist = guard.job.playlist_name.as_deref().unwrap_or("-"),
            "Job submitted"
        );
        self.inner.events.emit_lossy(JobEvent::JobSubmitted {
            job_id,
            kind,
            unit_count,
            timestamp: Utc::now(),
        });

        self.finish_if_done(&mut guard).await;
        Ok(job_id)
    }

    /// Point-in-time copy of a job
    pub async fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, JobError> {
        let entry = self.entry(job_id).await?;
        let guard = entry.lock().await;
        Ok(guard.job.snapshot())
    }

    /// Snapshots of all jobs known to this process, oldest first
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        let entries: Vec<SharedEntry> = self.inner.jobs.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.lock().await.job.snapshot());
        }
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    /// Stop a job. Pending units fail with reason `cancelled` right away;
    /// in-flight units are recorded the same way when they report back. The
    /// job becomes `Cancelled` once nothing is in flight. Cancelling a
    /// terminal job changes nothing.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobState, JobError> {
        let entry = self.entry(job_id).await?;
        let mut guard = entry.lock().await;

        if guard.job.is_terminal() {
            debug!(job_id = %job_id, state = guard.job.state.as_str(), "Cancel on terminal job ignored");
            return Ok(guard.job.state);
        }

        if !guard.job.cancel_requested {
            guard.job.cancel_requested = true;
            guard.cancel.cancel();

            let mut stopped = 0;
            let JobEntry { job, .. } = &mut *guard;
            for outcome in job.outcomes.values_mut() {
                if outcome.status == UnitStatus::Pending {
                    outcome.fail(CANCELLED_REASON.to_string());
                    self.emit_unit(job_id, outcome);
                    stopped += 1;
                }
            }

            info!(
                job_id = %job_id,
                stopped,
                in_flight = guard.job.progress().in_progress,
                "Job cancel requested"
            );
            self.inner.events.emit_lossy(JobEvent::JobCancelRequested {
                job_id,
                timestamp: Utc::now(),
            });
        }

        self.finish_if_done(&mut guard).await;
        Ok(guard.job.state)
    }

    /// Record the result of one attempt.
    ///
    /// A failure with attempts left goes back to Pending and is re-enqueued
    /// after a backoff delay. Outcomes arriving after a cancel are recorded
    /// as failed with reason `cancelled`.
    pub async fn on_unit_outcome(
        &self,
        job_id: JobId,
        unit_id: UnitId,
        result: Result<PathBuf, UnitFailure>,
    ) {
        let Ok(entry) = self.entry(job_id).await else {
            warn!(job_id = %job_id, unit_id = %unit_id, "Outcome for unknown job dropped");
            return;
        };
        let mut guard = entry.lock().await;
        let policy = self.inner.settings.retry_policy;
        let cancel_requested = guard.job.cancel_requested;
        let mut retry = None;

        let JobEntry { job, .. } = &mut *guard;
        let Some(outcome) = job.outcomes.get_mut(&unit_id) else {
            warn!(job_id = %job_id, unit_id = %unit_id, "Outcome for unknown unit dropped");
            return;
        };
        if outcome.status != UnitStatus::InProgress {
            warn!(
                job_id = %job_id,
                unit_id = %unit_id,
                status = ?outcome.status,
                "Outcome for unit not in progress dropped"
            );
            return;
        }

        match result {
            _ if cancel_requested => outcome.fail(CANCELLED_REASON.to_string()),
            Ok(path) => {
                info!(job_id = %job_id, unit_id = %unit_id, path = %path.display(), "Unit succeeded");
                outcome.succeed(path.to_string_lossy().into_owned());
            }
            Err(UnitFailure::Cancelled) => outcome.fail(CANCELLED_REASON.to_string()),
            Err(failure) => {
                let reason = failure.to_string();
                if policy.allows_retry(outcome.attempt_count) {
                    let delay = policy.delay_for(outcome.attempt_count);
                    warn!(
                        job_id = %job_id,
                        unit_id = %unit_id,
                        attempt = outcome.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Unit failed, retrying"
                    );
                    outcome.requeue();
                    retry = Some((delay, reason));
                } else {
                    warn!(
                        job_id = %job_id,
                        unit_id = %unit_id,
                        attempts = outcome.attempt_count,
                        error = %reason,
                        "Unit failed permanently"
                    );
                    outcome.fail(reason);
                }
            }
        }

        self.emit_unit(job_id, outcome);
        let attempt_count = outcome.attempt_count;

        if let Some((delay, error_reason)) = retry {
            if let Some(unit) = guard.job.unit(unit_id).cloned() {
                self.inner.events.emit_lossy(JobEvent::UnitRetryScheduled {
                    job_id,
                    unit_id,
                    attempt_count,
                    delay_ms: delay.as_millis() as u64,
                    error_reason,
                    timestamp: Utc::now(),
                });
                self.schedule_retry(
                    WorkItem {
                        job_id,
                        unit,
                        context: Arc::clone(&guard.context),
                        cancel: guard.cancel.clone(),
                    },
                    delay,
                );
            }
        }

        self.finish_if_done(&mut guard).await;
    }

    /// Move a claimed unit to InProgress. Refused when the job is cancelled,
    /// not running, or the unit is not Pending.
    pub async fn claim_unit(&self, job_id: JobId, unit_id: UnitId) -> Option<u32> {
        let entry = self.entry(job_id).await.ok()?;
        let mut guard = entry.lock().await;

        if guard.job.cancel_requested || guard.job.state != JobState::Running {
            return None;
        }

        let outcome = guard.job.outcomes.get_mut(&unit_id)?;
        if !outcome.begin_attempt() {
            return None;
        }

        let attempt = outcome.attempt_count;
        self.emit_unit(job_id, outcome);
        debug!(job_id = %job_id, unit_id = %unit_id, attempt, "Unit claimed");
        Some(attempt)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.inner.history.as_ref()
    }

    async fn entry(&self, job_id: JobId) -> Result<SharedEntry, JobError> {
        self.inner
            .jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(JobError::NotFound(job_id))
    }

    fn schedule_retry(&self, item: WorkItem, delay: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            let (job_id, unit_id) = (item.job_id, item.unit.unit_id);
            let cancel = item.cancel.clone();
            tokio::select! {
                // cancel() already failed the pending unit
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if manager.inner.queue.enqueue(item).is_err() {
                        manager.fail_pending(job_id, unit_id, POOL_STOPPED_REASON).await;
                    }
                }
            }
        });
    }

    async fn fail_pending(&self, job_id: JobId, unit_id: UnitId, reason: &str) {
        let Ok(entry) = self.entry(job_id).await else {
            return;
        };
        let mut guard = entry.lock().await;
        if let Some(outcome) = guard.job.outcomes.get_mut(&unit_id) {
            if outcome.status == UnitStatus::Pending {
                outcome.fail(reason.to_string());
                self.emit_unit(job_id, outcome);
            }
        }
        self.finish_if_done(&mut guard).await;
    }

    /// Settle the job if every unit is terminal, then append it to history
    async fn finish_if_done(&self, entry: &mut JobEntry) {
        if entry.job.is_terminal() || !entry.job.all_units_terminal() {
            return;
        }

        let state = entry.job.settled_state();
        let Some(transition) = entry.job.transition_to(state) else {
            return;
        };

        let progress = entry.job.progress();
        info!(
            job_id = %transition.job_id,
            from = transition.old_state.as_str(),
            to = transition.new_state.as_str(),
            succeeded = progress.succeeded,
            failed = progress.failed,
            "Job finished"
        );
        self.inner.events.emit_lossy(JobEvent::JobFinished {
            job_id: transition.job_id,
            state,
            succeeded: progress.succeeded,
            failed: progress.failed,
            timestamp: transition.transitioned_at,
        });

        if let Some(history) = &self.inner.history {
            let summary = JobSummary::from_snapshot(&entry.job.snapshot());
            if let Err(e) = history.record(&summary).await {
                error!(job_id = %transition.job_id, error = %e, "Failed to persist job history");
            }
        }
    }

    fn emit_unit(&self, job_id: JobId, outcome: &UnitOutcome) {
        self.inner.events.emit_lossy(JobEvent::UnitStatusChanged {
            job_id,
            unit_id: outcome.unit_id,
            status: outcome.status,
            attempt_count: outcome.attempt_count,
            error_reason: outcome.error_reason.clone(),
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl UnitReporter for JobManager {
    async fn claim(&self, job_id: JobId, unit_id: UnitId) -> Option<u32> {
        self.claim_unit(job_id, unit_id).await
    }

    async fn report(&self, job_id: JobId, unit_id: UnitId, result: Result<PathBuf, UnitFailure>) {
        self.on_unit_outcome(job_id, unit_id, result).await
    }
}
