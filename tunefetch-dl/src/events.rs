//! Job progress events
//!
//! Broadcast to any number of listeners (the SSE endpoint, tests). Polling
//! `JobManager::get_status` stays authoritative; events are a convenience
//! and may be dropped by lagging receivers.

use crate::models::{JobId, JobState, RequestKind, UnitId, UnitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Job created and its units enqueued
    JobSubmitted {
        job_id: JobId,
        kind: RequestKind,
        unit_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A unit changed status
    UnitStatusChanged {
        job_id: JobId,
        unit_id: UnitId,
        status: UnitStatus,
        attempt_count: u32,
        error_reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A failed unit goes back to the queue after `delay_ms`
    UnitRetryScheduled {
        job_id: JobId,
        unit_id: UnitId,
        attempt_count: u32,
        delay_ms: u64,
        /// Why the attempt failed
        error_reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Cancellation requested; the job may still have units in flight
    JobCancelRequested {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },

    /// Job reached a terminal state
    JobFinished {
        job_id: JobId,
        state: JobState,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Event type string, used as the SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::JobSubmitted { .. } => "JobSubmitted",
            JobEvent::UnitStatusChanged { .. } => "UnitStatusChanged",
            JobEvent::UnitRetryScheduled { .. } => "UnitRetryScheduled",
            JobEvent::JobCancelRequested { .. } => "JobCancelRequested",
            JobEvent::JobFinished { .. } => "JobFinished",
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobSubmitted { job_id, .. }
            | JobEvent::UnitStatusChanged { job_id, .. }
            | JobEvent::UnitRetryScheduled { job_id, .. }
            | JobEvent::JobCancelRequested { job_id, .. }
            | JobEvent::JobFinished { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for [`JobEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl EventBus {
    /// `capacity` is how many events a slow receiver may fall behind before
    /// it starts losing the oldest ones
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Receives events emitted after this call only
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Emit to all subscribers; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: JobEvent) -> Result<usize, broadcast::error::SendError<JobEvent>> {
        self.tx.send(event)
    }

    /// Emit, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: JobEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event_type = e.0.event_type(), "No subscribers for event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel_event(job_id: JobId) -> JobEvent {
        JobEvent::JobCancelRequested {
            job_id,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = JobId::new();

        assert_eq!(bus.emit(cancel_event(id)).unwrap(), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id(), id);
        assert_eq!(received.event_type(), "JobCancelRequested");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus.emit(cancel_event(JobId::new())).is_err());
        bus.emit_lossy(cancel_event(JobId::new()));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = JobEvent::JobFinished {
            job_id: JobId::new(),
            state: JobState::CompletedWithFailures,
            succeeded: 1,
            failed: 1,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "JobFinished");
        assert_eq!(json["state"], "completed_with_failures");
    }
}
