//! Job lifecycle state machine
//!
//! A job moves `Queued -> Running -> {Completed, CompletedWithFailures, Cancelled}`.
//! The three end states are terminal and a job never leaves them.

use super::request::{ClassifiedRequest, RequestKind};
use super::track::{TrackUnit, UnitId, UnitOutcome, UnitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Process-unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// Job-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, units not yet handed to the pool
    Queued,
    /// Units enqueued
    Running,
    /// Every unit succeeded
    Completed,
    /// Finished with at least one terminally failed unit
    CompletedWithFailures,
    /// Aborted by the user
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::CompletedWithFailures | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::CompletedWithFailures => "completed_with_failures",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "completed_with_failures" => Some(JobState::CompletedWithFailures),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

/// State transition record, returned for logging and events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: JobId,
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// Counts per unit status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Where finished files of a job go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum OutputLayout {
    /// `<root>/<Playlist>/<Artist> - <Title>.mp3`
    Playlist { name: String },
    /// `<root>/<Artist>/<Album>/<Artist> - <Title>.mp3`
    Library,
}

/// Job metadata handed to workers with each unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: JobId,
    pub kind: RequestKind,
    pub layout: OutputLayout,
    pub download_root: PathBuf,
}

/// A job as owned by the job manager
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    pub request: ClassifiedRequest,
    /// Source order
    pub units: Vec<TrackUnit>,
    pub outcomes: HashMap<UnitId, UnitOutcome>,
    pub state: JobState,
    pub playlist_name: Option<String>,
    /// Non-fatal expansion problems, e.g. unparsable pasted lines
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
}

impl Job {
    /// Create a queued job with every unit pending
    pub fn new(
        request: ClassifiedRequest,
        units: Vec<TrackUnit>,
        playlist_name: Option<String>,
        warnings: Vec<String>,
    ) -> Self {
        let outcomes = units
            .iter()
            .map(|u| (u.unit_id, UnitOutcome::pending(u.unit_id)))
            .collect();

        Self {
            job_id: JobId::new(),
            request,
            units,
            outcomes,
            state: JobState::Queued,
            playlist_name,
            warnings,
            created_at: Utc::now(),
            completed_at: None,
            cancel_requested: false,
        }
    }

    /// Apply a state transition. Terminal states are final, so leaving one
    /// returns `None` and changes nothing.
    pub fn transition_to(&mut self, new_state: JobState) -> Option<StateTransition> {
        if self.state.is_terminal() || self.state == new_state {
            return None;
        }

        let transition = StateTransition {
            job_id: self.job_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };

        self.state = new_state;
        if new_state.is_terminal() {
            self.completed_at = Some(transition.transitioned_at);
        }

        Some(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn unit(&self, unit_id: UnitId) -> Option<&TrackUnit> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }

    pub fn all_units_terminal(&self) -> bool {
        self.outcomes.values().all(UnitOutcome::is_terminal)
    }

    /// Terminal state this job settles into once every unit is terminal
    pub fn settled_state(&self) -> JobState {
        if self.cancel_requested {
            JobState::Cancelled
        } else if self
            .outcomes
            .values()
            .all(|o| o.status == UnitStatus::Succeeded)
        {
            JobState::Completed
        } else {
            JobState::CompletedWithFailures
        }
    }

    pub fn progress(&self) -> JobProgress {
        let mut progress = JobProgress {
            total: self.units.len(),
            ..JobProgress::default()
        };
        for outcome in self.outcomes.values() {
            match outcome.status {
                UnitStatus::Pending => progress.pending += 1,
                UnitStatus::InProgress => progress.in_progress += 1,
                UnitStatus::Succeeded => progress.succeeded += 1,
                UnitStatus::Failed => progress.failed += 1,
            }
        }
        progress
    }

    /// Output layout: playlist-style for multi-track kinds, library otherwise
    pub fn output_layout(&self) -> OutputLayout {
        let playlist_kind = matches!(
            self.request.kind(),
            RequestKind::PlaylistUrl | RequestKind::PastedTrackList | RequestKind::VibeDescription
        );

        if playlist_kind || self.units.len() > 1 {
            OutputLayout::Playlist {
                name: self
                    .playlist_name
                    .clone()
                    .unwrap_or_else(|| "playlist".to_string()),
            }
        } else {
            OutputLayout::Library
        }
    }

    pub fn context(&self, download_root: PathBuf) -> JobContext {
        JobContext {
            job_id: self.job_id,
            kind: self.request.kind(),
            layout: self.output_layout(),
            download_root,
        }
    }

    /// Point-in-time copy, units in source order
    pub fn snapshot(&self) -> JobSnapshot {
        let mut units: Vec<UnitSnapshot> = self
            .units
            .iter()
            .map(|unit| UnitSnapshot {
                unit: unit.clone(),
                outcome: self
                    .outcomes
                    .get(&unit.unit_id)
                    .cloned()
                    .unwrap_or_else(|| UnitOutcome::pending(unit.unit_id)),
            })
            .collect();
        units.sort_by_key(|u| u.unit.position);

        JobSnapshot {
            job_id: self.job_id,
            kind: self.request.kind(),
            raw_input: self.request.raw_text().to_string(),
            state: self.state,
            playlist_name: self.playlist_name.clone(),
            warnings: self.warnings.clone(),
            progress: self.progress(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            units,
        }
    }
}

/// Unit definition plus its current outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit: TrackUnit,
    pub outcome: UnitOutcome,
}

/// Read-only copy of a job returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub kind: RequestKind,
    pub raw_input: String,
    pub state: JobState,
    pub playlist_name: Option<String>,
    pub warnings: Vec<String>,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub units: Vec<UnitSnapshot>,
}

impl JobSnapshot {
    pub fn outcome(&self, unit_id: UnitId) -> Option<&UnitOutcome> {
        self.units
            .iter()
            .find(|u| u.unit.unit_id == unit_id)
            .map(|u| &u.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::RequestPayload;

    fn pasted_job(n: usize) -> Job {
        let request = ClassifiedRequest::new(
            "a - b\nc - d",
            RequestPayload::PastedTrackList {
                lines: vec!["a - b".into(), "c - d".into()],
            },
        );
        let units = (0..n).map(|i| TrackUnit::from_pair(i, "A", "B")).collect();
        Job::new(request, units, Some("pasted_playlist".into()), Vec::new())
    }

    #[test]
    fn test_new_job_is_queued_with_pending_units() {
        let job = pasted_job(3);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.progress().pending, 3);
        assert!(!job.all_units_terminal());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut job = pasted_job(1);
        assert!(job.transition_to(JobState::Running).is_some());
        assert!(job.transition_to(JobState::Completed).is_some());
        assert!(job.completed_at.is_some());

        assert!(job.transition_to(JobState::Running).is_none());
        assert!(job.transition_to(JobState::Cancelled).is_none());
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_settled_state() {
        let mut job = pasted_job(2);
        for o in job.outcomes.values_mut() {
            o.begin_attempt();
            o.succeed("x.mp3".into());
        }
        assert_eq!(job.settled_state(), JobState::Completed);

        if let Some(o) = job.outcomes.get_mut(&UnitId(1)) {
            o.fail("fetch failed".into());
        }
        assert_eq!(job.settled_state(), JobState::CompletedWithFailures);

        job.cancel_requested = true;
        assert_eq!(job.settled_state(), JobState::Cancelled);
    }

    #[test]
    fn test_snapshot_orders_units_by_position() {
        let mut job = pasted_job(4);
        job.units.reverse();
        let snapshot = job.snapshot();
        let positions: Vec<usize> = snapshot.units.iter().map(|u| u.unit.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_layout_for_pasted_list_is_playlist() {
        let job = pasted_job(2);
        assert_eq!(
            job.output_layout(),
            OutputLayout::Playlist {
                name: "pasted_playlist".into()
            }
        );
    }

    #[test]
    fn test_layout_for_single_direct_url_is_library() {
        let url = "https://example.com/watch?v=abc";
        let request = ClassifiedRequest::new(
            url,
            RequestPayload::DirectMediaUrl {
                url: url.into(),
                source: Default::default(),
            },
        );
        let job = Job::new(request, vec![TrackUnit::from_locator(0, url)], None, Vec::new());
        assert_eq!(job.output_layout(), OutputLayout::Library);
    }

    #[test]
    fn test_job_id_parses_from_display() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
