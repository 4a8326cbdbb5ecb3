//! Track acquisition units and their per-unit outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a unit, unique within its job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One planned download. Created by the expander, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackUnit {
    pub unit_id: UnitId,
    /// "Artist - Title" or a search string; empty when only a locator is known
    pub query_hint: String,
    /// Direct URL, skipping the search step
    pub source_locator: Option<String>,
    pub artist_hint: Option<String>,
    pub title_hint: Option<String>,
    pub album_hint: Option<String>,
    /// Source order, starting at 0
    pub position: usize,
}

impl TrackUnit {
    /// Unit built from a parsed (artist, title) pair
    pub fn from_pair(position: usize, artist: &str, title: &str) -> Self {
        Self {
            unit_id: UnitId(position as u32),
            query_hint: format!("{} - {}", artist, title),
            source_locator: None,
            artist_hint: Some(artist.to_string()),
            title_hint: Some(title.to_string()),
            album_hint: None,
            position,
        }
    }

    /// Unit that searches for free text
    pub fn from_query(position: usize, query: &str) -> Self {
        Self {
            unit_id: UnitId(position as u32),
            query_hint: query.to_string(),
            source_locator: None,
            artist_hint: None,
            title_hint: None,
            album_hint: None,
            position,
        }
    }

    /// Unit with a known source URL
    pub fn from_locator(position: usize, locator: &str) -> Self {
        Self {
            unit_id: UnitId(position as u32),
            query_hint: String::new(),
            source_locator: Some(locator.to_string()),
            artist_hint: None,
            title_hint: None,
            album_hint: None,
            position,
        }
    }
}

/// Per-unit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InProgress,
    Succeeded,
    /// Terminal. A retried failure goes back to Pending instead.
    Failed,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Succeeded | UnitStatus::Failed)
    }
}

/// Reason recorded for units stopped by a job cancellation
pub const CANCELLED_REASON: &str = "cancelled";

/// Recorded result of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    pub status: UnitStatus,
    /// Set iff Succeeded
    pub output_path: Option<String>,
    /// Set iff Failed
    pub error_reason: Option<String>,
    pub attempt_count: u32,
}

impl UnitOutcome {
    pub fn pending(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            status: UnitStatus::Pending,
            output_path: None,
            error_reason: None,
            attempt_count: 0,
        }
    }

    /// Pending -> InProgress. Returns false for any other starting status.
    pub fn begin_attempt(&mut self) -> bool {
        if self.status != UnitStatus::Pending {
            return false;
        }
        self.status = UnitStatus::InProgress;
        self.attempt_count += 1;
        true
    }

    pub fn succeed(&mut self, output_path: String) {
        self.status = UnitStatus::Succeeded;
        self.output_path = Some(output_path);
        self.error_reason = None;
    }

    pub fn fail(&mut self, reason: String) {
        self.status = UnitStatus::Failed;
        self.output_path = None;
        self.error_reason = Some(reason);
    }

    /// Failed attempt that will be retried. Only terminal failures carry a
    /// reason; the retried one goes out with the retry event.
    pub fn requeue(&mut self) {
        self.status = UnitStatus::Pending;
        self.error_reason = None;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Metadata applied to the finished file and used for path resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_unit_builds_query_hint() {
        let unit = TrackUnit::from_pair(2, "Miles Davis", "So What");
        assert_eq!(unit.query_hint, "Miles Davis - So What");
        assert_eq!(unit.unit_id, UnitId(2));
        assert_eq!(unit.position, 2);
        assert!(unit.source_locator.is_none());
    }

    #[test]
    fn test_locator_unit_has_empty_hint() {
        let unit = TrackUnit::from_locator(0, "https://example.com/watch?v=abc");
        assert!(unit.query_hint.is_empty());
        assert_eq!(unit.source_locator.as_deref(), Some("https://example.com/watch?v=abc"));
    }

    #[test]
    fn test_attempt_only_starts_from_pending() {
        let mut outcome = UnitOutcome::pending(UnitId(0));
        assert!(outcome.begin_attempt());
        assert_eq!(outcome.status, UnitStatus::InProgress);
        assert_eq!(outcome.attempt_count, 1);

        assert!(!outcome.begin_attempt());
        assert_eq!(outcome.attempt_count, 1);

        outcome.requeue();
        assert_eq!(outcome.status, UnitStatus::Pending);
        assert!(outcome.error_reason.is_none());
        assert!(outcome.begin_attempt());
        assert_eq!(outcome.attempt_count, 2);
    }

    #[test]
    fn test_succeed_and_fail_keep_fields_exclusive() {
        let mut outcome = UnitOutcome::pending(UnitId(1));
        outcome.begin_attempt();
        outcome.requeue();
        outcome.begin_attempt();
        outcome.succeed("/tmp/a.mp3".into());
        assert!(outcome.error_reason.is_none());
        assert_eq!(outcome.output_path.as_deref(), Some("/tmp/a.mp3"));
        assert!(outcome.is_terminal());

        let mut failed = UnitOutcome::pending(UnitId(2));
        failed.fail(CANCELLED_REASON.into());
        assert!(failed.output_path.is_none());
        assert_eq!(failed.error_reason.as_deref(), Some("cancelled"));
        assert!(failed.is_terminal());
    }
}
