//! Job history persistence
//!
//! Append-only: a job's summary is written once, when it reaches a terminal
//! state, and never updated afterwards.

use crate::models::{JobId, JobSnapshot, JobState, RequestKind, UnitId, UnitStatus};
use crate::utils::retry_on_lock;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tunefetch_common::time::parse_rfc3339;
use tunefetch_common::{Error, Result};

/// Stored outcome of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_id: UnitId,
    pub position: usize,
    pub query_hint: String,
    pub source_locator: Option<String>,
    pub artist_hint: Option<String>,
    pub title_hint: Option<String>,
    pub status: UnitStatus,
    pub output_path: Option<String>,
    pub error_reason: Option<String>,
    pub attempt_count: u32,
}

/// Stored summary of a finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub raw_input: String,
    pub kind: RequestKind,
    pub state: JobState,
    pub playlist_name: Option<String>,
    /// Source order
    pub units: Vec<UnitSummary>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn from_snapshot(snapshot: &JobSnapshot) -> Self {
        let units = snapshot
            .units
            .iter()
            .map(|u| UnitSummary {
                unit_id: u.unit.unit_id,
                position: u.unit.position,
                query_hint: u.unit.query_hint.clone(),
                source_locator: u.unit.source_locator.clone(),
                artist_hint: u.unit.artist_hint.clone(),
                title_hint: u.unit.title_hint.clone(),
                status: u.outcome.status,
                output_path: u.outcome.output_path.clone(),
                error_reason: u.outcome.error_reason.clone(),
                attempt_count: u.outcome.attempt_count,
            })
            .collect();

        Self {
            job_id: snapshot.job_id,
            raw_input: snapshot.raw_input.clone(),
            kind: snapshot.kind,
            state: snapshot.state,
            playlist_name: snapshot.playlist_name.clone(),
            units,
            created_at: snapshot.created_at,
            completed_at: snapshot.completed_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitSummary> {
        self.units.iter().filter(|u| u.status == UnitStatus::Failed)
    }
}

/// Handle on the `job_history` table
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append a terminal job summary. Returns false if the job was already
    /// recorded; existing rows are never overwritten.
    pub async fn record(&self, summary: &JobSummary) -> Result<bool> {
        let job_id = summary.job_id.to_string();
        let kind = summary.kind.as_str();
        let state = summary.state.as_str();
        let units = serde_json::to_string(&summary.units)
            .map_err(|e| Error::Internal(format!("Failed to serialize units: {}", e)))?;
        // Fixed-width timestamps so ORDER BY on the text column is chronological
        let created_at = summary.created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        let completed_at = summary.completed_at.to_rfc3339_opts(SecondsFormat::Micros, true);

        let rows = retry_on_lock("record_job_history", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO job_history (
                    job_id, raw_input, kind, state, playlist_name, units,
                    created_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(job_id) DO NOTHING
                "#,
            )
            .bind(&job_id)
            .bind(&summary.raw_input)
            .bind(kind)
            .bind(state)
            .bind(&summary.playlist_name)
            .bind(&units)
            .bind(&created_at)
            .bind(&completed_at)
            .execute(&self.pool)
            .await?;
            Ok::<u64, Error>(result.rows_affected())
        })
        .await?;

        Ok(rows > 0)
    }

    pub async fn load(&self, job_id: JobId) -> Result<Option<JobSummary>> {
        let row = sqlx::query("SELECT * FROM job_history WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| summary_from_row(&r)).transpose()
    }

    /// Most recently completed first
    pub async fn list(&self, limit: u32) -> Result<Vec<JobSummary>> {
        let rows = sqlx::query("SELECT * FROM job_history ORDER BY completed_at DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(summary_from_row).collect()
    }

    /// Failed units of a recorded job, in source order
    pub async fn failed_units(&self, job_id: JobId) -> Result<Vec<UnitSummary>> {
        let summary = self
            .load(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

        Ok(summary.failed_units().cloned().collect())
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<JobSummary> {
    let corrupt =
        |what: &str, value: &str| Error::Internal(format!("Invalid {} in history: {}", what, value));

    let job_id: String = row.try_get("job_id")?;
    let kind: String = row.try_get("kind")?;
    let state: String = row.try_get("state")?;
    let units: String = row.try_get("units")?;
    let created_at: String = row.try_get("created_at")?;
    let completed_at: String = row.try_get("completed_at")?;

    Ok(JobSummary {
        job_id: job_id.parse().map_err(|_| corrupt("job_id", &job_id))?,
        raw_input: row.try_get("raw_input")?,
        kind: RequestKind::parse(&kind).ok_or_else(|| corrupt("kind", &kind))?,
        state: JobState::parse(&state).ok_or_else(|| corrupt("state", &state))?,
        playlist_name: row.try_get("playlist_name")?,
        units: serde_json::from_str(&units).map_err(|e| corrupt("units", &e.to_string()))?,
        created_at: parse_rfc3339(&created_at).ok_or_else(|| corrupt("created_at", &created_at))?,
        completed_at: parse_rfc3339(&completed_at)
            .ok_or_else(|| corrupt("completed_at", &completed_at))?,
    })
}

/// CSV of failed units: `query_hint,artist,title,error`
pub fn failed_tracks_csv(summary: &JobSummary) -> String {
    let mut out = String::from("query_hint,artist,title,error\n");
    for unit in summary.failed_units() {
        let fields = [
            unit.query_hint.as_str(),
            unit.artist_hint.as_deref().unwrap_or(""),
            unit.title_hint.as_deref().unwrap_or(""),
            unit.error_reason.as_deref().unwrap_or(""),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: u32, status: UnitStatus, error: Option<&str>) -> UnitSummary {
        UnitSummary {
            unit_id: UnitId(id),
            position: id as usize,
            query_hint: format!("Artist {} - Song, Part {}", id, id),
            source_locator: None,
            artist_hint: Some(format!("Artist {}", id)),
            title_hint: Some(format!("Song, Part {}", id)),
            status,
            output_path: None,
            error_reason: error.map(str::to_string),
            attempt_count: 3,
        }
    }

    fn summary(units: Vec<UnitSummary>) -> JobSummary {
        JobSummary {
            job_id: JobId::new(),
            raw_input: "x".into(),
            kind: RequestKind::PastedTrackList,
            state: JobState::CompletedWithFailures,
            playlist_name: Some("p".into()),
            units,
            created_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_csv_contains_only_failed_units() {
        let s = summary(vec![
            unit(0, UnitStatus::Succeeded, None),
            unit(1, UnitStatus::Failed, Some("fetch failed: \"403\"")),
        ]);
        let csv = failed_tracks_csv(&s);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "query_hint,artist,title,error");
        assert_eq!(
            lines[1],
            "\"Artist 1 - Song, Part 1\",Artist 1,\"Song, Part 1\",\"fetch failed: \"\"403\"\"\""
        );
    }

    #[test]
    fn test_csv_field_plain_value_is_unquoted() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field(""), "");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }
}
