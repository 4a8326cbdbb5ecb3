//! Data model: classified requests, track units, jobs

pub mod job;
pub mod request;
pub mod track;

pub use job::{
    Job, JobContext, JobId, JobProgress, JobSnapshot, JobState, OutputLayout, StateTransition,
    UnitSnapshot,
};
pub use request::{ClassifiedRequest, LinkSource, RequestKind, RequestPayload};
pub use track::{TrackMetadata, TrackUnit, UnitId, UnitOutcome, UnitStatus, CANCELLED_REASON};
