//! Acquisition services
//!
//! Classification and expansion run at submission time; the worker pool and
//! acquirer run units in the background; the job manager ties them together.

pub mod acquirer;
pub mod classifier;
pub mod expander;
pub mod ffmpeg_transcoder;
pub mod job_manager;
pub mod path_resolver;
pub mod retry;
pub mod tag_writer;
pub mod vibe_generator;
pub mod worker_pool;
pub mod ytdlp_fetcher;

pub use acquirer::{AcquirerSettings, TrackAcquirer, UnitFailure};
pub use classifier::{Classifier, QueryDisambiguator, SeparatorDisambiguator, VocabularyDisambiguator};
pub use expander::{ExpanderSettings, Expansion, ExpansionError, SubmitOptions, TrackListExpander};
pub use ffmpeg_transcoder::FfmpegTranscoder;
pub use job_manager::{JobError, JobManager, JobManagerSettings, SubmissionError};
pub use retry::RetryPolicy;
pub use tag_writer::LoftyTagWriter;
pub use vibe_generator::OllamaGenerator;
pub use worker_pool::{UnitExecutor, UnitReporter, WorkItem, WorkQueue, WorkerPool};
pub use ytdlp_fetcher::YtDlpFetcher;
