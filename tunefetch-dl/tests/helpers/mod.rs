//! Shared test helpers: in-process fakes for every external collaborator
//! and a harness that runs a real job manager and worker pool over them.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use tunefetch_dl::config::AcquisitionConfig;
use tunefetch_dl::db::{init_tables, HistoryStore};
use tunefetch_dl::models::{JobId, JobSnapshot, TrackMetadata};
use tunefetch_dl::services::{JobManager, WorkerPool};
use tunefetch_dl::types::{
    FetchError, FetchTarget, FetchedAudio, FetchedMetadata, GeneratedTrack, GeneratorError,
    MediaFetcher, ResolvedPlaylist, TagError, TagWriter, TracklistGenerator, TranscodeError,
    Transcoder,
};
use tunefetch_dl::{start_acquisition, Collaborators};

/// Key a fake fetch is looked up by: the locator, or the search text
pub fn target_key(target: &FetchTarget) -> String {
    match target {
        FetchTarget::Locator(url) => url.clone(),
        FetchTarget::Search(query) => query.clone(),
    }
}

/// Fetcher that writes a small file into the staging directory.
///
/// Failures are scripted per target; an optional gate holds fetches until
/// the test releases them.
pub struct FakeFetcher {
    failures: Mutex<HashMap<String, u32>>,
    metadata: Mutex<HashMap<String, FetchedMetadata>>,
    playlists: Mutex<HashMap<String, Result<ResolvedPlaylist, String>>>,
    attempts: Mutex<HashMap<String, u32>>,
    gate: Option<Semaphore>,
    running: AtomicUsize,
    pub peak_concurrency: AtomicUsize,
    pub playlist_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            metadata: Mutex::new(HashMap::new()),
            playlists: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            gate: None,
            running: AtomicUsize::new(0),
            peak_concurrency: AtomicUsize::new(0),
            playlist_calls: AtomicUsize::new(0),
        }
    }

    /// Every fetch blocks until [`FakeFetcher::release`] lets it through
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Fail the next `times` fetches of `key`
    pub fn fail(&self, key: &str, times: u32) {
        self.failures.lock().unwrap().insert(key.to_string(), times);
    }

    pub fn fail_always(&self, key: &str) {
        self.fail(key, u32::MAX);
    }

    pub fn set_metadata(&self, key: &str, artist: &str, title: &str, album: Option<&str>) {
        self.metadata.lock().unwrap().insert(
            key.to_string(),
            FetchedMetadata {
                artist: Some(artist.to_string()),
                title: Some(title.to_string()),
                album: album.map(str::to_string),
            },
        );
    }

    pub fn set_playlist(&self, url: &str, playlist: Result<ResolvedPlaylist, String>) {
        self.playlists.lock().unwrap().insert(url.to_string(), playlist);
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, target: &FetchTarget, staging_dir: &Path) -> Result<FetchedAudio, FetchError> {
        let key = target_key(target);
        *self.attempts.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        } else {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(FetchError::ExecutionFailed(format!("scripted failure for {}", key)));
        }

        let path = staging_dir.join("download.webm");
        tokio::fs::write(&path, key.as_bytes()).await?;

        let metadata = self.metadata.lock().unwrap().get(&key).cloned().unwrap_or_default();
        Ok(FetchedAudio { path, metadata })
    }

    async fn resolve_playlist(&self, url: &str) -> Result<ResolvedPlaylist, FetchError> {
        self.playlist_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.playlists.lock().unwrap().get(url).cloned();
        match scripted {
            Some(Ok(playlist)) => Ok(playlist),
            Some(Err(reason)) => Err(FetchError::ExecutionFailed(reason)),
            None => Err(FetchError::NoResult(url.to_string())),
        }
    }
}

/// Renames the raw download to an `.mp3` next to it
#[derive(Default)]
pub struct FakeTranscoder;

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, _bitrate_kbps: u32) -> Result<PathBuf, TranscodeError> {
        let output = input.with_extension("mp3");
        tokio::fs::rename(input, &output).await?;
        Ok(output)
    }
}

/// Records the metadata it was asked to write
#[derive(Default)]
pub struct RecordingTagger {
    pub written: Mutex<Vec<TrackMetadata>>,
}

#[async_trait]
impl TagWriter for RecordingTagger {
    async fn write_tags(&self, _file: &Path, metadata: &TrackMetadata) -> Result<(), TagError> {
        self.written.lock().unwrap().push(metadata.clone());
        Ok(())
    }
}

/// Returns a scripted track list, or a scripted failure
pub struct FakeGenerator {
    response: Mutex<Result<Vec<GeneratedTrack>, String>>,
    pub calls: AtomicUsize,
    pub last_count: AtomicUsize,
}

impl FakeGenerator {
    pub fn returning(pairs: &[(&str, &str)]) -> Self {
        Self {
            response: Mutex::new(Ok(pairs
                .iter()
                .map(|(artist, title)| GeneratedTrack {
                    artist: artist.to_string(),
                    title: title.to_string(),
                })
                .collect())),
            calls: AtomicUsize::new(0),
            last_count: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            response: Mutex::new(Err(reason.to_string())),
            calls: AtomicUsize::new(0),
            last_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TracklistGenerator for FakeGenerator {
    async fn generate(&self, _description: &str, max_count: usize) -> Result<Vec<GeneratedTrack>, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_count.store(max_count, Ordering::SeqCst);
        let response = self.response.lock().unwrap().clone();
        response.map_err(GeneratorError::InvalidResponse)
    }
}

/// Ten distinct pairs with one duplicate, for vibe tests
pub fn road_trip_pairs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Phoenix", "1901"),
        ("MGMT", "Kids"),
        ("Passion Pit", "Sleepyhead"),
        ("Foster the People", "Pumped Up Kicks"),
        ("Two Door Cinema Club", "What You Know"),
        ("The Strokes", "Last Nite"),
        ("Vampire Weekend", "A-Punk"),
        ("mgmt", "kids"),
        ("Arctic Monkeys", "Do I Wanna Know?"),
        ("Tame Impala", "Elephant"),
    ]
}

/// Fast settings for tests: short backoff, small timeouts
pub fn test_settings(download_root: &Path, workers: usize, max_attempts: u32) -> AcquisitionConfig {
    AcquisitionConfig {
        worker_count: workers,
        max_attempts,
        initial_backoff_ms: 10,
        max_backoff_ms: 40,
        expansion_timeout_secs: 5,
        external_call_timeout_secs: 2,
        external_call_attempts: 2,
        download_dir: download_root.join("downloads"),
        staging_dir: Some(download_root.join("staging")),
        ..AcquisitionConfig::default()
    }
}

/// Real job manager and worker pool over fake collaborators
pub struct Harness {
    pub jobs: JobManager,
    pub pool: WorkerPool,
    pub fetcher: Arc<FakeFetcher>,
    pub tagger: Arc<RecordingTagger>,
    pub generator: Arc<FakeGenerator>,
    pub shutdown: CancellationToken,
    pub dir: TempDir,
}

impl Harness {
    pub fn downloads(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }
}

pub struct HarnessBuilder {
    workers: usize,
    max_attempts: u32,
    backoff_ms: Option<(u64, u64)>,
    fetcher: FakeFetcher,
    generator: FakeGenerator,
    history: Option<HistoryStore>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            backoff_ms: None,
            fetcher: FakeFetcher::new(),
            generator: FakeGenerator::returning(&road_trip_pairs()),
            history: None,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Slower retries, for tests that look at a unit while it waits
    pub fn backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.backoff_ms = Some((initial, max));
        self
    }

    pub fn fetcher(mut self, fetcher: FakeFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn generator(mut self, generator: FakeGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn start(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path(), self.workers, self.max_attempts);
        if let Some((initial, max)) = self.backoff_ms {
            settings.initial_backoff_ms = initial;
            settings.max_backoff_ms = max;
        }

        let fetcher = Arc::new(self.fetcher);
        let tagger = Arc::new(RecordingTagger::default());
        let generator = Arc::new(self.generator);
        let shutdown = CancellationToken::new();

        let collaborators = Collaborators {
            fetcher: fetcher.clone(),
            transcoder: Arc::new(FakeTranscoder),
            tagger: tagger.clone(),
            generator: generator.clone(),
        };

        let running = start_acquisition(&settings, None, collaborators, self.history, shutdown.clone());

        Harness {
            jobs: running.jobs,
            pool: running.pool,
            fetcher,
            tagger,
            generator,
            shutdown,
            dir,
        }
    }
}

/// Single-connection in-memory history database
pub async fn memory_history() -> HistoryStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    HistoryStore::new(pool, 1_000)
}

/// Poll until `check` holds for the job's snapshot
pub async fn wait_for<F>(jobs: &JobManager, job_id: JobId, check: F) -> JobSnapshot
where
    F: Fn(&JobSnapshot) -> bool,
{
    for _ in 0..500 {
        let snapshot = jobs.get_status(job_id).await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "condition not reached for job {}: {:?}",
        job_id,
        jobs.get_status(job_id).await.unwrap()
    );
}

pub async fn wait_for_terminal(jobs: &JobManager, job_id: JobId) -> JobSnapshot {
    wait_for(jobs, job_id, |s| s.state.is_terminal()).await
}
