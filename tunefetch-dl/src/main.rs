//! tunefetch-dl - music acquisition service
//!
//! Accepts free-form requests (media URLs, playlists, pasted track lists,
//! searches, mood descriptions), turns them into download jobs and fetches
//! the tracks in the background as tagged MP3 files.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunefetch_common::config::{default_config_path, read_toml_config, resolve_root_folder};
use tunefetch_common::time::secs_to_duration;
use tunefetch_dl::config::TomlConfig;
use tunefetch_dl::services::{
    Classifier, FfmpegTranscoder, LoftyTagWriter, OllamaGenerator, YtDlpFetcher,
};
use tunefetch_dl::{resolve_download_dir, start_acquisition, AppState, Collaborators};

const MODULE_NAME: &str = "tunefetch-dl";

/// Command-line arguments for tunefetch-dl
#[derive(Parser, Debug)]
#[command(name = "tunefetch-dl")]
#[command(about = "Music acquisition service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5780", env = "TUNEFETCH_PORT")]
    port: u16,

    /// TOML configuration file
    #[arg(short, long, env = "TUNEFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the history database and relative download dirs
    #[arg(short, long, env = "TUNEFETCH_ROOT_FOLDER")]
    root_folder: Option<String>,

    /// Concurrent download workers
    #[arg(short, long, env = "TUNEFETCH_WORKERS")]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let loaded = config_path
        .as_deref()
        .filter(|path| path.exists())
        .map(read_toml_config::<TomlConfig>);
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => TomlConfig::default(),
    };
    config.apply_env_overrides();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("tunefetch_dl={},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tunefetch-dl on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    // Logged here because tracing is not up while the file is read
    match (&config_path, &loaded) {
        (Some(path), Some(Ok(_))) => info!("Config file: {}", path.display()),
        (Some(path), Some(Err(e))) => {
            warn!(path = %path.display(), error = %e, "Config file unusable, using defaults")
        }
        (Some(path), None) => info!("Config file {} not found, using defaults", path.display()),
        (None, _) => warn!("No config directory available, using defaults"),
    }

    // CLI > env > TOML > OS default
    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        "TUNEFETCH_ROOT_FOLDER",
        config.root_folder.as_deref(),
    );
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let mut acquisition = config.acquisition.clone();
    acquisition.download_dir = resolve_download_dir(&root_folder, &acquisition.download_dir);
    acquisition.staging_dir = acquisition
        .staging_dir
        .map(|dir| resolve_download_dir(&root_folder, &dir));
    info!("Download directory: {}", acquisition.download_dir.display());

    let db_path = root_folder.join("history.db");
    info!("Database: {}", db_path.display());
    let db_pool = tunefetch_dl::db::init_database_pool(&db_path)
        .await
        .context("Failed to open history database")?;
    let history = tunefetch_dl::db::HistoryStore::new(db_pool, acquisition.db_max_lock_wait_ms);

    let fetch_timeout = secs_to_duration(config.tools.fetch_timeout_secs);
    let generator = OllamaGenerator::new(
        config.generator.url.clone(),
        config.generator.model.clone(),
        acquisition.external_call_timeout(),
    )
    .context("Failed to build generator client")?;
    if !generator.health_check().await {
        warn!(url = %config.generator.url, "Generator not reachable; vibe requests will fail until it is");
    }

    let collaborators = Collaborators {
        fetcher: Arc::new(YtDlpFetcher::new(
            config.tools.ytdlp_bin.clone(),
            fetch_timeout,
            config.tools.search_suffix.clone(),
        )),
        transcoder: Arc::new(FfmpegTranscoder::new(config.tools.ffmpeg_bin.clone(), fetch_timeout)),
        tagger: Arc::new(LoftyTagWriter),
        generator: Arc::new(generator),
    };

    let shutdown = CancellationToken::new();
    let running = start_acquisition(
        &acquisition,
        args.workers,
        collaborators,
        Some(history),
        shutdown.clone(),
    );
    info!("Worker pool: {} workers", running.pool.worker_count());

    let state = AppState::new(running.jobs.clone(), Classifier::default());
    let app = tunefetch_dl::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, waiting for workers");
    running.pool.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
