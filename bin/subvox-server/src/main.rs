//! subvox-server entry point.
//!
//! Startup order:
//! 1. Parse server configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Load the JSON application settings and prepare the work directories.
//! 4. Build the core: audio engine, task store, broadcaster, executor.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use subvox_core::services::default_collaborators;
use subvox_core::{AudioEngine, Config, PipelineExecutor, ProgressBroadcaster, TaskStore};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let server_cfg = ServerConfig::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match server_cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: SUBVOX_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    server_cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if server_cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "subvox-server starting");

    // ── 3. Application settings ────────────────────────────────────────────────
    let settings_path = PathBuf::from(&server_cfg.settings_path);
    let mut settings = Config::load(&settings_path);
    settings.clamp_ranges();
    settings.ensure_dirs()?;
    let max_concurrent = settings.max_concurrent_tasks;

    // ── 4. Core runtime ────────────────────────────────────────────────────────
    let audio = Arc::new(AudioEngine::new(&settings)?);
    let settings = Arc::new(RwLock::new(settings));

    let store = Arc::new(TaskStore::new());
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    {
        let bus = Arc::clone(&broadcaster);
        store.set_progress_hook(Arc::new(move |event| bus.publish(event)));
    }

    let collaborators = default_collaborators(Arc::clone(&audio), Arc::clone(&settings));
    let executor = Arc::new(PipelineExecutor::new(
        Arc::clone(&store),
        Arc::clone(&audio),
        collaborators,
        Arc::clone(&settings),
        max_concurrent,
    ));
    info!(max_concurrent, "pipeline executor ready");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState {
        settings,
        settings_path,
        store,
        broadcaster,
        executor,
        audio,
    });

    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = server_cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.audio.cleanup_temp_wavs();
    info!("subvox-server stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
