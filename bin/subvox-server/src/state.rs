//! Shared application state injected into every Axum handler.

use std::path::PathBuf;
use std::sync::Arc;

use subvox_core::{
    AudioEngine, Config, PipelineExecutor, ProgressBroadcaster, TaskStore,
};
use tokio::sync::RwLock;

/// State shared across all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live application settings, shared with the executor and services.
    pub settings: Arc<RwLock<Config>>,
    /// Where settings updates are persisted.
    pub settings_path: PathBuf,
    pub store: Arc<TaskStore>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub executor: Arc<PipelineExecutor>,
    pub audio: Arc<AudioEngine>,
}
