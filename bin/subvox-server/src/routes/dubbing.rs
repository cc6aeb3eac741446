//! Dubbing submission and media-probe endpoints.

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use subvox_core::DubbingOptions;
use tracing::info;

use crate::error::ServerError;
use crate::routes::{ok, ok_with_message};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDubbingRequest {
    task_id: String,
    #[serde(default)]
    options: DubbingOptions,
}

/// `POST /api/run-dubbing`: submit the dubbing sub-pipeline. The run is
/// asynchronous; progress arrives over `/api/progress/{id}`.
pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunDubbingRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if state.store.get(&body.task_id).await.is_none() {
        return Err(ServerError::NotFound("task not found".to_owned()));
    }
    let _run = state.executor.submit_dubbing(&body.task_id, body.options);
    info!(task = %body.task_id, "dubbing submitted");
    Ok(ok_with_message(serde_json::Value::Null, "dubbing started"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfoRequest {
    file_path: String,
}

/// `POST /api/video-info`: duration and size of a media file.
pub async fn video_info(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VideoInfoRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let path = Path::new(&body.file_path);
    if !path.exists() {
        return Err(ServerError::BadRequest(format!(
            "file not found: {}",
            body.file_path
        )));
    }
    let duration = state
        .audio
        .duration(path)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    Ok(ok(json!({
        "duration": duration,
        "fileSize": size,
        "fileName": path.file_name().map(|n| n.to_string_lossy().into_owned()),
    })))
}
