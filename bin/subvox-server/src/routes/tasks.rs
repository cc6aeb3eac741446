//! Task lifecycle endpoints.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::error::ServerError;
use crate::routes::{ok, ok_with_message};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    file_path: String,
    file_name: Option<String>,
    file_size: Option<u64>,
}

/// `POST /api/tasks`: create a task and immediately submit the
/// transcription run.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let path = Path::new(&body.file_path);
    if !path.exists() {
        return Err(ServerError::BadRequest(format!(
            "file not found: {}",
            body.file_path
        )));
    }

    let task = state.store.create(path).await;
    let task = state
        .store
        .override_file_meta(&task.id, body.file_name, body.file_size)
        .await
        .unwrap_or(task);
    info!(task = %task.id, file = %task.file_name, "task created");

    // Fire and track nothing here: progress flows through the store hook.
    let _run = state.executor.submit_transcription(&task.id);
    Ok(ok(task))
}

/// `GET /api/tasks`
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    Ok(ok(state.store.list_all().await))
}

/// `GET /api/tasks/{id}`
pub async fn detail(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let task = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| ServerError::NotFound("task not found".to_owned()))?;
    Ok(ok(task))
}

/// `DELETE /api/tasks/{id}`
pub async fn remove(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.store.delete(&id).await {
        return Err(ServerError::NotFound("task not found".to_owned()));
    }
    state.broadcaster.remove(&id);
    info!(task = %id, "task deleted");
    Ok(ok_with_message(serde_json::Value::Null, "task deleted"))
}

/// `POST /api/tasks/{id}/retry`: reset a finished task and run it again.
pub async fn retry(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let Some(_run) = state.executor.retry(&id).await else {
        return Err(ServerError::NotFound("task not found".to_owned()));
    };
    let task = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| ServerError::NotFound("task not found".to_owned()))?;
    Ok(ok(task))
}
