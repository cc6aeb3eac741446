//! Translation, export and style-preview endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use subvox_core::{SubtitleFormat, SubtitleStyle, TaskStatus};

use crate::error::ServerError;
use crate::routes::{ok, ok_with_message};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    task_id: String,
    target_lang: Option<String>,
}

/// `POST /api/translate`: translate a completed task's subtitles and
/// return the updated task. Unlike dubbing this endpoint waits for the run.
pub async fn translate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TranslateRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let task = state
        .store
        .get(&body.task_id)
        .await
        .ok_or_else(|| ServerError::NotFound("task not found".to_owned()))?;
    if task.subtitles.is_empty() {
        return Err(ServerError::BadRequest("task has no subtitle data".to_owned()));
    }

    let run = state
        .executor
        .submit_translation(&body.task_id, body.target_lang);
    run.await
        .map_err(|e| ServerError::Internal(format!("translation run panicked: {e}")))?;

    let task = state
        .store
        .get(&body.task_id)
        .await
        .ok_or_else(|| ServerError::NotFound("task not found".to_owned()))?;
    if task.status == TaskStatus::Failed {
        return Err(ServerError::Internal(task.status_text));
    }
    Ok(ok_with_message(task, "translation finished"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    task_id: String,
    format: Option<String>,
    output_path: Option<String>,
    #[serde(default)]
    include_timestamp: bool,
}

/// `POST /api/export`: write the task's subtitles to disk.
pub async fn export(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExportRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let format_name = match body.format {
        Some(f) => f,
        None => state.settings.read().await.default_export_format.clone(),
    };
    let format: SubtitleFormat = format_name
        .parse()
        .map_err(ServerError::BadRequest)?;

    if state.store.get(&body.task_id).await.is_none() {
        return Err(ServerError::NotFound("task not found".to_owned()));
    }
    let path = state
        .executor
        .export_subtitles(
            &body.task_id,
            format,
            body.output_path.map(PathBuf::from),
            body.include_timestamp,
        )
        .await?;

    Ok(ok_with_message(
        json!({ "filePath": path, "format": format }),
        "export finished",
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    file_path: String,
    text: Option<String>,
    timestamp: Option<f64>,
    style: Option<SubtitleStyle>,
}

/// `POST /api/preview-subtitle`: render one styled frame. The optional
/// `style` in the body overrides the saved settings for this frame only;
/// the result is served back through `GET /api/temp/{name}`.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreviewRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let source = Path::new(&body.file_path);
    if !source.exists() {
        return Err(ServerError::BadRequest(format!(
            "file not found: {}",
            body.file_path
        )));
    }
    let text = body
        .text
        .unwrap_or_else(|| "This is a preview subtitle".to_owned());
    let path = state
        .executor
        .preview_subtitle(source, &text, body.timestamp.unwrap_or(1.0), body.style)
        .await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ServerError::Internal("preview path has no file name".to_owned()))?;
    Ok(ok(json!({
        "previewPath": path,
        "previewUrl": format!("/api/temp/{name}"),
    })))
}
