//! Application-settings endpoints.
//!
//! `POST` accepts a partial settings object: supplied keys are merged over
//! the current settings, numeric fields are clamped into their supported
//! ranges, and the result is persisted to the settings file.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use subvox_core::Config;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::routes::{ok, ok_with_message};
use crate::state::AppState;

/// `GET /api/settings`
pub async fn fetch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    Ok(ok(state.settings.read().await.clone()))
}

/// `POST /api/settings`
pub async fn save(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let serde_json::Value::Object(patch) = patch else {
        return Err(ServerError::BadRequest("settings body must be an object".to_owned()));
    };

    let merged = {
        let current = state.settings.read().await.clone();
        let mut value = serde_json::to_value(&current)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        if let serde_json::Value::Object(map) = &mut value {
            for (key, entry) in patch {
                map.insert(key, entry);
            }
        }
        let mut cfg: Config = serde_json::from_value(value)
            .map_err(|e| ServerError::BadRequest(format!("invalid settings: {e}")))?;
        cfg.clamp_ranges();
        cfg
    };

    merged
        .save(&state.settings_path)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    *state.settings.write().await = merged.clone();
    info!("settings updated");
    Ok(ok_with_message(merged, "settings saved"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckApiKeyRequest {
    api_key: Option<String>,
}

/// `POST /api/check-api-key`: verify the speech API key against the
/// upstream service. A key supplied in the body replaces the saved one and
/// is persisted once it checks out.
pub async fn check_api_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckApiKeyRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let supplied = body.api_key.filter(|k| !k.is_empty());
    if let Some(key) = &supplied {
        state.settings.write().await.api_key = key.clone();
    }

    let (base_url, key) = {
        let settings = state.settings.read().await;
        (settings.api_base_url.clone(), settings.api_key.clone())
    };
    let valid = subvox_core::services::check_api_key(&base_url, &key).await;

    if valid && supplied.is_some() {
        let snapshot = state.settings.read().await.clone();
        if let Err(e) = snapshot.save(&state.settings_path) {
            warn!(error = %e, "failed to persist verified API key");
        }
    }
    Ok(ok(json!({ "valid": valid })))
}
