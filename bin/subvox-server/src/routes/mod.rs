//! Axum router construction.
//!
//! Every JSON response uses the envelope
//! `{ "success": bool, "data": ..., "error": ... }`; handlers return the
//! success shape here and [`crate::error::ServerError`] produces the rest.

mod dubbing;
mod files;
mod progress;
mod settings;
mod subtitles;
mod tasks;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/tasks", post(tasks::create).get(tasks::list))
        .route("/api/tasks/{id}", get(tasks::detail).delete(tasks::remove))
        .route("/api/tasks/{id}/retry", post(tasks::retry))
        .route("/api/translate", post(subtitles::translate))
        .route("/api/export", post(subtitles::export))
        .route("/api/preview-subtitle", post(subtitles::preview))
        .route("/api/temp/{name}", get(files::serve_temp))
        .route("/api/run-dubbing", post(dubbing::run))
        .route("/api/video-info", post(dubbing::video_info))
        .route("/api/settings", get(settings::fetch).post(settings::save))
        .route("/api/check-api-key", post(settings::check_api_key))
        .route("/api/progress/{id}", get(progress::subscribe))
        // Outermost layers execute first on the way in.
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// `{ "success": true, "data": ... }`
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

/// `{ "success": true, "data": ..., "message": ... }`
pub fn ok_with_message<T: Serialize>(data: T, message: &str) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data, "message": message }))
}
