//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become the JSON envelope
//! `{ "success": false, "error": ... }` with an appropriate status code.
//!
//! Internal errors are logged with full detail but only a generic message
//! is returned to the caller, so file paths and upstream API responses
//! never leak to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use subvox_core::PipelineError;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the subvox-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Propagated from a pipeline operation invoked inline by a handler.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),

            // Pipeline errors triggered inline: caller mistakes map to 400,
            // a vanished task to 404, everything else stays internal.
            ServerError::Pipeline(e) => match e {
                PipelineError::TaskDeleted => {
                    (StatusCode::NOT_FOUND, "task not found".to_owned())
                }
                PipelineError::NoSubtitles
                | PipelineError::NothingToDub
                | PipelineError::InvalidState { .. } => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                other => {
                    error!(error = %other, "pipeline error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },

            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (
            status,
            Json(json!({ "success": false, "error": client_message })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        // Log the full chain before discarding it; clients only see the
        // generic message.
        error!(error = ?e, "handler error");
        ServerError::Internal(e.to_string())
    }
}
