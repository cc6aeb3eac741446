//! Serving scratch files (subtitle previews) out of the temp directory.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::error::ServerError;
use crate::state::AppState;

/// `GET /api/temp/{name}`: stream one file from the temp directory.
///
/// Only bare file names are accepted; anything that could walk out of the
/// temp directory is rejected before touching the filesystem.
pub async fn serve_temp(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    if !valid_name(&name) {
        return Err(ServerError::BadRequest("invalid file name".to_owned()));
    }
    let path = state.settings.read().await.temp_dir.join(&name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ServerError::NotFound(format!("no such temp file: {name}")))?;
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::valid_name;

    #[test]
    fn temp_names_must_stay_in_the_temp_dir() {
        assert!(valid_name("preview_1756100000.png"));
        assert!(valid_name("tts_0001.wav"));
        assert!(!valid_name(""));
        assert!(!valid_name("../settings.json"));
        assert!(!valid_name("sub/dir.png"));
        assert!(!valid_name("..\\config.json"));
    }
}
