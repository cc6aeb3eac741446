//! Speech recognition over an OpenAI-compatible `audio/transcriptions` API.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::audio::{AudioEngine, ProgressFn};
use crate::config::Config;
use crate::runtime::collaborators::{RecognizedSpan, SpeechRecognizer, SpeechSpan};

/// Probe whether a key is accepted by the speech API by listing its models.
/// Transport failures count as invalid; the caller only needs a yes or no.
pub async fn check_api_key(base_url: &str, api_key: &str) -> bool {
    let response = reqwest::Client::new()
        .get(format!("{base_url}/models"))
        .bearer_auth(api_key)
        .send()
        .await;
    match response {
        Ok(r) => r.status().is_success(),
        Err(e) => {
            warn!(error = %e, "API key check request failed");
            false
        }
    }
}

pub struct ApiRecognizer {
    http: reqwest::Client,
    audio: Arc<AudioEngine>,
    config: Arc<RwLock<Config>>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl ApiRecognizer {
    pub fn new(audio: Arc<AudioEngine>, config: Arc<RwLock<Config>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            audio,
            config,
        }
    }

    async fn transcribe_clip(
        &self,
        cfg: &Config,
        clip: &Path,
        language: &str,
    ) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(clip)
            .await
            .with_context(|| format!("reading clip {}", clip.display()))?;
        let file = reqwest::multipart::Part::bytes(bytes)
            .file_name("segment.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", cfg.api_model.clone())
            .text("language", language.to_owned());

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", cfg.api_base_url))
            .bearer_auth(&cfg.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?
            .error_for_status()
            .context("transcription API returned an error status")?;
        let body: TranscriptionResponse = response
            .json()
            .await
            .context("invalid transcription response body")?;
        Ok(body.text)
    }
}

#[async_trait]
impl SpeechRecognizer for ApiRecognizer {
    /// Uploads one clip per speech span. Span order is preserved; a failed
    /// span fails the whole stage so the run does not silently lose lines.
    async fn transcribe_spans(
        &self,
        audio: &Path,
        spans: &[SpeechSpan],
        language: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<Vec<RecognizedSpan>> {
        let cfg = self.config.read().await.clone();
        let mut results = Vec::with_capacity(spans.len());

        for (i, span) in spans.iter().enumerate() {
            let clip = self
                .audio
                .extract_segment(audio, span.start, span.end, None)
                .await
                .with_context(|| format!("extracting span {:.3}..{:.3}", span.start, span.end))?;

            let text = self.transcribe_clip(&cfg, &clip, language).await;
            if let Err(e) = tokio::fs::remove_file(&clip).await {
                warn!(clip = %clip.display(), error = %e, "clip cleanup failed");
            }
            let text = text?;
            debug!(span = i, chars = text.len(), "span transcribed");
            results.push(RecognizedSpan {
                start: span.start,
                end: span.end,
                text,
            });

            on_progress((i + 1) as f32 / spans.len() as f32 * 100.0);
        }
        Ok(results)
    }
}
