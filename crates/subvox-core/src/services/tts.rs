//! Dubbing clip synthesis over an `audio/speech` API.
//!
//! Each clip is time-fitted to its subtitle span: a clip that runs long is
//! sped up with the pitch-preserving stretch so it ends before the next cue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::audio::{AudioEngine, ProgressFn};
use crate::config::Config;
use crate::runtime::collaborators::{DubbingLine, SpeechSynthesizer};

/// Clips longer than their span by more than this ratio get stretched.
const FIT_TOLERANCE: f64 = 1.02;

pub struct ApiSynthesizer {
    http: reqwest::Client,
    audio: Arc<AudioEngine>,
    config: Arc<RwLock<Config>>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

impl ApiSynthesizer {
    pub fn new(audio: Arc<AudioEngine>, config: Arc<RwLock<Config>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            audio,
            config,
        }
    }

    async fn synthesize_line(
        &self,
        cfg: &Config,
        line: &DubbingLine,
        voice: &str,
    ) -> anyhow::Result<PathBuf> {
        let request = SpeechRequest {
            model: &cfg.tts_model,
            input: &line.text,
            voice,
            response_format: "wav",
        };
        let response = self
            .http
            .post(format!("{}/audio/speech", cfg.api_base_url))
            .bearer_auth(&cfg.api_key)
            .json(&request)
            .send()
            .await
            .context("speech request failed")?
            .error_for_status()
            .context("speech API returned an error status")?;
        let bytes = response
            .bytes()
            .await
            .context("reading synthesized audio body")?;

        let raw = self.audio.temp_dir().join(format!("dub_{}_raw.wav", line.id));
        tokio::fs::write(&raw, &bytes)
            .await
            .with_context(|| format!("writing clip {}", raw.display()))?;

        // Time-fit: speed the clip up when it overruns its span.
        let span = line.end - line.start;
        if span > 0.05 {
            let actual = self.audio.duration(&raw).await?;
            let factor = actual / span;
            if factor > FIT_TOLERANCE {
                let fitted = self.audio.temp_dir().join(format!("dub_{}.wav", line.id));
                self.audio.adjust_speed(&raw, &fitted, factor, true).await?;
                let _ = tokio::fs::remove_file(&raw).await;
                debug!(segment = line.id, factor, "clip time-fitted");
                return Ok(fitted);
            }
        }
        Ok(raw)
    }
}

#[async_trait]
impl SpeechSynthesizer for ApiSynthesizer {
    /// Failed lines are logged and skipped so one bad segment does not sink
    /// the whole dubbing run; the executor rejects an empty script upfront.
    async fn synthesize_batch(
        &self,
        lines: &[DubbingLine],
        voice: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<HashMap<usize, PathBuf>> {
        let cfg = self.config.read().await.clone();
        let mut clips = HashMap::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            match self.synthesize_line(&cfg, line, voice).await {
                Ok(path) => {
                    clips.insert(line.id, path);
                }
                Err(e) => warn!(segment = line.id, error = %e, "line synthesis failed; skipped"),
            }
            on_progress((i + 1) as f32 / lines.len() as f32 * 100.0);
        }
        anyhow::ensure!(!clips.is_empty(), "every dubbing line failed to synthesize");
        Ok(clips)
    }
}
