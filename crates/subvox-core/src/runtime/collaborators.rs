//! Collaborator seams of the pipeline.
//!
//! Each stage that talks to an external capability (VAD, ASR, translation,
//! TTS, rendering) goes through one of these traits; the executor never
//! knows which backend is behind them. Implementations return `anyhow`
//! errors, which the executor wraps as `PipelineError::Collaborator`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::ProgressFn;
use crate::config::SubtitleStyle;
use crate::subtitle::SubtitleSegment;

/// One speech region on the audio timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechSpan {
    pub start: f64,
    pub end: f64,
}

impl SpeechSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A speech span with its recognized text.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One line of the dubbing script; `id` is the subtitle segment id the
/// synthesized clip re-attaches to.
#[derive(Debug, Clone)]
pub struct DubbingLine {
    pub id: usize,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Caller-supplied dubbing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DubbingOptions {
    /// Voice override; the configured default applies when absent.
    pub voice_name: Option<String>,
    /// Burn both the original text and the translation.
    pub bilingual: bool,
    /// Gain applied to the source audio track under the dubbing.
    pub original_audio_volume: f32,
    /// Gain applied to the synthesized clips.
    pub dubbing_volume: f32,
}

impl Default for DubbingOptions {
    fn default() -> Self {
        Self {
            voice_name: None,
            bilingual: false,
            original_audio_volume: 0.1,
            dubbing_volume: 1.0,
        }
    }
}

#[async_trait]
pub trait VoiceActivityDetector: Send + Sync {
    /// Find speech regions in an audio file. An empty result is valid and
    /// aborts the pipeline upstream.
    async fn detect(&self, audio: &Path) -> anyhow::Result<Vec<SpeechSpan>>;
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe the given speech spans of `audio`. Results keep the span
    /// order; spans that produced no text may be omitted.
    async fn transcribe_spans(
        &self,
        audio: &Path,
        spans: &[SpeechSpan],
        language: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<Vec<RecognizedSpan>>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `texts` into `target_lang`, preserving length and order.
    async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<Vec<String>>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one audio clip per dubbing line, keyed by segment id.
    /// Lines may be dropped on per-line failure; an empty map is an error
    /// left to the caller.
    async fn synthesize_batch(
        &self,
        lines: &[DubbingLine],
        voice: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<HashMap<usize, PathBuf>>;
}

#[async_trait]
pub trait VideoRenderer: Send + Sync {
    /// Burn subtitles into `source` and lay the dubbed clips on its audio
    /// timeline, writing the result to `output`.
    async fn render(
        &self,
        source: &Path,
        output: &Path,
        subtitles: &[SubtitleSegment],
        clips: &HashMap<usize, PathBuf>,
        style: &SubtitleStyle,
        options: &DubbingOptions,
        on_progress: ProgressFn,
    ) -> anyhow::Result<PathBuf>;

    /// Render a single styled frame at `timestamp` for style preview.
    async fn preview(
        &self,
        source: &Path,
        output: &Path,
        sample_text: &str,
        style: &SubtitleStyle,
        timestamp: f64,
    ) -> anyhow::Result<PathBuf>;
}

/// The executor's bundle of collaborator handles.
#[derive(Clone)]
pub struct Collaborators {
    pub vad: Arc<dyn VoiceActivityDetector>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub renderer: Arc<dyn VideoRenderer>,
}
