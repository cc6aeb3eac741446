//! Application settings, persisted as JSON.
//!
//! Field names are camelCase on the wire so the same representation serves
//! both the settings file and the `/api/settings` endpoint.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Subtitle burn-in style, passed to the video renderer as ASS overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubtitleStyle {
    pub font_name: String,
    pub font_size: u32,
    /// `#RRGGBB` hex, converted to ASS `&HBBGGRR&` by the renderer.
    pub primary_color: String,
    pub outline_color: String,
    pub outline_width: f32,
    pub margin_v: u32,
    pub bold: bool,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: "Arial".to_owned(),
            font_size: 70,
            primary_color: "#FFA500".to_owned(),
            outline_color: "#000000".to_owned(),
            outline_width: 2.0,
            margin_v: 30,
            bold: true,
        }
    }
}

/// Runtime configuration.
///
/// Every field has a default so the service works without a settings file;
/// [`Config::load`] merges whatever the file provides on top of the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    // ── Speech API ────────────────────────────────────────────────────────────
    pub api_key: String,
    pub api_base_url: String,
    pub api_model: String,
    pub asr_language: String,

    // ── Voice-activity detection ──────────────────────────────────────────────
    /// Frames quieter than this RMS level (dBFS) are treated as silence.
    pub vad_min_volume_db: f32,
    /// Speech spans shorter than this are dropped (seconds).
    pub min_speech_duration: f64,
    /// Gaps shorter than this do not split a span (seconds).
    pub min_silence_duration: f64,
    /// Spans longer than this are cut so subtitle cues stay readable (seconds).
    pub max_speech_duration: f64,

    // ── Task orchestration ────────────────────────────────────────────────────
    pub max_concurrent_tasks: usize,
    /// Audio chunk window used for streaming recognition (seconds).
    pub chunk_duration: f64,
    /// Backward overlap between consecutive chunks (seconds).
    pub chunk_overlap: f64,

    // ── Translation ───────────────────────────────────────────────────────────
    pub translation_model: String,
    pub translation_target_lang: String,
    pub translation_batch_size: usize,

    // ── Text-to-speech ────────────────────────────────────────────────────────
    pub tts_model: String,
    pub tts_voice_name: String,

    // ── Transcoder ────────────────────────────────────────────────────────────
    /// Explicit ffmpeg binary; empty string means "discover".
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    // ── Export ────────────────────────────────────────────────────────────────
    pub subtitle_style: SubtitleStyle,
    pub default_export_format: String,
    /// Custom export directory; empty means "not set".
    pub export_path: String,
    /// Separate directory for subtitle files; empty falls back to `export_path`.
    pub export_subtitle_path: String,
    /// When no valid custom path is set, export next to the source video.
    pub use_source_folder: bool,
    pub video_filename_prefix: String,

    // ── Paths ─────────────────────────────────────────────────────────────────
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://api.siliconflow.cn/v1".to_owned(),
            api_model: "iic/SenseVoiceSmall".to_owned(),
            asr_language: "zh".to_owned(),

            vad_min_volume_db: -40.0,
            min_speech_duration: 0.1,
            min_silence_duration: 0.05,
            max_speech_duration: 5.0,

            max_concurrent_tasks: 3,
            chunk_duration: 30.0,
            chunk_overlap: 1.0,

            translation_model: String::new(),
            translation_target_lang: "en".to_owned(),
            translation_batch_size: 20,

            tts_model: "IndexTeam/IndexTTS-2".to_owned(),
            tts_voice_name: "cloned_voice".to_owned(),

            ffmpeg_path: String::new(),
            ffprobe_path: String::new(),

            subtitle_style: SubtitleStyle::default(),
            default_export_format: "srt".to_owned(),
            export_path: String::new(),
            export_subtitle_path: String::new(),
            use_source_folder: true,
            video_filename_prefix: String::new(),

            temp_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(mut cfg) => {
                    cfg.clamp_ranges();
                    info!(path = %path.display(), "settings loaded");
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "settings file invalid; using defaults");
                    Config::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no settings file; using defaults");
                Config::default()
            }
        }
    }

    /// Persist the current settings as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, raw)?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Create the scratch and output directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Clamp user-supplied numeric fields into their supported ranges.
    pub fn clamp_ranges(&mut self) {
        self.max_concurrent_tasks = self.max_concurrent_tasks.clamp(1, 20);
        self.translation_batch_size = self.translation_batch_size.clamp(1, 100);
        self.vad_min_volume_db = self.vad_min_volume_db.clamp(-80.0, 0.0);
        self.min_speech_duration = self.min_speech_duration.clamp(0.01, 5.0);
        self.min_silence_duration = self.min_silence_duration.clamp(0.01, 2.0);
        self.max_speech_duration = self.max_speech_duration.clamp(1.0, 60.0);
        self.chunk_duration = self.chunk_duration.clamp(5.0, 120.0);
        self.chunk_overlap = self.chunk_overlap.clamp(0.0, self.chunk_duration / 2.0);
    }

    /// Explicit ffmpeg path, when configured and existing.
    pub fn ffmpeg_override(&self) -> Option<PathBuf> {
        non_empty_path(&self.ffmpeg_path)
    }

    /// Explicit ffprobe path, when configured and existing.
    pub fn ffprobe_override(&self) -> Option<PathBuf> {
        non_empty_path(&self.ffprobe_path)
    }
}

fn non_empty_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = PathBuf::from(trimmed);
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = Config::default();
        let raw = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.max_concurrent_tasks, cfg.max_concurrent_tasks);
        assert_eq!(back.translation_target_lang, "en");
    }

    #[test]
    fn unknown_and_missing_fields_tolerated() {
        // Partial settings file with an extra key: defaults fill the rest.
        let cfg: Config =
            serde_json::from_str(r#"{"maxConcurrentTasks": 7, "theme": "dark"}"#).unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 7);
        assert_eq!(cfg.chunk_duration, 30.0);
    }

    #[test]
    fn clamp_limits_task_concurrency() {
        let mut cfg = Config {
            max_concurrent_tasks: 500,
            chunk_overlap: 29.0,
            ..Config::default()
        };
        cfg.clamp_ranges();
        assert_eq!(cfg.max_concurrent_tasks, 20);
        assert!(cfg.chunk_overlap <= cfg.chunk_duration / 2.0);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.json"));
        assert_eq!(cfg.asr_language, "zh");
    }
}
