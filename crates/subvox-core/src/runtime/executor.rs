//! The pipeline executor: runs the transcription chain and the re-enterable
//! translation and dubbing sub-pipelines against the task store.
//!
//! One submitted run = one `tokio::spawn`. A semaphore sized by
//! `max_concurrent_tasks` gates admission; runs past the limit queue rather
//! than failing. Every run ends in `Completed` or `Failed`, except a run
//! whose task was deleted mid-flight, which stops writing and only cleans up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{AudioEngine, ExtractOptions, ProgressFn};
use crate::config::{Config, SubtitleStyle};
use crate::runtime::collaborators::{Collaborators, DubbingLine, DubbingOptions};
use crate::runtime::store::TaskStore;
use crate::runtime::types::{PipelineError, StageSpan, TaskStatus};
use crate::subtitle::{SubtitleAssembler, SubtitleFormat, SubtitleSegment};

// ── Stage-span table ──────────────────────────────────────────────────────────
// The single source of truth mapping stage-local progress onto the task's
// 0..100 scale.

const EXTRACT: StageSpan = StageSpan::new(0.0, 5.0);
const DETECT: StageSpan = StageSpan::new(5.0, 15.0);
const RECOGNIZE: StageSpan = StageSpan::new(15.0, 65.0);
const ASSEMBLE: StageSpan = StageSpan::new(65.0, 100.0);

const TRANSLATE: StageSpan = StageSpan::new(70.0, 90.0);

const SYNTHESIZE: StageSpan = StageSpan::new(10.0, 50.0);
const RENDER: StageSpan = StageSpan::new(60.0, 95.0);

pub struct PipelineExecutor {
    store: Arc<TaskStore>,
    audio: Arc<AudioEngine>,
    collaborators: Collaborators,
    config: Arc<RwLock<Config>>,
    gate: Arc<Semaphore>,
}

impl PipelineExecutor {
    /// The gate capacity is fixed from the settings at construction;
    /// later settings changes apply on restart.
    pub fn new(
        store: Arc<TaskStore>,
        audio: Arc<AudioEngine>,
        collaborators: Collaborators,
        config: Arc<RwLock<Config>>,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            store,
            audio,
            collaborators,
            config,
            gate: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn audio(&self) -> &Arc<AudioEngine> {
        &self.audio
    }

    // ── Submission ────────────────────────────────────────────────────────────

    /// Spawn the mandatory transcription chain for a `Pending` task.
    pub fn submit_transcription(self: &Arc<Self>, task_id: &str) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        let task_id = task_id.to_owned();
        tokio::spawn(async move {
            let result = {
                let _permit = executor.admit().await;
                executor.run_transcription(&task_id).await
            };
            executor.finish_run(&task_id, "transcription", result).await;
        })
    }

    /// Spawn the translation sub-pipeline on a finished task with subtitles.
    pub fn submit_translation(self: &Arc<Self>, task_id: &str, target_lang: Option<String>) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        let task_id = task_id.to_owned();
        tokio::spawn(async move {
            let result = {
                let _permit = executor.admit().await;
                executor.run_translation(&task_id, target_lang).await
            };
            executor.finish_run(&task_id, "translation", result).await;
        })
    }

    /// Spawn the dubbing sub-pipeline on a finished task with subtitles.
    pub fn submit_dubbing(self: &Arc<Self>, task_id: &str, options: DubbingOptions) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        let task_id = task_id.to_owned();
        tokio::spawn(async move {
            let result = {
                let _permit = executor.admit().await;
                executor.run_dubbing(&task_id, options).await
            };
            executor.finish_run(&task_id, "dubbing", result).await;
        })
    }

    /// Reset a finished task and spawn a fresh transcription run.
    pub async fn retry(self: &Arc<Self>, task_id: &str) -> Option<JoinHandle<()>> {
        if !self.store.reset_for_retry(task_id).await {
            return None;
        }
        Some(self.submit_transcription(task_id))
    }

    async fn admit(&self) -> tokio::sync::OwnedSemaphorePermit {
        match Arc::clone(&self.gate).acquire_owned().await {
            Ok(permit) => permit,
            // The gate is never closed while the executor is alive.
            Err(_closed) => unreachable!("executor semaphore closed"),
        }
    }

    /// Record the run outcome and always run scratch cleanup.
    async fn finish_run(&self, task_id: &str, pipeline: &str, result: Result<(), PipelineError>) {
        match result {
            Ok(()) => info!(task = task_id, pipeline, "run completed"),
            Err(PipelineError::TaskDeleted) => {
                debug!(task = task_id, pipeline, "task deleted mid-run; stopped writing")
            }
            Err(e) => {
                error!(task = task_id, pipeline, error = %e, "run failed");
                // Monotone clamp keeps the last progress on failure.
                self.store
                    .update_status(task_id, TaskStatus::Failed, 0.0, &format!("error: {e}"), None)
                    .await;
            }
        }
        self.cleanup_previews().await;
    }

    /// Advance the task, aborting the run when the task no longer exists.
    async fn advance(
        &self,
        task_id: &str,
        progress: f32,
        status_text: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), PipelineError> {
        if self
            .store
            .update_status(task_id, TaskStatus::Processing, progress, status_text, data)
            .await
        {
            Ok(())
        } else {
            Err(PipelineError::TaskDeleted)
        }
    }

    /// A progress callback that maps collaborator-local progress into `span`.
    fn stage_progress(self: &Arc<Self>, task_id: &str, span: StageSpan, text: &str) -> ProgressFn {
        let store = Arc::clone(&self.store);
        let task_id = task_id.to_owned();
        let text = text.to_owned();
        Arc::new(move |inner: f32| {
            let store = Arc::clone(&store);
            let task_id = task_id.clone();
            let text = text.clone();
            // Fired from inside collaborator calls; updates are async, so
            // hop onto the runtime. `report_progress` ignores callbacks that
            // land after the run already finished.
            tokio::spawn(async move {
                store.report_progress(&task_id, span.at(inner), &text).await;
            });
        })
    }

    // ── Transcription chain ───────────────────────────────────────────────────

    async fn run_transcription(self: &Arc<Self>, task_id: &str) -> Result<(), PipelineError> {
        let task = self.store.get(task_id).await.ok_or(PipelineError::TaskDeleted)?;
        let cfg = self.config.read().await.clone();

        self.advance(task_id, EXTRACT.at(0.0), "extracting audio", None)
            .await?;
        let audio_path = self
            .audio
            .extract_audio(&task.file_path, ExtractOptions::default(), None)
            .await?;
        self.store.set_audio_path(task_id, audio_path.clone()).await;

        self.advance(task_id, DETECT.at(0.0), "detecting speech", None)
            .await?;
        let spans = self
            .collaborators
            .vad
            .detect(&audio_path)
            .await
            .map_err(|e| PipelineError::collaborator("voice activity detection", e))?;
        if spans.is_empty() {
            return Err(PipelineError::NoSpeechDetected);
        }

        self.advance(
            task_id,
            RECOGNIZE.at(0.0),
            &format!("recognizing speech ({} spans)", spans.len()),
            None,
        )
        .await?;
        let on_progress = self.stage_progress(task_id, RECOGNIZE, "recognizing speech");
        let recognized = self
            .collaborators
            .recognizer
            .transcribe_spans(&audio_path, &spans, &cfg.asr_language, on_progress)
            .await
            .map_err(|e| PipelineError::collaborator("speech recognition", e))?;

        self.advance(task_id, ASSEMBLE.at(0.0), "assembling subtitles", None)
            .await?;
        let subtitles = SubtitleAssembler::from_recognition(&recognized);
        let payload = serde_json::to_value(&subtitles).ok();
        self.store.set_subtitles(task_id, subtitles).await;

        if !self
            .store
            .update_status(task_id, TaskStatus::Completed, 100.0, "completed", payload)
            .await
        {
            return Err(PipelineError::TaskDeleted);
        }
        Ok(())
    }

    // ── Translation sub-pipeline ──────────────────────────────────────────────

    async fn run_translation(
        self: &Arc<Self>,
        task_id: &str,
        target_lang: Option<String>,
    ) -> Result<(), PipelineError> {
        let task = self.store.get(task_id).await.ok_or(PipelineError::TaskDeleted)?;
        // Re-enterable from any finished run, including a failed follow-on
        // attempt; the transcribed subtitles are what matters.
        if !task.status.is_terminal() {
            return Err(PipelineError::InvalidState { expected: "finished" });
        }
        if task.subtitles.is_empty() {
            return Err(PipelineError::NoSubtitles);
        }
        let cfg = self.config.read().await.clone();
        let target_lang = target_lang.unwrap_or(cfg.translation_target_lang);

        self.advance(task_id, TRANSLATE.at(0.0), "translating subtitles", None)
            .await?;
        let texts: Vec<String> = task.subtitles.iter().map(|s| s.text.clone()).collect();
        let on_progress = self.stage_progress(task_id, TRANSLATE, "translating subtitles");
        let translations = self
            .collaborators
            .translator
            .translate_batch(&texts, &target_lang, on_progress)
            .await
            .map_err(|e| PipelineError::collaborator("translation", e))?;
        if translations.len() != texts.len() {
            return Err(PipelineError::collaborator(
                "translation",
                anyhow::anyhow!(
                    "expected {} translations, got {}",
                    texts.len(),
                    translations.len()
                ),
            ));
        }
        self.store.set_translations(task_id, translations).await;

        if !self
            .store
            .update_status(task_id, TaskStatus::Completed, 100.0, "translation complete", None)
            .await
        {
            return Err(PipelineError::TaskDeleted);
        }
        Ok(())
    }

    // ── Dubbing sub-pipeline ──────────────────────────────────────────────────

    async fn run_dubbing(
        self: &Arc<Self>,
        task_id: &str,
        options: DubbingOptions,
    ) -> Result<(), PipelineError> {
        let task = self.store.get(task_id).await.ok_or(PipelineError::TaskDeleted)?;
        if !task.status.is_terminal() {
            return Err(PipelineError::InvalidState { expected: "finished" });
        }
        if task.subtitles.is_empty() {
            return Err(PipelineError::NoSubtitles);
        }
        let cfg = self.config.read().await.clone();

        let lines: Vec<DubbingLine> = task
            .subtitles
            .iter()
            .filter(|s| !s.dubbing_text().trim().is_empty())
            .map(|s| DubbingLine {
                id: s.id,
                text: s.dubbing_text().to_owned(),
                start: s.start_time,
                end: s.end_time,
            })
            .collect();
        if lines.is_empty() {
            return Err(PipelineError::NothingToDub);
        }

        self.advance(task_id, SYNTHESIZE.at(0.0), "synthesizing speech", None)
            .await?;
        let voice = options
            .voice_name
            .clone()
            .unwrap_or_else(|| cfg.tts_voice_name.clone());
        let on_progress = self.stage_progress(task_id, SYNTHESIZE, "synthesizing speech");
        let clips = self
            .collaborators
            .synthesizer
            .synthesize_batch(&lines, &voice, on_progress)
            .await
            .map_err(|e| PipelineError::collaborator("speech synthesis", e))?;

        self.advance(task_id, RENDER.at(0.0), "rendering video", None)
            .await?;
        let export_dir = resolve_export_dir(&cfg, &task.file_path);
        tokio::fs::create_dir_all(&export_dir).await?;
        let stem = task.file_path.file_stem().unwrap_or_default().to_string_lossy();
        let prefix = cfg.video_filename_prefix.trim();
        let output = export_dir.join(format!("{prefix}{stem}_dubbed.mp4"));

        let on_progress = self.stage_progress(task_id, RENDER, "rendering video");
        let rendered = self
            .collaborators
            .renderer
            .render(
                &task.file_path,
                &output,
                &task.subtitles,
                &clips,
                &cfg.subtitle_style,
                &options,
                on_progress,
            )
            .await
            .map_err(|e| PipelineError::collaborator("video rendering", e))?;
        self.store.set_output_video_path(task_id, rendered).await;

        if !self
            .store
            .update_status(task_id, TaskStatus::Completed, 100.0, "dubbing complete", None)
            .await
        {
            return Err(PipelineError::TaskDeleted);
        }
        Ok(())
    }

    // ── Direct operations (no run spawned) ────────────────────────────────────

    /// Export a task's subtitles. The directory chain for an unset `output`:
    /// subtitle export dir → general export dir → source folder → default
    /// output dir. File name is `{task file name}.{format}`.
    pub async fn export_subtitles(
        &self,
        task_id: &str,
        format: SubtitleFormat,
        output: Option<PathBuf>,
        include_timestamp: bool,
    ) -> Result<PathBuf, PipelineError> {
        let task = self.store.get(task_id).await.ok_or(PipelineError::TaskDeleted)?;
        if task.subtitles.is_empty() {
            return Err(PipelineError::NoSubtitles);
        }
        let cfg = self.config.read().await.clone();
        let path = match output {
            Some(path) => path,
            None => {
                let dir = resolve_subtitle_export_dir(&cfg, &task.file_path);
                dir.join(format!("{}.{}", task.file_name, format.extension()))
            }
        };
        export_blocking(task.subtitles, path, format, include_timestamp).await
    }

    /// Render a one-frame style preview into the temp dir as
    /// `preview_{unix seconds}.png`. A caller-supplied style overrides the
    /// configured one for this preview only.
    pub async fn preview_subtitle(
        &self,
        source: &Path,
        sample_text: &str,
        timestamp: f64,
        style: Option<SubtitleStyle>,
    ) -> Result<PathBuf, PipelineError> {
        let cfg = self.config.read().await.clone();
        let style = style.unwrap_or(cfg.subtitle_style);
        let output = cfg
            .temp_dir
            .join(format!("preview_{}.png", chrono::Utc::now().timestamp()));
        self.collaborators
            .renderer
            .preview(source, &output, sample_text, &style, timestamp)
            .await
            .map_err(|e| PipelineError::collaborator("subtitle preview", e))
    }

    /// Remove `preview_*.png` scratch images from the temp dir. Failures are
    /// logged only; this runs after every pipeline run regardless of outcome.
    async fn cleanup_previews(&self) {
        let temp_dir = self.config.read().await.temp_dir.clone();
        let result = tokio::task::spawn_blocking(move || {
            let entries = std::fs::read_dir(&temp_dir)?;
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("preview_") && name.ends_with(".png") {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
            Ok::<(), std::io::Error>(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "preview cleanup failed"),
            Err(e) => warn!(error = %e, "preview cleanup worker panicked"),
        }
    }
}

async fn export_blocking(
    subtitles: Vec<SubtitleSegment>,
    path: PathBuf,
    format: SubtitleFormat,
    include_timestamp: bool,
) -> Result<PathBuf, PipelineError> {
    tokio::task::spawn_blocking(move || {
        SubtitleAssembler::export(&subtitles, &path, format, include_timestamp)?;
        Ok(path)
    })
    .await
    .map_err(|_| PipelineError::Io(std::io::Error::other("export worker panicked")))?
}

/// Pick the dubbing export directory: validated custom dir → source video's
/// folder → default output dir.
pub fn resolve_export_dir(cfg: &Config, source: &Path) -> PathBuf {
    let custom = cfg.export_path.trim();
    if !custom.is_empty() {
        let dir = PathBuf::from(custom);
        if dir_is_writable(&dir) {
            info!(dir = %dir.display(), "using custom export directory");
            return dir;
        }
        warn!(dir = %dir.display(), "custom export directory not writable; falling back");
    }
    if cfg.use_source_folder {
        if let Some(parent) = source.parent() {
            if !parent.as_os_str().is_empty() {
                return parent.to_path_buf();
            }
        }
    }
    cfg.output_dir.clone()
}

/// Subtitle exports prefer their own directory before the general chain.
pub fn resolve_subtitle_export_dir(cfg: &Config, source: &Path) -> PathBuf {
    let subtitle_dir = cfg.export_subtitle_path.trim();
    if !subtitle_dir.is_empty() {
        let dir = PathBuf::from(subtitle_dir);
        if dir_is_writable(&dir) {
            return dir;
        }
        warn!(dir = %dir.display(), "subtitle export directory not writable; falling back");
    }
    resolve_export_dir(cfg, source)
}

/// Touch-and-delete probe: creating the directory is not enough, it must
/// accept a file write.
fn dir_is_writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(format!(".write_test_{}", Uuid::new_v4()));
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
