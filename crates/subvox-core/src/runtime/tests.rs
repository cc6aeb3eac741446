use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing_test::traced_test;

use crate::audio::{write_wav_16k_mono, AudioEngine, ProgressFn};
use crate::config::{Config, SubtitleStyle};
use crate::runtime::collaborators::{
    Collaborators, DubbingLine, DubbingOptions, RecognizedSpan, SpeechRecognizer, SpeechSpan,
    SpeechSynthesizer, Translator, VideoRenderer, VoiceActivityDetector,
};
use crate::runtime::executor::{resolve_export_dir, PipelineExecutor};
use crate::runtime::store::TaskStore;
use crate::runtime::types::{ProgressEvent, TaskStatus};
use crate::subtitle::SubtitleSegment;

// ── Mock collaborators ────────────────────────────────────────────────────

struct FixedVad(Vec<SpeechSpan>);

#[async_trait]
impl VoiceActivityDetector for FixedVad {
    async fn detect(&self, _audio: &Path) -> anyhow::Result<Vec<SpeechSpan>> {
        Ok(self.0.clone())
    }
}

struct NumberingRecognizer;

#[async_trait]
impl SpeechRecognizer for NumberingRecognizer {
    async fn transcribe_spans(
        &self,
        _audio: &Path,
        spans: &[SpeechSpan],
        _language: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<Vec<RecognizedSpan>> {
        on_progress(50.0);
        Ok(spans
            .iter()
            .enumerate()
            .map(|(i, span)| RecognizedSpan {
                start: span.start,
                end: span.end,
                text: format!("line {i}"),
            })
            .collect())
    }
}

struct UppercaseTranslator {
    delay: std::time::Duration,
}

#[async_trait]
impl Translator for UppercaseTranslator {
    async fn translate_batch(
        &self,
        texts: &[String],
        _target_lang: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<Vec<String>> {
        tokio::time::sleep(self.delay).await;
        on_progress(100.0);
        Ok(texts.iter().map(|t| t.to_uppercase()).collect())
    }
}

struct FileSynthesizer {
    dir: PathBuf,
}

#[async_trait]
impl SpeechSynthesizer for FileSynthesizer {
    async fn synthesize_batch(
        &self,
        lines: &[DubbingLine],
        _voice: &str,
        on_progress: ProgressFn,
    ) -> anyhow::Result<HashMap<usize, PathBuf>> {
        let mut clips = HashMap::new();
        for line in lines {
            let path = self.dir.join(format!("clip_{}.wav", line.id));
            std::fs::write(&path, b"")?;
            clips.insert(line.id, path);
        }
        on_progress(100.0);
        Ok(clips)
    }
}

struct FailingSynthesizer;

#[async_trait]
impl SpeechSynthesizer for FailingSynthesizer {
    async fn synthesize_batch(
        &self,
        _lines: &[DubbingLine],
        _voice: &str,
        _on_progress: ProgressFn,
    ) -> anyhow::Result<HashMap<usize, PathBuf>> {
        anyhow::bail!("speech service unavailable")
    }
}

struct TouchRenderer;

#[async_trait]
impl VideoRenderer for TouchRenderer {
    async fn render(
        &self,
        _source: &Path,
        output: &Path,
        _subtitles: &[SubtitleSegment],
        clips: &HashMap<usize, PathBuf>,
        _style: &SubtitleStyle,
        _options: &DubbingOptions,
        on_progress: ProgressFn,
    ) -> anyhow::Result<PathBuf> {
        anyhow::ensure!(!clips.is_empty(), "renderer needs at least one clip");
        std::fs::write(output, b"")?;
        on_progress(100.0);
        Ok(output.to_path_buf())
    }

    async fn preview(
        &self,
        _source: &Path,
        output: &Path,
        _sample_text: &str,
        style: &SubtitleStyle,
        _timestamp: f64,
    ) -> anyhow::Result<PathBuf> {
        // Record which style made it here so tests can tell.
        std::fs::write(output, style.font_name.as_bytes())?;
        Ok(output.to_path_buf())
    }
}

// ── Fixture ───────────────────────────────────────────────────────────────

struct Fixture {
    executor: Arc<PipelineExecutor>,
    store: Arc<TaskStore>,
    dir: tempfile::TempDir,
}

fn fixture_with(spans: Vec<SpeechSpan>, max_concurrent: usize) -> Fixture {
    fixture_full(spans, max_concurrent, None)
}

fn fixture_full(
    spans: Vec<SpeechSpan>,
    max_concurrent: usize,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        temp_dir: dir.path().join("temp"),
        output_dir: dir.path().join("output"),
        ..Config::default()
    };
    config.ensure_dirs().unwrap();
    let store = Arc::new(TaskStore::new());
    let audio = Arc::new(AudioEngine::new(&config).unwrap());
    let synthesizer = synthesizer.unwrap_or_else(|| {
        Arc::new(FileSynthesizer {
            dir: dir.path().join("temp"),
        })
    });
    let collaborators = Collaborators {
        vad: Arc::new(FixedVad(spans)),
        recognizer: Arc::new(NumberingRecognizer),
        translator: Arc::new(UppercaseTranslator {
            delay: std::time::Duration::from_millis(10),
        }),
        synthesizer,
        renderer: Arc::new(TouchRenderer),
    };
    let executor = Arc::new(PipelineExecutor::new(
        Arc::clone(&store),
        audio,
        collaborators,
        Arc::new(RwLock::new(config)),
        max_concurrent,
    ));
    Fixture { executor, store, dir }
}

fn fixture() -> Fixture {
    fixture_with(
        vec![
            SpeechSpan { start: 0.2, end: 0.8 },
            SpeechSpan { start: 1.0, end: 1.6 },
        ],
        3,
    )
}

fn segments() -> Vec<SubtitleSegment> {
    vec![
        SubtitleSegment {
            id: 0,
            start_time: 0.2,
            end_time: 0.8,
            text: "first".to_owned(),
            translation: None,
        },
        SubtitleSegment {
            id: 1,
            start_time: 1.0,
            end_time: 1.6,
            text: "second".to_owned(),
            translation: None,
        },
    ]
}

/// Seed a task that already finished transcription.
async fn completed_task(fix: &Fixture) -> String {
    let video = fix.dir.path().join("movie.mp4");
    std::fs::write(&video, b"not a real video").unwrap();
    let task = fix.store.create(&video).await;
    fix.store.set_subtitles(&task.id, segments()).await;
    fix.store
        .update_status(&task.id, TaskStatus::Completed, 100.0, "completed", None)
        .await;
    task.id
}

// ── Store tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_is_monotone_within_a_run() {
    let fix = fixture();
    let task = fix.store.create(Path::new("a.mp4")).await;
    fix.store
        .update_status(&task.id, TaskStatus::Processing, 40.0, "working", None)
        .await;
    // A late lower update must not move progress backwards.
    fix.store
        .update_status(&task.id, TaskStatus::Processing, 25.0, "working", None)
        .await;
    assert_eq!(fix.store.get(&task.id).await.unwrap().progress, 40.0);

    // Failure keeps the last progress too.
    fix.store
        .update_status(&task.id, TaskStatus::Failed, 0.0, "error: boom", None)
        .await;
    let snap = fix.store.get(&task.id).await.unwrap();
    assert_eq!(snap.progress, 40.0);
    assert_eq!(snap.status, TaskStatus::Failed);
}

#[tokio::test]
async fn follow_on_run_resets_progress_at_the_boundary() {
    let fix = fixture();
    let task = fix.store.create(Path::new("a.mp4")).await;
    fix.store
        .update_status(&task.id, TaskStatus::Completed, 100.0, "completed", None)
        .await;
    // Re-entering Processing from a terminal state starts a new run,
    // so progress may drop to the new stage start.
    fix.store
        .update_status(&task.id, TaskStatus::Processing, 70.0, "translating", None)
        .await;
    assert_eq!(fix.store.get(&task.id).await.unwrap().progress, 70.0);
}

#[tokio::test]
async fn retry_resets_to_pending() {
    let fix = fixture();
    let task = fix.store.create(Path::new("a.mp4")).await;
    fix.store
        .update_status(&task.id, TaskStatus::Failed, 70.0, "error: x", None)
        .await;
    assert!(fix.store.reset_for_retry(&task.id).await);
    let snap = fix.store.get(&task.id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Pending);
    assert_eq!(snap.progress, 0.0);
}

#[tokio::test]
async fn deleted_task_updates_return_false_and_do_not_resurrect() {
    let fix = fixture();
    let task = fix.store.create(Path::new("a.mp4")).await;
    assert!(fix.store.delete(&task.id).await);
    assert!(fix.store.get(&task.id).await.is_none());
    assert!(
        !fix.store
            .update_status(&task.id, TaskStatus::Processing, 50.0, "zombie", None)
            .await
    );
    assert!(fix.store.get(&task.id).await.is_none());
    assert!(!fix.store.delete(&task.id).await);
}

#[tokio::test]
async fn hook_fires_per_successful_update_only() {
    let fix = fixture();
    let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    fix.store
        .set_progress_hook(Arc::new(move |event| sink.lock().unwrap().push(event)));

    let task = fix.store.create(Path::new("a.mp4")).await;
    fix.store
        .update_status(&task.id, TaskStatus::Processing, 10.0, "one", None)
        .await;
    fix.store
        .update_status(&task.id, TaskStatus::Processing, 20.0, "two", None)
        .await;
    fix.store
        .update_status("missing-task", TaskStatus::Processing, 30.0, "three", None)
        .await;

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].progress, 10.0);
    assert_eq!(events[1].status_text, "two");
}

// ── Transcription chain (needs a real transcoder for extraction) ─────────

#[tokio::test]
async fn transcription_run_reaches_completed_with_ordered_subtitles() {
    if crate::audio::locate::find_ffmpeg(None).is_none() {
        eprintln!("skipping: ffmpeg not available");
        return;
    }
    let fix = fixture();
    let source = fix.dir.path().join("speech.wav");
    write_wav_16k_mono(&source, &vec![0.2f32; 2 * 16_000]).unwrap();

    let task = fix.store.create(&source).await;
    fix.executor.submit_transcription(&task.id).await.unwrap();

    let snap = fix.store.get(&task.id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.progress, 100.0);
    assert!(snap.audio_path.is_some());
    assert_eq!(snap.subtitles.len(), 2);
    assert_eq!(snap.subtitles[0].text, "line 0");
    assert!(snap.subtitles[0].start_time <= snap.subtitles[1].start_time);
}

#[tokio::test]
async fn empty_vad_result_fails_the_task() {
    if crate::audio::locate::find_ffmpeg(None).is_none() {
        eprintln!("skipping: ffmpeg not available");
        return;
    }
    let fix = fixture_with(Vec::new(), 3);
    let source = fix.dir.path().join("silence.wav");
    write_wav_16k_mono(&source, &vec![0.0f32; 16_000]).unwrap();

    let task = fix.store.create(&source).await;
    fix.executor.submit_transcription(&task.id).await.unwrap();

    let snap = fix.store.get(&task.id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Failed);
    assert!(snap.status_text.starts_with("error: "), "{}", snap.status_text);
}

// ── Translation sub-pipeline ──────────────────────────────────────────────

#[tokio::test]
async fn translation_attaches_texts_and_completes() {
    let fix = fixture();
    let id = completed_task(&fix).await;

    fix.executor
        .submit_translation(&id, Some("en".to_owned()))
        .await
        .unwrap();

    let snap = fix.store.get(&id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.progress, 100.0);
    assert_eq!(snap.subtitles[0].translation.as_deref(), Some("FIRST"));
    assert_eq!(snap.subtitles[1].translation.as_deref(), Some("SECOND"));
}

#[traced_test]
#[tokio::test]
async fn translation_on_unfinished_task_fails() {
    let fix = fixture();
    let task = fix.store.create(Path::new("a.mp4")).await;
    fix.executor
        .submit_translation(&task.id, None)
        .await
        .unwrap();
    let snap = fix.store.get(&task.id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Failed);
    assert!(snap.status_text.starts_with("error: "));
}

#[tokio::test]
async fn runs_past_the_gate_queue_instead_of_failing() {
    let fix = fixture_with(Vec::new(), 1);
    let first = completed_task(&fix).await;
    let second = completed_task(&fix).await;

    let h1 = fix.executor.submit_translation(&first, None);
    let h2 = fix.executor.submit_translation(&second, None);
    h1.await.unwrap();
    h2.await.unwrap();

    assert_eq!(fix.store.get(&first).await.unwrap().status, TaskStatus::Completed);
    assert_eq!(fix.store.get(&second).await.unwrap().status, TaskStatus::Completed);
}

// ── Dubbing sub-pipeline ──────────────────────────────────────────────────

#[tokio::test]
async fn dubbing_renders_next_to_source_and_completes() {
    let fix = fixture();
    let id = completed_task(&fix).await;

    fix.executor
        .submit_dubbing(&id, DubbingOptions::default())
        .await
        .unwrap();

    let snap = fix.store.get(&id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Completed);
    let output = snap.output_video_path.expect("output video attached");
    // use_source_folder default: lands next to the source video.
    assert_eq!(output.parent(), Some(fix.dir.path()));
    assert_eq!(
        output.file_name().unwrap().to_string_lossy(),
        "movie_dubbed.mp4"
    );
    assert!(output.exists());
}

#[traced_test]
#[tokio::test]
async fn dubbing_without_subtitles_fails() {
    let fix = fixture();
    let video = fix.dir.path().join("empty.mp4");
    std::fs::write(&video, b"").unwrap();
    let task = fix.store.create(&video).await;
    fix.store
        .update_status(&task.id, TaskStatus::Completed, 100.0, "completed", None)
        .await;

    fix.executor
        .submit_dubbing(&task.id, DubbingOptions::default())
        .await
        .unwrap();

    let snap = fix.store.get(&task.id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Failed);
    assert!(snap.status_text.starts_with("error: "));
}

#[traced_test]
#[tokio::test]
async fn failed_dubbing_leaves_subtitles_reusable() {
    let fix = fixture_full(Vec::new(), 3, Some(Arc::new(FailingSynthesizer)));
    let id = completed_task(&fix).await;

    fix.executor
        .submit_dubbing(&id, DubbingOptions::default())
        .await
        .unwrap();
    let snap = fix.store.get(&id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Failed);
    assert_eq!(snap.subtitles.len(), 2, "transcription must survive the failure");

    // The task is in a finished state with subtitles, so follow-on runs
    // still accept it.
    fix.executor
        .submit_translation(&id, Some("en".to_owned()))
        .await
        .unwrap();
    let snap = fix.store.get(&id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.subtitles[0].translation.as_deref(), Some("FIRST"));
    assert_eq!(snap.subtitles[1].translation.as_deref(), Some("SECOND"));
}

#[tokio::test]
async fn dubbing_cleans_preview_images() {
    let fix = fixture();
    let id = completed_task(&fix).await;
    let stale = fix.dir.path().join("temp/preview_123.png");
    std::fs::write(&stale, b"").unwrap();

    fix.executor
        .submit_dubbing(&id, DubbingOptions::default())
        .await
        .unwrap();

    assert!(!stale.exists(), "preview scratch should be removed");
}

// ── Style preview ─────────────────────────────────────────────────────────

#[tokio::test]
async fn preview_uses_the_requested_style_over_the_configured_one() {
    let fix = fixture();
    let video = fix.dir.path().join("movie.mp4");
    std::fs::write(&video, b"").unwrap();

    let style = SubtitleStyle {
        font_name: "Futura".to_owned(),
        ..SubtitleStyle::default()
    };
    let path = fix
        .executor
        .preview_subtitle(&video, "sample", 1.0, Some(style))
        .await
        .unwrap();

    assert_eq!(path.parent(), Some(fix.dir.path().join("temp").as_path()));
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("preview_"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "Futura");

    // Without an override the saved settings style applies.
    let path = fix
        .executor
        .preview_subtitle(&video, "sample", 1.0, None)
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "Arial");
}

// ── Export directory resolution ───────────────────────────────────────────

#[test]
fn export_dir_prefers_writable_custom_path() {
    let dir = tempfile::tempdir().unwrap();
    let custom = dir.path().join("exports");
    let config = Config {
        export_path: custom.to_string_lossy().into_owned(),
        ..Config::default()
    };
    let source = dir.path().join("video/movie.mp4");
    assert_eq!(resolve_export_dir(&config, &source), custom);
}

#[test]
fn export_dir_falls_back_to_source_folder_then_output() {
    let dir = tempfile::tempdir().unwrap();
    // A custom path under a regular file can never be created.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let mut config = Config {
        export_path: blocker.join("nested").to_string_lossy().into_owned(),
        output_dir: dir.path().join("out"),
        ..Config::default()
    };
    let source = dir.path().join("movie.mp4");

    assert_eq!(resolve_export_dir(&config, &source), dir.path());

    config.use_source_folder = false;
    assert_eq!(resolve_export_dir(&config, &source), config.output_dir);
}

// ── Retry ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_on_missing_task_is_rejected() {
    let fix = fixture();
    assert!(fix.executor.retry("no-such-task").await.is_none());
}
