//! The audio engine: extraction, chunking, segment slicing, time-stretching
//! and duration probing on top of the ffmpeg transcoder.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use bytemuck::cast_slice;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use tokio::task;
use tracing::{debug, info, warn};

use crate::audio::chunk::{chunk_spans, AudioChunk};
use crate::audio::{locate, AudioError, ProgressFn};
use crate::config::Config;

const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Output parameters for [`AudioEngine::extract_audio`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub sample_rate: u32,
    pub channels: u32,
    pub format: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: 1,
            format: "wav".to_owned(),
        }
    }
}

/// Stateless media operations over files in a scratch directory.
///
/// Cheap to clone; methods move a clone into `spawn_blocking` for the
/// subprocess and file work.
#[derive(Debug, Clone)]
pub struct AudioEngine {
    temp_dir: PathBuf,
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl AudioEngine {
    /// Build an engine from the settings, creating the scratch directory and
    /// resolving the transcoder binaries once.
    ///
    /// A missing transcoder is not an error here: operations that need it
    /// fail with [`AudioError::ToolUnavailable`] when called.
    pub fn new(config: &Config) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.temp_dir)?;

        let ffmpeg = locate::find_ffmpeg(config.ffmpeg_override().as_deref());
        let ffprobe = locate::find_ffprobe(config.ffprobe_override().as_deref(), ffmpeg.as_deref());

        match &ffmpeg {
            Some(path) => info!(ffmpeg = %path.display(), "audio engine ready"),
            None => warn!("ffmpeg not found; audio extraction is unavailable"),
        }

        Ok(Self {
            temp_dir: config.temp_dir.clone(),
            ffmpeg,
            ffprobe,
        })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Path of the resolved ffmpeg binary, for collaborators that spawn
    /// their own transcoder invocations (e.g. the video renderer).
    pub fn transcoder(&self) -> Result<&Path, AudioError> {
        self.require_ffmpeg()
    }

    fn require_ffmpeg(&self) -> Result<&Path, AudioError> {
        self.ffmpeg
            .as_deref()
            .ok_or(AudioError::ToolUnavailable { tool: "ffmpeg" })
    }

    // ── Extraction ────────────────────────────────────────────────────────────

    /// Extract the audio track of `video` into a standalone file.
    ///
    /// The default output path is deterministic:
    /// `{temp_dir}/{video stem}_audio.{format}`.
    pub async fn extract_audio(
        &self,
        video: &Path,
        opts: ExtractOptions,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, AudioError> {
        let engine = self.clone();
        let video = video.to_path_buf();
        task::spawn_blocking(move || engine.extract_audio_blocking(&video, &opts, output)).await?
    }

    fn extract_audio_blocking(
        &self,
        video: &Path,
        opts: &ExtractOptions,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, AudioError> {
        if !video.exists() {
            return Err(AudioError::SourceMissing {
                path: video.to_path_buf(),
            });
        }
        let output = output.unwrap_or_else(|| {
            let stem = video.file_stem().unwrap_or_default().to_string_lossy();
            self.temp_dir.join(format!("{stem}_audio.{}", opts.format))
        });

        info!(video = %video.display(), output = %output.display(), "extracting audio");

        let sample_rate = opts.sample_rate.to_string();
        let channels = opts.channels.to_string();
        self.run_transcode(|c| {
            c.input(video.to_string_lossy().as_ref())
                .args(["-ar", &sample_rate, "-ac", &channels, "-vn"])
                .output(output.to_string_lossy().as_ref());
        })?;

        Ok(output)
    }

    // ── Chunking ──────────────────────────────────────────────────────────────

    /// Split a WAV file into overlapping chunks for streaming recognition.
    ///
    /// The progress callback fires on every 10th chunk only, to bound the
    /// callback overhead on long inputs.
    pub async fn split_audio(
        &self,
        audio: &Path,
        chunk_duration: f64,
        overlap: f64,
        on_progress: Option<ProgressFn>,
    ) -> Result<Vec<AudioChunk>, AudioError> {
        let audio = audio.to_path_buf();
        task::spawn_blocking(move || split_audio_blocking(&audio, chunk_duration, overlap, on_progress))
            .await?
    }

    // ── Segment extraction ────────────────────────────────────────────────────

    /// Extract `[start, end)` of an audio or video file as 16 kHz mono WAV.
    ///
    /// Primary strategy is a seek-and-duration-bounded transcoder call that
    /// never loads the full source. If the tool fails, the fallback decodes
    /// the whole source into memory and slices by millisecond offsets; both
    /// produce equivalent output.
    pub async fn extract_segment(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, AudioError> {
        let engine = self.clone();
        let source = source.to_path_buf();
        task::spawn_blocking(move || engine.extract_segment_blocking(&source, start, end, output))
            .await?
    }

    fn extract_segment_blocking(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, AudioError> {
        if !(start >= 0.0 && end > start) {
            return Err(AudioError::InvalidRange { start, end });
        }
        if !source.exists() {
            return Err(AudioError::SourceMissing {
                path: source.to_path_buf(),
            });
        }
        let output = output
            .unwrap_or_else(|| self.temp_dir.join(format!("segment_{start:.3}_{end:.3}.wav")));

        let ss = format!("{start:.3}");
        let t = format!("{:.3}", end - start);
        let primary = self.run_transcode(|c| {
            c.args(["-ss", &ss, "-t", &t])
                .input(source.to_string_lossy().as_ref())
                .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
                .output(output.to_string_lossy().as_ref());
        });

        match primary {
            Ok(()) => Ok(output),
            Err(e) => {
                warn!(error = %e, "segment extraction failed; slicing a full decode instead");
                let samples = self.decode_pcm_blocking(source)?;
                let start_idx = sample_index_at(start);
                let end_idx = sample_index_at(end).min(samples.len());
                if start_idx >= end_idx {
                    return Err(AudioError::InvalidRange { start, end });
                }
                write_wav_16k_mono(&output, &samples[start_idx..end_idx])?;
                Ok(output)
            }
        }
    }

    // ── Time stretching ───────────────────────────────────────────────────────

    /// Change playback speed by `factor` (>1 is faster).
    ///
    /// Near-unity factors are a plain copy. Pitch-preserving stretching
    /// composes `atempo` steps (each within the filter's [0.5, 2.0] valid
    /// range); if the chain fails, a resample-based stretch that shifts
    /// pitch is used as a fallback.
    pub async fn adjust_speed(
        &self,
        input: &Path,
        output: &Path,
        factor: f64,
        pitch_preserving: bool,
    ) -> Result<PathBuf, AudioError> {
        let engine = self.clone();
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        task::spawn_blocking(move || {
            engine.adjust_speed_blocking(&input, &output, factor, pitch_preserving)
        })
        .await?
    }

    fn adjust_speed_blocking(
        &self,
        input: &Path,
        output: &Path,
        factor: f64,
        pitch_preserving: bool,
    ) -> Result<PathBuf, AudioError> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(AudioError::InvalidSpeedFactor(factor));
        }
        if (factor - 1.0).abs() < 0.01 {
            if input != output {
                std::fs::copy(input, output)?;
            }
            return Ok(output.to_path_buf());
        }

        debug!(factor, input = %input.display(), "adjusting audio speed");

        if pitch_preserving {
            let chain = atempo_steps(factor)
                .into_iter()
                .map(|step| format!("atempo={step}"))
                .collect::<Vec<_>>()
                .join(",");
            let result = self.run_transcode(|c| {
                c.input(input.to_string_lossy().as_ref())
                    .args(["-filter:a", &chain])
                    .output(output.to_string_lossy().as_ref());
            });
            match result {
                Ok(()) => return Ok(output.to_path_buf()),
                Err(e) => {
                    warn!(error = %e, "atempo chain failed; falling back to resample stretch")
                }
            }
        }

        // Resample stretch: changes pitch along with speed.
        let rate = self.probe_sample_rate_blocking(input).unwrap_or(44_100);
        let filter = format!("asetrate={:.0},aresample={rate}", rate as f64 * factor);
        self.run_transcode(|c| {
            c.input(input.to_string_lossy().as_ref())
                .args(["-filter:a", &filter])
                .output(output.to_string_lossy().as_ref());
        })?;
        Ok(output.to_path_buf())
    }

    // ── Duration ──────────────────────────────────────────────────────────────

    /// Media duration in seconds.
    ///
    /// One contract over two strategies: a metadata probe first (no decode),
    /// then a full decode-and-measure if the probe is unavailable or fails.
    pub async fn duration(&self, path: &Path) -> Result<f64, AudioError> {
        let engine = self.clone();
        let path = path.to_path_buf();
        task::spawn_blocking(move || engine.duration_blocking(&path)).await?
    }

    fn duration_blocking(&self, path: &Path) -> Result<f64, AudioError> {
        if !path.exists() {
            return Err(AudioError::SourceMissing {
                path: path.to_path_buf(),
            });
        }
        let probe_error = match self.ffprobe_entry(path, "format=duration") {
            Ok(raw) => match raw.trim().parse::<f64>() {
                Ok(seconds) => {
                    debug!(seconds, path = %path.display(), "duration probed");
                    return Ok(seconds);
                }
                Err(e) => format!("unparseable probe output {raw:?}: {e}"),
            },
            Err(e) => e.to_string(),
        };

        debug!(error = %probe_error, "duration probe failed; decoding to measure");
        match self.decode_pcm_blocking(path) {
            Ok(samples) => Ok(samples.len() as f64 / TARGET_SAMPLE_RATE as f64),
            Err(decode_error) => Err(AudioError::ProbeFailed {
                path: path.to_path_buf(),
                message: format!("probe: {probe_error}; decode: {decode_error}"),
            }),
        }
    }

    fn probe_sample_rate_blocking(&self, path: &Path) -> Option<u32> {
        self.ffprobe_entry(path, "stream=sample_rate")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
    }

    /// Run ffprobe and return the value of a single `-show_entries` field.
    fn ffprobe_entry(&self, path: &Path, entry: &str) -> Result<String, AudioError> {
        let ffprobe = self
            .ffprobe
            .as_deref()
            .ok_or(AudioError::ToolUnavailable { tool: "ffprobe" })?;
        let output = Command::new(ffprobe)
            .args(["-v", "error", "-show_entries", entry])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(AudioError::ExtractionFailed {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    // ── Decoding ──────────────────────────────────────────────────────────────

    /// Decode any media file to 16 kHz mono f32 PCM, fully in memory.
    fn decode_pcm_blocking(&self, path: &Path) -> Result<Vec<f32>, AudioError> {
        let ffmpeg = self.require_ffmpeg()?;

        let mut command = FfmpegCommand::new_with_path(ffmpeg);
        command
            .hide_banner()
            .input(path.to_string_lossy().as_ref())
            .args(["-vn", "-f", "f32le", "-acodec", "pcm_f32le", "-ar", "16000", "-ac", "1"])
            .output("-");

        let mut child = command.spawn().map_err(tool_error)?;
        let mut buffer: Vec<u8> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for event in child.iter().map_err(tool_error)? {
            match event {
                FfmpegEvent::OutputChunk(data) => buffer.extend_from_slice(&data),
                FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => errors.push(msg),
                FfmpegEvent::Error(e) => errors.push(e),
                _ => {}
            }
        }
        let status = child.wait().map_err(tool_error)?;
        if !status.success() {
            return Err(AudioError::ExtractionFailed {
                stderr: errors.join("\n"),
            });
        }

        // Partial trailing sample, if any, is dropped before the cast.
        buffer.truncate(buffer.len() - buffer.len() % 4);
        Ok(cast_slice::<u8, f32>(&buffer).to_vec())
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    /// Remove scratch WAV files from the temp directory.  Returns the number
    /// of files removed; failures are logged, never surfaced.
    pub fn cleanup_temp_wavs(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.temp_dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "wav") {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => debug!(path = %path.display(), error = %e, "scratch cleanup failed"),
                }
            }
        }
        info!(removed, "scratch audio cleaned");
        removed
    }

    /// Run one transcoder invocation, collecting error lines from the event
    /// stream and failing with them on a non-zero exit.
    fn run_transcode(&self, configure: impl FnOnce(&mut FfmpegCommand)) -> Result<(), AudioError> {
        let ffmpeg = self.require_ffmpeg()?;
        let mut command = FfmpegCommand::new_with_path(ffmpeg);
        command.hide_banner().overwrite();
        configure(&mut command);

        let mut child = command.spawn().map_err(tool_error)?;
        let mut errors: Vec<String> = Vec::new();
        for event in child.iter().map_err(tool_error)? {
            match event {
                FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => errors.push(msg),
                FfmpegEvent::Log(level, msg) => debug!("[ffmpeg {level:?}] {msg}"),
                FfmpegEvent::Error(e) => errors.push(e),
                _ => {}
            }
        }
        let status = child.wait().map_err(tool_error)?;
        if status.success() {
            Ok(())
        } else {
            Err(AudioError::ExtractionFailed {
                stderr: errors.join("\n"),
            })
        }
    }
}

fn tool_error(e: impl std::fmt::Display) -> AudioError {
    AudioError::ExtractionFailed {
        stderr: e.to_string(),
    }
}

/// Sample index of a point in time, at millisecond resolution to match the
/// primary strategy's -ss/-t bounds.
fn sample_index_at(seconds: f64) -> usize {
    let ms = (seconds * 1000.0).round() as u64;
    (ms * TARGET_SAMPLE_RATE as u64 / 1000) as usize
}

fn split_audio_blocking(
    audio: &Path,
    chunk_duration: f64,
    overlap: f64,
    on_progress: Option<ProgressFn>,
) -> Result<Vec<AudioChunk>, AudioError> {
    let samples = read_wav_mono(audio)?;
    let total_ms = samples.len() as u64 * 1000 / TARGET_SAMPLE_RATE as u64;
    let spans = chunk_spans(
        total_ms,
        (chunk_duration * 1000.0) as u64,
        (overlap * 1000.0) as u64,
    );

    let shared: Arc<[f32]> = Arc::from(samples);
    let mut chunks = Vec::with_capacity(spans.len());
    for (idx, &(start_ms, end_ms)) in spans.iter().enumerate() {
        let start_idx = (start_ms * TARGET_SAMPLE_RATE as u64 / 1000) as usize;
        let end_idx = ((end_ms * TARGET_SAMPLE_RATE as u64 / 1000) as usize).min(shared.len());
        chunks.push(AudioChunk {
            start: start_ms as f64 / 1000.0,
            end: end_ms as f64 / 1000.0,
            samples: Arc::from(&shared[start_idx..end_idx]),
        });

        // Milestone cadence: every 10th chunk, not every chunk.
        if let Some(cb) = &on_progress {
            if (idx + 1) % 10 == 0 {
                let progress = (end_ms as f32 / total_ms as f32 * 100.0).min(100.0);
                cb(progress);
            }
        }
    }

    info!(chunks = chunks.len(), audio = %audio.display(), "audio split");
    Ok(chunks)
}

/// Read a WAV file as mono f32 samples, downmixing multi-channel input.
fn read_wav_mono(path: &Path) -> Result<Vec<f32>, AudioError> {
    if !path.exists() {
        return Err(AudioError::SourceMissing {
            path: path.to_path_buf(),
        });
    }
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    if spec.channels <= 1 {
        return Ok(interleaved);
    }
    let channels = spec.channels as usize;
    Ok(interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Write 16 kHz mono samples as a 16-bit PCM WAV file.
pub fn write_wav_16k_mono(path: &Path, samples: &[f32]) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()
}

/// Decompose a speed factor into `atempo` steps, each within the filter's
/// valid [0.5, 2.0] range, whose product equals the factor.
pub fn atempo_steps(mut factor: f64) -> Vec<f64> {
    let mut steps = Vec::new();
    while factor > 2.0 {
        steps.push(2.0);
        factor /= 2.0;
    }
    while factor < 0.5 {
        steps.push(0.5);
        factor /= 0.5;
    }
    steps.push(factor);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(steps: &[f64]) -> f64 {
        steps.iter().product()
    }

    #[test]
    fn atempo_chain_examples() {
        assert_eq!(atempo_steps(3.0), vec![2.0, 1.5]);
        let slow = atempo_steps(0.3);
        assert_eq!(slow.len(), 2);
        assert_eq!(slow[0], 0.5);
        assert!((slow[1] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn atempo_chain_product_equals_factor() {
        for &factor in &[0.04, 0.3, 0.49, 0.5, 0.77, 1.0, 1.99, 2.0, 3.0, 7.5, 16.0] {
            let steps = atempo_steps(factor);
            assert!(
                (product(&steps) - factor).abs() < 1e-9,
                "factor {factor}: steps {steps:?}"
            );
            for step in steps {
                assert!((0.5..=2.0).contains(&step), "step {step} out of atempo range");
            }
        }
    }

    #[test]
    fn wav_round_trip_preserves_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        write_wav_16k_mono(&path, &samples).unwrap();
        let back = read_wav_mono(&path).unwrap();
        assert_eq!(back.len(), samples.len());
        assert!((back[100] - samples[100]).abs() < 1e-3);
    }

    #[tokio::test]
    async fn split_audio_covers_file_with_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        // 65 seconds of silence-ish signal at 16 kHz.
        let samples = vec![0.1f32; 65 * 16_000];
        write_wav_16k_mono(&path, &samples).unwrap();

        let engine = AudioEngine {
            temp_dir: dir.path().to_path_buf(),
            ffmpeg: None,
            ffprobe: None,
        };
        let chunks = engine.split_audio(&path, 30.0, 1.0, None).await.unwrap();
        let bounds: Vec<(f64, f64)> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(bounds, vec![(0.0, 30.0), (29.0, 59.0), (58.0, 65.0)]);
        for chunk in &chunks {
            let expected = ((chunk.end - chunk.start) * 16_000.0).round() as usize;
            assert_eq!(chunk.samples.len(), expected);
        }
    }

    #[tokio::test]
    async fn split_audio_progress_fires_on_milestones_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.wav");
        // 25 one-second windows with no overlap → 2 milestone callbacks.
        let samples = vec![0.0f32; 25 * 16_000];
        write_wav_16k_mono(&path, &samples).unwrap();

        let engine = AudioEngine {
            temp_dir: dir.path().to_path_buf(),
            ffmpeg: None,
            ffprobe: None,
        };
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let chunks = engine
            .split_audio(
                &path,
                1.0,
                0.0,
                Some(Arc::new(move |_p| {
                    seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })),
            )
            .await
            .unwrap();
        assert_eq!(chunks.len(), 25);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_tool_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = AudioEngine {
            temp_dir: dir.path().to_path_buf(),
            ffmpeg: None,
            ffprobe: None,
        };
        let src = dir.path().join("in.wav");
        std::fs::write(&src, b"").unwrap();
        let err = engine
            .extract_audio_blocking(&src, &ExtractOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, AudioError::ToolUnavailable { tool: "ffmpeg" }));
    }
}
