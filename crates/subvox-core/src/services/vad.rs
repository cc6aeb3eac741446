//! Energy-based voice-activity detection over decoded PCM.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::audio::AudioEngine;
use crate::config::Config;
use crate::runtime::collaborators::{SpeechSpan, VoiceActivityDetector};

/// 20 ms analysis frames at the 16 kHz working rate.
const FRAME_SECONDS: f64 = 0.02;
const FRAME_SAMPLES: usize = 320;

/// RMS-threshold detector: frames louder than the configured dB floor are
/// voiced, then voiced runs become spans subject to the minimum speech,
/// minimum silence and maximum span durations.
pub struct EnergyVad {
    audio: Arc<AudioEngine>,
    config: Arc<RwLock<Config>>,
}

impl EnergyVad {
    pub fn new(audio: Arc<AudioEngine>, config: Arc<RwLock<Config>>) -> Self {
        Self { audio, config }
    }
}

#[async_trait]
impl VoiceActivityDetector for EnergyVad {
    async fn detect(&self, audio: &Path) -> anyhow::Result<Vec<SpeechSpan>> {
        let cfg = self.config.read().await.clone();

        // Chunked scan keeps memory bounded on long inputs. Consecutive
        // chunks overlap, so frames before the scan cursor are skipped.
        let chunks = self
            .audio
            .split_audio(audio, cfg.chunk_duration, cfg.chunk_overlap, None)
            .await?;

        let mut activity: Vec<bool> = Vec::new();
        let mut cursor = 0.0f64;
        for chunk in &chunks {
            let skip_frames = if chunk.start < cursor {
                (((cursor - chunk.start) / FRAME_SECONDS).round()) as usize
            } else {
                0
            };
            for (i, frame) in chunk.samples.chunks(FRAME_SAMPLES).enumerate() {
                if i < skip_frames || frame.len() < FRAME_SAMPLES / 2 {
                    continue;
                }
                activity.push(frame_db(frame) >= cfg.vad_min_volume_db);
            }
            cursor = chunk.end;
        }

        let spans = spans_from_activity(
            &activity,
            FRAME_SECONDS,
            cfg.min_speech_duration,
            cfg.min_silence_duration,
            cfg.max_speech_duration,
        );
        info!(spans = spans.len(), audio = %audio.display(), "voice activity detected");
        debug!(frames = activity.len(), "vad frame scan finished");
        Ok(spans)
    }
}

/// RMS level of one frame in dBFS.
fn frame_db(frame: &[f32]) -> f32 {
    let mean_square = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
    20.0 * mean_square.sqrt().max(1e-10).log10()
}

/// Collapse a per-frame voiced/unvoiced sequence into speech spans.
///
/// Gaps shorter than `min_silence` do not split a span; spans shorter than
/// `min_speech` are dropped; spans longer than `max_speech` are cut into
/// maximal pieces so downstream subtitle cues stay readable.
pub fn spans_from_activity(
    frames: &[bool],
    frame_duration: f64,
    min_speech: f64,
    min_silence: f64,
    max_speech: f64,
) -> Vec<SpeechSpan> {
    let mut raw: Vec<SpeechSpan> = Vec::new();
    let mut open: Option<f64> = None;
    let mut silence_since: Option<f64> = None;

    for (i, &voiced) in frames.iter().enumerate() {
        let t = i as f64 * frame_duration;
        if voiced {
            silence_since = None;
            if open.is_none() {
                open = Some(t);
            }
        } else if let Some(start) = open {
            let since = *silence_since.get_or_insert(t);
            if t + frame_duration - since >= min_silence {
                raw.push(SpeechSpan { start, end: since });
                open = None;
                silence_since = None;
            }
        }
    }
    if let Some(start) = open {
        let end = silence_since.unwrap_or(frames.len() as f64 * frame_duration);
        raw.push(SpeechSpan { start, end });
    }

    let mut spans = Vec::with_capacity(raw.len());
    for span in raw {
        if span.duration() < min_speech {
            continue;
        }
        // Cut over-long spans into max_speech pieces.
        let mut start = span.start;
        while span.end - start > max_speech {
            spans.push(SpeechSpan {
                start,
                end: start + max_speech,
            });
            start += max_speech;
        }
        if span.end - start >= min_speech {
            spans.push(SpeechSpan { start, end: span.end });
        }
    }
    spans
}
