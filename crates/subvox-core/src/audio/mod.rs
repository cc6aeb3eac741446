//! Stateless media-file operations backed by an external ffmpeg transcoder.
//!
//! Every operation raises a typed [`AudioError`]; the only silent retries
//! are the documented primary/fallback pairs (segment extraction, speed
//! adjustment, duration probing).

mod chunk;
mod engine;
pub(crate) mod locate;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub use chunk::{chunk_spans, AudioChunk};
pub use engine::{atempo_steps, write_wav_16k_mono, AudioEngine, ExtractOptions};

/// Callback reporting percentage progress in `0.0..=100.0`.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Errors produced by the audio engine.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The required external binary could not be located.
    #[error(
        "{tool} not found; place it under a local ffmpeg/ directory, add it to \
         PATH, or set its path in the settings"
    )]
    ToolUnavailable { tool: &'static str },

    /// The transcoder exited with a non-zero status.
    #[error("transcoder failed: {stderr}")]
    ExtractionFailed { stderr: String },

    /// The input file does not exist.
    #[error("source file not found: {path}")]
    SourceMissing { path: PathBuf },

    /// A segment request with `start >= end` or negative bounds.
    #[error("invalid segment range {start:.3}s..{end:.3}s")]
    InvalidRange { start: f64, end: f64 },

    /// A speed factor that is zero, negative or non-finite.
    #[error("invalid speed factor {0}")]
    InvalidSpeedFactor(f64),

    /// Neither the metadata probe nor a full decode yielded a duration.
    #[error("could not determine duration of {path}: {message}")]
    ProbeFailed { path: PathBuf, message: String },

    /// WAV parsing or writing failed.
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A blocking worker panicked.
    #[error("audio worker panicked")]
    WorkerPanic,
}

impl From<tokio::task::JoinError> for AudioError {
    fn from(_: tokio::task::JoinError) -> Self {
        AudioError::WorkerPanic
    }
}
