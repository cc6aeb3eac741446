//! subvox-core: the task-orchestration and audio-processing core of the
//! subvox video subtitling / dubbing service.
//!
//! The crate is split into:
//! - [`audio`] - stateless media-file operations backed by ffmpeg
//! - [`runtime`] - task store, progress broadcast and the pipeline executor
//! - [`subtitle`] - subtitle assembly and export
//! - [`services`] - default collaborator implementations (VAD, ASR,
//!   translation, TTS, video rendering) behind the [`runtime::collaborators`]
//!   trait seams
//! - [`config`] - persisted application settings

pub mod audio;
pub mod config;
pub mod runtime;
pub mod services;
pub mod subtitle;

pub use audio::{AudioChunk, AudioEngine, AudioError, ProgressFn};
pub use config::{Config, SubtitleStyle};
pub use runtime::{
    Collaborators, DubbingOptions, PipelineError, PipelineExecutor, ProgressBroadcaster,
    ProgressEvent, RecognizedSpan, SpeechSpan, StageSpan, Task, TaskId, TaskStatus, TaskStore,
};
pub use subtitle::{SubtitleFormat, SubtitleSegment};
