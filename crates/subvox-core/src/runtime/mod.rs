//! The task runtime: store, progress fan-out, collaborator seams and the
//! pipeline executor.

pub mod collaborators;
pub mod executor;
pub mod progress;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use collaborators::{
    Collaborators, DubbingLine, DubbingOptions, RecognizedSpan, SpeechRecognizer, SpeechSpan,
    SpeechSynthesizer, Translator, VideoRenderer, VoiceActivityDetector,
};
pub use executor::{resolve_export_dir, resolve_subtitle_export_dir, PipelineExecutor};
pub use progress::ProgressBroadcaster;
pub use store::{ProgressHook, TaskStore};
pub use types::{PipelineError, ProgressEvent, StageSpan, Task, TaskId, TaskStatus};
