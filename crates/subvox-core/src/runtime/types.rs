use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::AudioError;
use crate::subtitle::SubtitleSegment;

/// Unique identifier for a submitted task (UUID v4, string on the wire).
pub type TaskId = String;

/// High-level lifecycle state of a task.
///
/// Edges: `Pending → Processing → Completed | Failed`; the only re-entry is
/// an explicit retry reset (`Failed | Completed → Pending`). The completed
/// sub-pipelines (translation, dubbing) pass through `Processing` again and
/// land back on `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// The complete in-memory record for a single submitted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Percentage in `[0, 100]`, non-decreasing within a run.
    pub progress: f32,
    pub status_text: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    pub subtitles: Vec<SubtitleSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_video_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

/// One progress update, published to subscribers of the task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub progress: f32,
    pub status_text: String,
    pub status: TaskStatus,
    /// Optional stage payload (e.g. freshly assembled subtitles).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A linear progress band owned by one pipeline stage.
///
/// Collaborator callbacks report stage-local percentages; `at` maps them
/// into the band so every stage uses the same mechanism.
#[derive(Debug, Clone, Copy)]
pub struct StageSpan {
    pub from: f32,
    pub to: f32,
}

impl StageSpan {
    pub const fn new(from: f32, to: f32) -> Self {
        Self { from, to }
    }

    /// Map a stage-local percentage (`0..=100`) into this band.
    pub fn at(self, inner: f32) -> f32 {
        let t = (inner / 100.0).clamp(0.0, 1.0);
        self.from + (self.to - self.from) * t
    }
}

/// Errors produced by pipeline runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Voice-activity detection found nothing usable; the run aborts.
    #[error("no speech detected in the audio track")]
    NoSpeechDetected,

    /// A collaborator call failed.
    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A sub-pipeline was requested on a task in the wrong state.
    #[error("task is not in the {expected} state")]
    InvalidState { expected: &'static str },

    /// Translation or dubbing requested on a task without subtitles.
    #[error("task has no subtitle data")]
    NoSubtitles,

    /// Every segment had empty text and translation; nothing to synthesize.
    #[error("no usable dubbing lines")]
    NothingToDub,

    /// The task record disappeared mid-run; the run stops writing.
    #[error("task was deleted")]
    TaskDeleted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn collaborator(stage: &'static str, source: anyhow::Error) -> Self {
        PipelineError::Collaborator { stage, source }
    }
}
