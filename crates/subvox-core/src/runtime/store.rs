//! Centralized, thread-safe task storage.
//!
//! The outer lock is held only for map lookup and insert; every task
//! mutation happens under the task's own lock, so updates to different
//! tasks never contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::runtime::types::{ProgressEvent, Task, TaskId, TaskStatus};
use crate::subtitle::SubtitleSegment;

/// Called after every successful status update; the composition root wires
/// this to the progress broadcaster.
pub type ProgressHook = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// In-memory task store. Lifetime equals the process lifetime; there is no
/// durable persistence.
#[derive(Default)]
pub struct TaskStore {
    inner: RwLock<HashMap<TaskId, Arc<RwLock<Task>>>>,
    hook: std::sync::RwLock<Option<ProgressHook>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fan-out hook. Replaces any previous hook.
    pub fn set_progress_hook(&self, hook: ProgressHook) {
        let mut slot = self
            .hook
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(hook);
    }

    fn fire_hook(&self, event: ProgressEvent) {
        let slot = self
            .hook
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(hook) = slot.as_ref() {
            hook(event);
        }
    }

    /// Insert a new `Pending` record for `file_path` and return a snapshot.
    pub async fn create(&self, file_path: &Path) -> Task {
        let file_size = tokio::fs::metadata(file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let task = Task {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            progress: 0.0,
            status_text: "waiting".to_owned(),
            file_path: file_path.to_path_buf(),
            file_name: file_path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            file_size,
            audio_path: None,
            subtitles: Vec::new(),
            output_video_path: None,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .insert(task.id.clone(), Arc::new(RwLock::new(task.clone())));
        task
    }

    async fn entry(&self, id: &str) -> Option<Arc<RwLock<Task>>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Snapshot of a task. Callers tolerate staleness; the snapshot is a
    /// clone taken under the task lock.
    pub async fn get(&self, id: &str) -> Option<Task> {
        let entry = self.entry(id).await?;
        let task = entry.read().await.clone();
        Some(task)
    }

    /// Snapshots of all tasks, newest first.
    pub async fn list_all(&self) -> Vec<Task> {
        let entries: Vec<Arc<RwLock<Task>>> = self.inner.read().await.values().cloned().collect();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            tasks.push(entry.read().await.clone());
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Remove a task. In-flight runs notice through `update_status`
    /// returning `false` and stop writing.
    pub async fn delete(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Update status, progress and status text, firing the progress hook.
    ///
    /// Returns `false` without side effects when the task no longer exists.
    /// Progress is clamped non-decreasing within a run; it may only drop on
    /// a run boundary, which is the retry reset to `Pending` or a follow-on
    /// sub-pipeline re-entering `Processing` from a terminal state.
    pub async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        progress: f32,
        status_text: &str,
        data: Option<serde_json::Value>,
    ) -> bool {
        let Some(entry) = self.entry(id).await else {
            debug!(task = id, "status update for missing task dropped");
            return false;
        };
        let event = {
            let mut task = entry.write().await;
            let run_boundary = status == TaskStatus::Pending
                || (task.status.is_terminal() && status == TaskStatus::Processing);
            task.status = status;
            task.progress = if run_boundary {
                progress.clamp(0.0, 100.0)
            } else {
                progress.clamp(0.0, 100.0).max(task.progress)
            };
            task.status_text = status_text.to_owned();
            ProgressEvent {
                task_id: task.id.clone(),
                progress: task.progress,
                status_text: task.status_text.clone(),
                status: task.status,
                data,
            }
        };
        self.fire_hook(event);
        true
    }

    /// Progress-only update from a collaborator callback. Applied only
    /// while the task is still `Processing`, so a callback that lands after
    /// the run finished cannot drag the task out of its terminal state.
    pub async fn report_progress(&self, id: &str, progress: f32, status_text: &str) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        let event = {
            let mut task = entry.write().await;
            if task.status != TaskStatus::Processing {
                return false;
            }
            task.progress = progress.clamp(0.0, 100.0).max(task.progress);
            task.status_text = status_text.to_owned();
            ProgressEvent {
                task_id: task.id.clone(),
                progress: task.progress,
                status_text: task.status_text.clone(),
                status: task.status,
                data: None,
            }
        };
        self.fire_hook(event);
        true
    }

    /// Reset a finished task to `Pending` for a fresh run. Attached
    /// artifacts survive; the new run overwrites them as it progresses.
    pub async fn reset_for_retry(&self, id: &str) -> bool {
        self.update_status(id, TaskStatus::Pending, 0.0, "waiting to retry", None)
            .await
    }

    /// Override the display name and size reported by the client at
    /// creation time.
    pub async fn override_file_meta(
        &self,
        id: &str,
        file_name: Option<String>,
        file_size: Option<u64>,
    ) -> Option<Task> {
        let entry = self.entry(id).await?;
        let mut task = entry.write().await;
        if let Some(name) = file_name {
            task.file_name = name;
        }
        if let Some(size) = file_size {
            task.file_size = size;
        }
        Some(task.clone())
    }

    // ── Field setters used by the executor ────────────────────────────────────

    pub async fn set_audio_path(&self, id: &str, path: PathBuf) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        entry.write().await.audio_path = Some(path);
        true
    }

    pub async fn set_subtitles(&self, id: &str, subtitles: Vec<SubtitleSegment>) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        entry.write().await.subtitles = subtitles;
        true
    }

    /// Attach translations positionally; lengths must already match.
    pub async fn set_translations(&self, id: &str, translations: Vec<String>) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        let mut task = entry.write().await;
        for (segment, translation) in task.subtitles.iter_mut().zip(translations) {
            segment.translation = Some(translation);
        }
        true
    }

    pub async fn set_output_video_path(&self, id: &str, path: PathBuf) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        entry.write().await.output_video_path = Some(path);
        true
    }
}
