//! Per-task progress pub/sub.
//!
//! Best-effort broadcast: publishing with no subscribers drops the event,
//! and there is no replay. Transport adapters send the task's current
//! snapshot on join before handing the receiver to the client.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::runtime::types::{ProgressEvent, TaskId};

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out of [`ProgressEvent`]s keyed by task id.
#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<TaskId, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<TaskId, broadcast::Sender<ProgressEvent>>> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to a task's events. The channel is created lazily so
    /// subscribing before the first publish works.
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.channels()
            .entry(task_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to the task's subscribers, if any.
    pub fn publish(&self, event: ProgressEvent) {
        let sender = self.channels().get(&event.task_id).cloned();
        if let Some(sender) = sender {
            // A send error just means nobody is listening right now.
            let _ = sender.send(event);
        }
    }

    /// Drop the channel of a deleted task, disconnecting its subscribers.
    pub fn remove(&self, task_id: &str) {
        self.channels().remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::TaskStatus;

    fn event(task_id: &str, progress: f32) -> ProgressEvent {
        ProgressEvent {
            task_id: task_id.to_owned(),
            progress,
            status_text: "working".to_owned(),
            status: TaskStatus::Processing,
            data: None,
        }
    }

    #[tokio::test]
    async fn subscriber_sees_only_post_join_events_in_order() {
        let bus = ProgressBroadcaster::new();
        bus.publish(event("t1", 10.0)); // nobody listening, dropped

        let mut rx = bus.subscribe("t1");
        bus.publish(event("t1", 20.0));
        bus.publish(event("t1", 30.0));

        assert_eq!(rx.recv().await.unwrap().progress, 20.0);
        assert_eq!(rx.recv().await.unwrap().progress, 30.0);
    }

    #[tokio::test]
    async fn channels_are_isolated_per_task() {
        let bus = ProgressBroadcaster::new();
        let mut rx_a = bus.subscribe("a");
        let _rx_b = bus.subscribe("b");
        bus.publish(event("b", 50.0));
        bus.publish(event("a", 60.0));
        assert_eq!(rx_a.recv().await.unwrap().progress, 60.0);
    }

    #[tokio::test]
    async fn remove_disconnects_subscribers() {
        let bus = ProgressBroadcaster::new();
        let mut rx = bus.subscribe("gone");
        bus.remove("gone");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
