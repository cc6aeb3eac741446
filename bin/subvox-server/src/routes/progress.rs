//! WebSocket progress feed.
//!
//! Contract: the client receives the task's current snapshot first, then
//! only events published after it joined. Lagged subscribers are dropped
//! by the broadcast channel and simply resubscribe.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, State};
use axum::response::Response;
use futures_util::SinkExt;
use subvox_core::ProgressEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

/// `GET /api/progress/{id}`: upgrade to a WebSocket event stream.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| feed(socket, state, id))
}

async fn feed(mut socket: WebSocket, state: Arc<AppState>, task_id: String) {
    // Subscribe before the snapshot so no event between the two is lost;
    // the monotone progress clamp makes any duplicate harmless.
    let mut events = state.broadcaster.subscribe(&task_id);

    let Some(task) = state.store.get(&task_id).await else {
        let _ = socket
            .send(Message::Text("{\"error\":\"task not found\"}".into()))
            .await;
        let _ = socket.close().await;
        return;
    };
    let snapshot = ProgressEvent {
        task_id: task.id.clone(),
        progress: task.progress,
        status_text: task.status_text.clone(),
        status: task.status,
        data: None,
    };
    if send_event(&mut socket, &snapshot).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!(task = %task_id, missed, "subscriber lagged; continuing");
                }
                // Task deleted: its channel is gone.
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(task = %task_id, error = %e, "websocket receive error");
                    break;
                }
            },
        }
    }
    let _ = socket.close().await;
}

async fn send_event(socket: &mut WebSocket, event: &ProgressEvent) -> Result<(), ()> {
    match serde_json::to_string(event) {
        Ok(body) => socket.send(Message::Text(body.into())).await.map_err(|_| ()),
        Err(e) => {
            warn!(error = %e, "progress event serialization failed");
            Ok(())
        }
    }
}
