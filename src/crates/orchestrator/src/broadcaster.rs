//! `UpdateBroadcaster`: the abstract sink for state-change notifications
//! (spec §4.8). The core calls it on every transition and graph mutation; it
//! never waits on or inspects what happens downstream.
//!
//! Grounded on `api/ws/handler.rs`'s `broadcast::Sender<WsEvent>` /
//! `let _ = self.tx.send(event)` idiom: broadcasting is fire-and-forget, with
//! no receivers being a normal, silent case (spec §4.8: "no backpressure, no
//! delivery guarantee").

use serde::{Deserialize, Serialize};

use crate::node::TaskStatus;

/// One observable change, passed to every registered `UpdateBroadcaster`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    StateChanged {
        node_id: String,
        old_status: TaskStatus,
        new_status: TaskStatus,
    },
    GraphChanged {
        project_id: String,
    },
}

/// Receives orchestrator events. Implementations must not block or fail the
/// caller; a slow or absent receiver is the implementation's problem, not the
/// core's (spec §4.8).
pub trait UpdateBroadcaster: Send + Sync {
    fn on_state_changed(&self, node_id: &str, old_status: TaskStatus, new_status: TaskStatus);
    fn on_graph_changed(&self, project_id: &str);
}

/// Drops every event. The default when nothing is listening.
pub struct NoopBroadcaster;

impl UpdateBroadcaster for NoopBroadcaster {
    fn on_state_changed(&self, _node_id: &str, _old_status: TaskStatus, _new_status: TaskStatus) {}
    fn on_graph_changed(&self, _project_id: &str) {}
}

/// Forwards events onto a `tokio::sync::broadcast` channel. Send errors (no
/// active receivers) are swallowed, matching the teacher's WebSocket handler.
pub struct ChannelBroadcaster {
    tx: tokio::sync::broadcast::Sender<UpdateEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<UpdateEvent>) {
        let (tx, rx) = tokio::sync::broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }
}

impl UpdateBroadcaster for ChannelBroadcaster {
    fn on_state_changed(&self, node_id: &str, old_status: TaskStatus, new_status: TaskStatus) {
        let _ = self.tx.send(UpdateEvent::StateChanged {
            node_id: node_id.to_string(),
            old_status,
            new_status,
        });
    }

    fn on_graph_changed(&self, project_id: &str) {
        let _ = self.tx.send(UpdateEvent::GraphChanged {
            project_id: project_id.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_with_no_receivers_does_not_panic() {
        let (broadcaster, _rx) = ChannelBroadcaster::new(16);
        drop(_rx);
        broadcaster.on_state_changed("n1", TaskStatus::Pending, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn subscriber_receives_state_change() {
        let (broadcaster, mut rx) = ChannelBroadcaster::new(16);
        broadcaster.on_state_changed("n1", TaskStatus::Pending, TaskStatus::Ready);
        let event = rx.recv().await.unwrap();
        match event {
            UpdateEvent::StateChanged { node_id, new_status, .. } => {
                assert_eq!(node_id, "n1");
                assert_eq!(new_status, TaskStatus::Ready);
            }
            _ => panic!("expected StateChanged"),
        }
    }
}
