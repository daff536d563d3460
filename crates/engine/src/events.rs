//! Live progress events.
//!
//! Best-effort, at-least-once fan-out to any connected dashboard; polling
//! the run record remains authoritative.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uiproof_common::StepStatus;

/// Event emitted while a run progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A step changed status
    StepUpdate {
        run_id: String,
        step_index: usize,
        status: StepStatus,
        message: String,
    },
    /// The run reached a terminal state
    Complete {
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact_id: Option<String>,
    },
}

/// Broadcast channel wrapper for run events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; dropped silently when nobody is listening.
    pub fn emit(&self, event: RunEvent) {
        debug!("Emitting {:?}", event);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(RunEvent::StepUpdate {
            run_id: "A_b_1".into(),
            step_index: 0,
            status: StepStatus::Running,
            message: "Initializing".into(),
        });
        match rx.recv().await.unwrap() {
            RunEvent::StepUpdate { step_index, .. } => assert_eq!(step_index, 0),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::default();
        bus.emit(RunEvent::Complete {
            run_id: "A_b_1".into(),
            artifact_id: None,
        });
    }

    #[test]
    fn wire_format_is_tagged() {
        let json = serde_json::to_value(RunEvent::Complete {
            run_id: "A_b_1".into(),
            artifact_id: Some("pdf-1".into()),
        })
        .unwrap();
        assert_eq!(json["event"], "complete");
        assert_eq!(json["artifact_id"], "pdf-1");
    }
}
