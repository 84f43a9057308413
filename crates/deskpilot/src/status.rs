//! Progress events emitted while a run is in flight.
//!
//! Delivery is best-effort: a sink must never block or fail the run.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    /// Waiting on the reasoning engine.
    Thinking,
    /// An action is being dispatched.
    ToolUse,
    /// An action produced its observation.
    ToolResult,
    /// Lifecycle changes: started, waiting for a human, finished.
    Status,
}

impl fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusPhase::Thinking => "thinking",
            StatusPhase::ToolUse => "tool_use",
            StatusPhase::ToolResult => "tool_result",
            StatusPhase::Status => "status",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub run_id: Uuid,
    pub phase: StatusPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    /// Step the event belongs to; 0 before the first step.
    pub step: u32,
    pub timestamp: DateTime<Local>,
}

impl StatusEvent {
    pub fn new(run_id: Uuid, phase: StatusPhase, step: u32, message: impl Into<String>) -> Self {
        Self {
            run_id,
            phase,
            message: message.into(),
            action_name: None,
            step,
            timestamp: Local::now(),
        }
    }

    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.action_name = Some(name.into());
        self
    }
}

/// Receiver of [`StatusEvent`]s. Implementations must return promptly.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn emit(&self, _event: StatusEvent) {}
}

impl StatusSink for mpsc::Sender<StatusEvent> {
    fn emit(&self, event: StatusEvent) {
        if let Err(e) = self.try_send(event) {
            trace!("[status] dropped event: {}", e);
        }
    }
}

impl StatusSink for mpsc::UnboundedSender<StatusEvent> {
    fn emit(&self, event: StatusEvent) {
        let _ = self.send(event);
    }
}

impl StatusSink for broadcast::Sender<StatusEvent> {
    fn emit(&self, event: StatusEvent) {
        // No subscribers is not an error for a status feed.
        let _ = self.send(event);
    }
}

/// Adapts a closure into a sink.
pub struct CallbackSink<F>(pub F);

impl<F> StatusSink for CallbackSink<F>
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn emit(&self, event: StatusEvent) {
        (self.0)(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let run = Uuid::new_v4();
        tx.emit(StatusEvent::new(run, StatusPhase::Status, 0, "first"));
        tx.emit(StatusEvent::new(run, StatusPhase::Status, 0, "second"));
        assert_eq!(rx.try_recv().map(|e| e.message).ok(), Some("first".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_callback_sink_and_serialization() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sink = CallbackSink(move |e: &StatusEvent| {
            assert_eq!(e.action_name.as_deref(), Some("Click"));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let event =
            StatusEvent::new(Uuid::new_v4(), StatusPhase::ToolUse, 2, "clicking").with_action("Click");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "tool_use");
        sink.emit(event);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_fine() {
        let (tx, _) = broadcast::channel(4);
        tx.emit(StatusEvent::new(Uuid::new_v4(), StatusPhase::Thinking, 1, "…"));
    }
}
