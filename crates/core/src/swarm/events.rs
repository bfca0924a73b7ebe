//! # Core Events
//!
//! Telemetry emitted by the orchestrator and the workflow engine, and the
//! sinks that receive it. Emission is fire-and-forget: a slow or missing
//! consumer never blocks or fails a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Kind of core event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoreEventKind {
    // === Workflow lifecycle ===
    WorkflowStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    /// A post-flight check failed (non-fatal)
    PostFlightWarning,
    InsightRecorded,
    WorkflowCompleted,
    WorkflowFailed,
    // === Orchestration ===
    OrchestrationStarted,
    PhaseStarted,
    PhaseCompleted,
    AgentCompleted,
    AgentFailed,
    ConflictDetected,
    ConflictResolved,
    /// Summary of a finished orchestration
    OrchestrationCompleted,
    OrchestrationFailed,
    OrchestrationCancelled,
}

/// An event emitted by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: CoreEventKind,
    /// Workflow id, execution id or agent id that produced the event
    pub source: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl CoreEvent {
    pub fn new(kind: CoreEventKind, source: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            source: source.to_string(),
            payload: None,
        }
    }

    /// Attach a JSON payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.payload = Some(data);
        self
    }
}

/// Receiver of core events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CoreEvent);
}

/// Forwards events into a tokio channel; drops them when the channel is full
/// or closed
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<CoreEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<CoreEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end of a channel of the given capacity
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CoreEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: CoreEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::debug!(error = %e, "Dropped core event");
        }
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: CoreEvent) {
        match event.kind {
            CoreEventKind::StageFailed
            | CoreEventKind::WorkflowFailed
            | CoreEventKind::OrchestrationFailed
            | CoreEventKind::AgentFailed
            | CoreEventKind::PostFlightWarning => {
                tracing::warn!(kind = ?event.kind, source = %event.source, payload = ?event.payload, "event")
            }
            _ => {
                tracing::info!(kind = ?event.kind, source = %event.source, payload = ?event.payload, "event")
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<CoreEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<CoreEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: CoreEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: CoreEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = CoreEvent::new(CoreEventKind::StageStarted, "wf-1")
            .with_data(serde_json::json!({ "stage": "Implementation" }));
        assert_eq!(event.source, "wf-1");
        assert_eq!(event.payload.unwrap()["stage"], "Implementation");

        let json = serde_json::to_string(&CoreEvent::new(CoreEventKind::PostFlightWarning, "x"))
            .unwrap();
        assert!(json.contains("post_flight_warning"));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelEventSink::channel(1);
        sink.emit(CoreEvent::new(CoreEventKind::PhaseStarted, "exec"));
        // Full: dropped without blocking
        sink.emit(CoreEvent::new(CoreEventKind::PhaseCompleted, "exec"));

        assert_eq!(rx.recv().await.unwrap().kind, CoreEventKind::PhaseStarted);
        assert!(rx.try_recv().is_err());

        drop(rx);
        // Closed: also dropped
        sink.emit(CoreEvent::new(CoreEventKind::PhaseStarted, "exec"));
    }

    #[test]
    fn test_memory_sink_records() {
        let sink = MemoryEventSink::new();
        sink.emit(CoreEvent::new(CoreEventKind::WorkflowStarted, "wf"));
        sink.emit(CoreEvent::new(CoreEventKind::WorkflowCompleted, "wf"));
        assert_eq!(
            sink.kinds(),
            vec![CoreEventKind::WorkflowStarted, CoreEventKind::WorkflowCompleted]
        );
    }
}
