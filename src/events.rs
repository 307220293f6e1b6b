//! Observable events emitted during classification and batch processing.
//!
//! The pipeline and batch processor publish events that transports can
//! render as WebSocket frames, SSE streams, or log lines. Emission is
//! best-effort: a missing or slow consumer never fails or delays the work
//! that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// One of the six ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExtractKeywords,
    QueryGraph,
    SearchVectors,
    LlmJudge,
    CalculateConfidence,
    RouteDecision,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::ExtractKeywords,
        Stage::QueryGraph,
        Stage::SearchVectors,
        Stage::LlmJudge,
        Stage::CalculateConfidence,
        Stage::RouteDecision,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ExtractKeywords => "extract_keywords",
            Self::QueryGraph => "query_graph",
            Self::SearchVectors => "search_vectors",
            Self::LlmJudge => "llm_judge",
            Self::CalculateConfidence => "calculate_confidence",
            Self::RouteDecision => "route_decision",
        };
        write!(f, "{}", s)
    }
}

/// Types of events emitted during a single classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationEventType {
    /// A pipeline stage began.
    StageStarted,
    /// A pipeline stage finished (elapsed ms in metadata).
    StageCompleted,
    /// The full classification finished (ensemble payload in metadata).
    ClassificationComplete,
}

/// An event emitted during classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvent {
    /// Type of the event
    pub event_type: ClassificationEventType,
    /// Ticket being classified
    pub ticket_id: String,
    /// Stage the event refers to, absent for `classification_complete`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    /// Event-specific metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl ClassificationEvent {
    pub fn new(
        event_type: ClassificationEventType,
        ticket_id: impl Into<String>,
        stage: Option<Stage>,
    ) -> Self {
        Self {
            event_type,
            ticket_id: ticket_id.into(),
            stage,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Get a metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref()?.get(key)
    }

    /// Create a stage-started event.
    pub fn stage_started(ticket_id: impl Into<String>, stage: Stage) -> Self {
        Self::new(ClassificationEventType::StageStarted, ticket_id, Some(stage))
    }

    /// Create a stage-completed event with elapsed milliseconds.
    pub fn stage_completed(ticket_id: impl Into<String>, stage: Stage, elapsed_ms: u64) -> Self {
        Self::new(ClassificationEventType::StageCompleted, ticket_id, Some(stage))
            .with_metadata("elapsed_ms", elapsed_ms as i64)
    }

    /// Create a classification-complete event carrying the ensemble payload.
    pub fn classification_complete(ticket_id: impl Into<String>, ensemble: Value) -> Self {
        Self::new(ClassificationEventType::ClassificationComplete, ticket_id, None)
            .with_metadata("ensemble", ensemble)
    }
}

/// Broadcast bus for classification events.
///
/// Cloning is cheap; every clone publishes into the same channel. Slow
/// subscribers lag and miss events rather than blocking publishers, which is
/// the contract the pipeline requires.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClassificationEvent>,
}

impl EventBus {
    /// Default per-subscriber buffer capacity.
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Succeeds even with no subscribers.
    pub fn emit(&self, event: ClassificationEvent) {
        // A send error just means nobody is listening.
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ClassificationEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display_names() {
        assert_eq!(Stage::ExtractKeywords.to_string(), "extract_keywords");
        assert_eq!(Stage::RouteDecision.to_string(), "route_decision");
        assert_eq!(Stage::ALL.len(), 6);
    }

    #[test]
    fn test_stage_completed_metadata() {
        let event = ClassificationEvent::stage_completed("t-1", Stage::QueryGraph, 42);
        assert_eq!(event.event_type, ClassificationEventType::StageCompleted);
        assert_eq!(event.stage, Some(Stage::QueryGraph));
        assert_eq!(event.get_metadata("elapsed_ms"), Some(&Value::from(42)));
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.emit(ClassificationEvent::stage_started("t-1", Stage::LlmJudge));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(ClassificationEvent::stage_started("t-1", Stage::ExtractKeywords));
        bus.emit(ClassificationEvent::stage_completed("t-1", Stage::ExtractKeywords, 5));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event_type, ClassificationEventType::StageStarted);
        assert_eq!(second.event_type, ClassificationEventType::StageCompleted);
    }

    #[test]
    fn test_event_serialization_uses_snake_case() {
        let event = ClassificationEvent::stage_started("t-1", Stage::SearchVectors);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "stage_started");
        assert_eq!(json["stage"], "search_vectors");
    }
}
