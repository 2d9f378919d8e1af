//! Event types for streaming workflow progress
//!
//! Events are produced by the interpreter in execution order and delivered
//! either through an [`EventSink`] or as items of the streaming run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Step;

/// Trait for sending workflow events
///
/// This abstracts over the transport mechanism (channel, HTTP stream, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// Kind of event in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    WorkflowStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

impl EventType {
    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowCancelled
        )
    }
}

/// Event envelope emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    fn new(event_type: EventType, status: &str) -> Self {
        Self {
            event_type,
            step_id: None,
            step_name: None,
            status: status.to_string(),
            message: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    fn for_step(mut self, step: &Step) -> Self {
        self.step_id = Some(step.id.clone());
        self.step_name = Some(step.display_name().to_string());
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn workflow_started(workflow_id: &str, execution_id: &str) -> Self {
        Self::new(EventType::WorkflowStarted, "running").with_data(serde_json::json!({
            "workflowId": workflow_id,
            "executionId": execution_id,
        }))
    }

    pub fn step_started(step: &Step) -> Self {
        Self::new(EventType::StepStarted, "running")
            .for_step(step)
            .with_data(serde_json::json!({ "kind": step.kind.as_str() }))
    }

    pub fn step_completed(step: &Step, output: Option<&str>) -> Self {
        let event = Self::new(EventType::StepCompleted, "completed").for_step(step);
        match output {
            Some(text) => event.with_message(text),
            None => event,
        }
    }

    pub fn step_failed(step: &Step, error: &str) -> Self {
        Self::new(EventType::StepFailed, "failed")
            .for_step(step)
            .with_message(error)
    }

    pub fn workflow_completed(output: &str, steps_executed: u32) -> Self {
        Self::new(EventType::WorkflowCompleted, "completed")
            .with_message(output)
            .with_data(serde_json::json!({ "stepsExecuted": steps_executed }))
    }

    pub fn workflow_failed(error: &str) -> Self {
        Self::new(EventType::WorkflowFailed, "failed").with_message(error)
    }

    pub fn workflow_cancelled() -> Self {
        Self::new(EventType::WorkflowCancelled, "cancelled").with_message("Workflow cancelled")
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Types of all collected events, in order
    pub fn event_types(&self) -> Vec<EventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Server-sent-event framing: one `data: <json>` line per event
pub mod sse {
    use super::WorkflowEvent;
    use crate::error::Result;

    /// Encode one event as an SSE frame
    pub fn frame(event: &WorkflowEvent) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
    }

    /// Decode a buffer of SSE frames
    ///
    /// Blank frames and comment lines are skipped. Multi-line `data:` fields
    /// are joined with newlines before decoding.
    pub fn parse(text: &str) -> Result<Vec<WorkflowEvent>> {
        let normalized = text.replace("\r\n", "\n");
        let mut events = Vec::new();
        for block in normalized.split("\n\n") {
            let payload: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect();
            if payload.is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&payload.join("\n"))?);
        }
        Ok(events)
    }
}
