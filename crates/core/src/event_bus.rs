//! Event bus: trait for emitting automation events from the engine.
//!
//! The engine accepts an `Arc<dyn EventSink>`; deployments route events to
//! their analytics pipeline, tests capture them in memory.

use crate::types::{AutomationEvent, EventType};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Trait for emitting automation events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AutomationEvent);
}

/// No-op sink for deployments that don't consume events.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: AutomationEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AutomationEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AutomationEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: AutomationEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for an `AutomationEvent` scoped to a workflow.
pub fn make_event(
    event_type: EventType,
    workflow_id: Uuid,
    member_id: Option<Uuid>,
    customer_id: Option<String>,
) -> AutomationEvent {
    AutomationEvent {
        event_id: Uuid::new_v4(),
        event_type,
        workflow_id,
        member_id,
        customer_id,
        step_id: None,
        detail: None,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
