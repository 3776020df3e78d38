//! Capturing [`EventRecorder`].

use crate::controller::events::{EventRecorder, EventType};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: String,
    pub name: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Keeps every recorded event in order, shared between clones
#[derive(Debug, Clone, Default)]
pub struct FakeRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl FakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.reason.clone()).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.message.clone()).collect()
    }
}

#[async_trait]
impl EventRecorder for FakeRecorder {
    async fn record(&self, regarding: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        self.lock().push(RecordedEvent {
            kind: regarding.kind.clone().unwrap_or_default(),
            name: regarding.name.clone().unwrap_or_default(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
