//! # Events
//!
//! Kubernetes Events emitted against parent resources.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Sink for events about a resource
///
/// Recording is best effort: failures are logged, never returned.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, regarding: &ObjectReference, event_type: EventType, reason: &str, message: &str);
}

/// [`EventRecorder`] publishing through the kube-runtime events API
pub struct KubeRecorder {
    recorder: Recorder,
}

impl KubeRecorder {
    pub fn new(client: kube::Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeRecorder {
    async fn record(&self, regarding: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        let event = Event {
            type_: match event_type {
                EventType::Normal => KubeEventType::Normal,
                EventType::Warning => KubeEventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(
                "Failed to publish {} event {} for {}: {}",
                event_type,
                reason,
                regarding.name.as_deref().unwrap_or_default(),
                e
            );
        }
    }
}
