//! # Runtime
//!
//! Wiring between the reconcilers and kube-runtime.
//!
//! - `initialization`: tracing, metrics, HTTP server and Kubernetes client setup
//! - `watch_loop`: one kube-runtime `Controller` per primary kind
//! - `error_policy`: per-resource backoff and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

use crate::config::ControllerConfig;
use crate::controller::backoff::BackoffState;
use crate::controller::reconciler::{KeyReconciler, ReconcileContext};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Controllers the binary can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum ControllerKind {
    Function,
    Application,
    Container,
    ClusterBuilder,
    Processor,
    PulsarGateway,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 6] = [
        Self::Function,
        Self::Application,
        Self::Container,
        Self::ClusterBuilder,
        Self::Processor,
        Self::PulsarGateway,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "Function",
            Self::Application => "Application",
            Self::Container => "Container",
            Self::ClusterBuilder => "ClusterBuilder",
            Self::Processor => "Processor",
            Self::PulsarGateway => "PulsarGateway",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State handed to every reconcile and error policy call of one controller
pub struct ControllerContext {
    pub kind: ControllerKind,
    pub reconciler: Box<dyn KeyReconciler>,
    pub reconcile: ReconcileContext,
    pub config: ControllerConfig,
    /// Backoff per `namespace/name`, reset after a successful pass
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerContext")
            .field("kind", &self.kind)
            .field("reconciler", &self.reconciler.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ControllerContext {
    pub fn new(
        kind: ControllerKind,
        reconciler: Box<dyn KeyReconciler>,
        reconcile: ReconcileContext,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kind,
            reconciler,
            reconcile,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Backoff map key for an object
pub(crate) fn resource_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(namespace) => format!("{namespace}/{name}"),
        None => name.to_string(),
    }
}
