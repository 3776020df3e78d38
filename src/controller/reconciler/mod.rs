//! # Reconciler Framework
//!
//! Composable reconcile passes over a parent resource.
//!
//! A [`ParentReconciler`] loads the parent and runs an ordered list of
//! [`SubReconciler`]s against a mutable copy of it. Sub-reconcilers hand
//! values to each other through a per-pass [`Stash`] and write conditions
//! onto the copy's status; the parent reconciler persists the status once at
//! the end of the pass.
//!
//! - [`SyncReconciler`]: run a closure
//! - [`ChildReconciler`]: converge a single owned child object for a [`ChildRole`]

mod child;
mod parent;
mod sync;

pub use child::{mark_not_owned, not_owned_message, owner_reference, ChildReconciler, ChildRole, Desired, NOT_OWNED};
pub use parent::ParentReconciler;
pub use sync::SyncReconciler;

use crate::apis::condition::{Condition, ConditionManager, ConditionSet};
use crate::controller::client::{Client, Object, ObjectKey};
use crate::controller::error::Result;
use crate::controller::events::{EventRecorder, EventType};
use crate::controller::stash::Stash;
use crate::controller::tracker::Tracker;
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// Status carrying conditions and an observed generation
pub trait ConditionedStatus {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

/// Custom resource reconciled by a [`ParentReconciler`]
pub trait ParentResource: Object {
    type Status: ConditionedStatus + Clone + Debug + Default + Serialize + Send + Sync;

    fn condition_set() -> &'static ConditionSet;
    fn status(&self) -> Option<&Self::Status>;
    /// Status, created empty when absent
    fn status_mut(&mut self) -> &mut Self::Status;

    /// Condition manager over this resource's status
    fn conditions(&mut self) -> ConditionManager<'_> {
        Self::condition_set().manage(self.status_mut().conditions_mut())
    }
}

/// Collaborators handed to every reconcile pass
#[derive(Clone)]
pub struct ReconcileContext {
    pub client: Client,
    pub tracker: Arc<Tracker>,
    pub recorder: Arc<dyn EventRecorder>,
    pub system_namespace: String,
}

impl fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("tracker", &self.tracker)
            .field("system_namespace", &self.system_namespace)
            .finish_non_exhaustive()
    }
}

impl ReconcileContext {
    pub fn new(
        client: Client,
        tracker: Arc<Tracker>,
        recorder: Arc<dyn EventRecorder>,
        system_namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tracker,
            recorder,
            system_namespace: system_namespace.into(),
        }
    }

    /// Requeue `parent` whenever the object named by the key changes
    pub fn track<K, P>(&self, namespace: Option<&str>, name: &str, parent: &P)
    where
        K: Resource<DynamicType = ()>,
        P: Resource<DynamicType = ()>,
    {
        self.tracker
            .track(ObjectKey::of::<K>(namespace, name), ObjectKey::for_object(parent));
    }

    /// Record an event against `parent`
    pub async fn record<P: Resource<DynamicType = ()>>(
        &self,
        parent: &P,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let regarding = parent.object_ref(&());
        self.recorder
            .record(&regarding, event_type, reason, message)
            .await;
    }
}

/// One step of a reconcile pass
#[async_trait]
pub trait SubReconciler<P: ParentResource>: Send + Sync {
    /// Step name used in logs
    fn name(&self) -> &str;

    async fn reconcile(&self, ctx: &ReconcileContext, parent: &mut P, stash: &mut Stash) -> Result<()>;
}

/// Reconciles one object identified by its key, rather than a parent status
///
/// Used for controllers that maintain an aggregate object, such as the
/// builders ConfigMap, instead of a status.
#[async_trait]
pub trait KeyReconciler: Send + Sync {
    fn name(&self) -> &str;

    async fn reconcile(&self, ctx: &ReconcileContext, namespace: Option<&str>, name: &str) -> Result<()>;
}

/// Name and namespace for log fields
pub(crate) fn display_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(namespace) => format!("{}/{}", namespace, obj.name_any()),
        None => obj.name_any(),
    }
}
