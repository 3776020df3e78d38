//! Parent reconciler: load, run steps, persist status.

use super::{display_key, ConditionedStatus, KeyReconciler, ParentResource, ReconcileContext, SubReconciler};
use crate::controller::diff::status_changed;
use crate::controller::error::{Error, Result};
use crate::controller::events::EventType;
use crate::controller::stash::Stash;
use crate::observability::metrics;
use async_trait::async_trait;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, Instrument};

/// Runs an ordered list of sub-reconcilers against one parent kind
pub struct ParentReconciler<P: ParentResource> {
    kind: String,
    reconcilers: Vec<Box<dyn SubReconciler<P>>>,
}

impl<P: ParentResource> fmt::Debug for ParentReconciler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.reconcilers.iter().map(|r| r.name()).collect();
        f.debug_struct("ParentReconciler")
            .field("kind", &self.kind)
            .field("reconcilers", &names)
            .finish()
    }
}

impl<P: ParentResource> ParentReconciler<P> {
    pub fn new(reconcilers: Vec<Box<dyn SubReconciler<P>>>) -> Self {
        Self {
            kind: P::kind(&()).into_owned(),
            reconcilers,
        }
    }

    /// Run one pass for the parent with the given key
    ///
    /// A parent that no longer exists, or is being deleted, is a no-op.
    /// Every step runs even when an earlier one fails; the first step error
    /// is returned after the status is written. A failed status write takes
    /// precedence over step errors.
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error semantics are described above"
    )]
    pub async fn reconcile(&self, ctx: &ReconcileContext, namespace: Option<&str>, name: &str) -> Result<()> {
        let kind = self.kind.as_str();
        let span = tracing::info_span!(
            "reconcile",
            resource.kind = kind,
            resource.name = name,
            resource.namespace = namespace.unwrap_or_default()
        );
        let start = Instant::now();
        let result = self.reconcile_pass(ctx, namespace, name).instrument(span).await;
        metrics::increment_reconciliations(kind);
        metrics::observe_reconciliation_duration(kind, start.elapsed().as_secs_f64());
        result
    }

    async fn reconcile_pass(&self, ctx: &ReconcileContext, namespace: Option<&str>, name: &str) -> Result<()> {
        let original: P = match ctx.client.get(namespace, name).await {
            Ok(parent) => parent,
            Err(e) if e.is_not_found() => {
                debug!("{} no longer exists, nothing to reconcile", name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if original.meta().deletion_timestamp.is_some() {
            debug!("{} is being deleted, skipping", display_key(&original));
            return Ok(());
        }

        info!("🔄 Reconciling {} {}", P::kind(&()), display_key(&original));

        let mut parent = original.clone();
        parent.conditions().initialize_conditions();
        let generation = parent.meta().generation;
        parent.status_mut().set_observed_generation(generation);

        let mut stash = Stash::default();
        let mut first_error: Option<Error> = None;
        for reconciler in &self.reconcilers {
            if let Err(e) = reconciler.reconcile(ctx, &mut parent, &mut stash).await {
                error!(
                    "❌ {} failed for {}: {}",
                    reconciler.name(),
                    display_key(&parent),
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        if status_changed(original.status(), parent.status()) {
            match ctx.client.update_status(&parent).await {
                Ok(_) => {
                    debug!("Updated status of {}", display_key(&parent));
                    ctx.record(&parent, EventType::Normal, "StatusUpdated", "Updated status")
                        .await;
                }
                Err(e) => {
                    error!("Failed to update status of {}: {}", display_key(&parent), e);
                    ctx.record(
                        &parent,
                        EventType::Warning,
                        "StatusUpdateFailed",
                        &format!("Failed to update status: {e}"),
                    )
                    .await;
                    return Err(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                let ready = parent
                    .conditions()
                    .get_condition(P::condition_set().happy())
                    .map(|c| c.status);
                info!("✅ Reconciled {} (Ready: {:?})", display_key(&parent), ready);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<P: ParentResource> KeyReconciler for ParentReconciler<P> {
    fn name(&self) -> &str {
        &self.kind
    }

    async fn reconcile(&self, ctx: &ReconcileContext, namespace: Option<&str>, name: &str) -> Result<()> {
        ParentReconciler::reconcile(self, ctx, namespace, name).await
    }
}
