use super::{ParentResource, ReconcileContext, SubReconciler};
use crate::controller::error::Result;
use crate::controller::stash::Stash;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;

type SyncFn<P> =
    dyn for<'a> Fn(&'a ReconcileContext, &'a mut P, &'a mut Stash) -> BoxFuture<'a, Result<()>> + Send + Sync;

/// Sub-reconciler running an async closure
///
/// ```ignore
/// SyncReconciler::<Function>::new("ResolveTargetImage", |ctx, parent, stash| {
///     Box::pin(resolve_target_image(ctx, parent, stash))
/// })
/// ```
pub struct SyncReconciler<P> {
    name: String,
    sync: Box<SyncFn<P>>,
}

impl<P> SyncReconciler<P> {
    pub fn new<F>(name: impl Into<String>, sync: F) -> Self
    where
        F: for<'a> Fn(&'a ReconcileContext, &'a mut P, &'a mut Stash) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            sync: Box::new(sync),
        }
    }
}

impl<P> fmt::Debug for SyncReconciler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncReconciler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: ParentResource> SubReconciler<P> for SyncReconciler<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self, ctx: &ReconcileContext, parent: &mut P, stash: &mut Stash) -> Result<()> {
        (self.sync)(ctx, parent, stash).await
    }
}
