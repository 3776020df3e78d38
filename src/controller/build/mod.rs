//! # Build Reconcilers
//!
//! Reconcilers for `build.projectriff.io` resources.
//!
//! Functions and Applications resolve a target image, then hand the build
//! to a kpack Image. Containers only resolve their image. The
//! ClusterBuilder sync publishes the builder images kpack reports into the
//! `builders` ConfigMap for clients to read.

mod application;
mod cluster_builder;
mod container;
mod function;
mod kpack;

pub use application::application_reconciler;
pub use cluster_builder::ClusterBuilderReconciler;
pub use container::container_reconciler;
pub use function::function_reconciler;
pub use kpack::{KpackBuild, KpackImageRole};

use crate::apis::IMAGE_RESOLVED;
use crate::constants::{BUILD_CONFIGMAP, DEFAULT_IMAGE_PREFIX_KEY};
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::{ParentResource, ReconcileContext, SubReconciler, SyncReconciler};
use crate::controller::stash::{Stash, StashKey};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tracing::debug;

/// Image the build pushes to, once resolved
pub const TARGET_IMAGE: StashKey<String> = StashKey::new("target-image");

const MISSING_PREFIX: &str = "missing default image prefix";

/// Resource whose target image is either explicit or derived from the
/// namespace's default image prefix
pub trait BuildTarget: ParentResource {
    /// Image requested in the spec, empty for the default
    fn spec_image(&self) -> &str;
    fn set_target_image(&mut self, image: String);
}

/// Step resolving the target image into status and the stash
pub fn resolve_target_image<P: BuildTarget>() -> Box<dyn SubReconciler<P>> {
    Box::new(SyncReconciler::<P>::new("ResolveTargetImage", |ctx, parent, stash| {
        Box::pin(sync_target_image(ctx, parent, stash))
    }))
}

async fn sync_target_image<P: BuildTarget>(ctx: &ReconcileContext, parent: &mut P, stash: &mut Stash) -> Result<()> {
    match target_image(ctx, parent).await {
        Ok(image) => {
            debug!("Resolved target image {} for {}", image, parent.name_any());
            parent.set_target_image(image.clone());
            parent.conditions().mark_true(IMAGE_RESOLVED);
            stash.store(&TARGET_IMAGE, image);
            Ok(())
        }
        Err(e @ Error::MissingConfig(_)) => {
            parent
                .conditions()
                .mark_false(IMAGE_RESOLVED, "DefaultImagePrefixMissing", MISSING_PREFIX);
            Err(e)
        }
        Err(e) => {
            parent
                .conditions()
                .mark_false(IMAGE_RESOLVED, "ImageInvalid", &e.to_string());
            Err(e)
        }
    }
}

async fn target_image<P: BuildTarget>(ctx: &ReconcileContext, parent: &P) -> Result<String> {
    if !parent.spec_image().is_empty() {
        return Ok(parent.spec_image().to_string());
    }

    let namespace = parent.namespace();
    ctx.track::<ConfigMap, _>(namespace.as_deref(), BUILD_CONFIGMAP, parent);
    let config = match ctx
        .client
        .get::<ConfigMap>(namespace.as_deref(), BUILD_CONFIGMAP)
        .await
    {
        Ok(config) => config,
        Err(e) if e.is_not_found() => return Err(Error::MissingConfig(MISSING_PREFIX.to_string())),
        Err(e) => return Err(e),
    };
    let prefix = config
        .data
        .as_ref()
        .and_then(|data| data.get(DEFAULT_IMAGE_PREFIX_KEY))
        .filter(|prefix| !prefix.is_empty())
        .ok_or_else(|| Error::MissingConfig(MISSING_PREFIX.to_string()))?;

    Ok(format!("{}/{}", prefix.trim_end_matches('/'), parent.name_any()))
}
