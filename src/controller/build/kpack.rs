//! kpack Image child shared by Functions and Applications.

use super::{BuildTarget, TARGET_IMAGE};
use crate::apis::{
    BuildStatus, BuilderReference, GitSource, Image, ImageBuild, ImageSpec, Source, SourceConfig,
    TypedLocalObjectReference, KPACK_IMAGE_READY,
};
use crate::controller::diff::{merge_maps, semantic_equals};
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::{mark_not_owned, ChildRole, Desired, ReconcileContext};
use crate::controller::stash::Stash;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::EnvVar;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Build resource whose image kpack builds from source
pub trait KpackBuild: BuildTarget<Status = BuildStatus> {
    /// Label identifying the Image created for this resource
    const LABEL_KEY: &'static str;
    /// Middle segment of the Image's generated name
    const ROLE: &'static str;
    /// ClusterBuilder used for the build
    const BUILDER: &'static str;

    /// Source to build, `None` for images built outside the cluster
    fn source(&self) -> Option<&Source>;
    fn cache_size(&self) -> Option<&str>;

    /// Environment passed to the buildpacks
    fn build_env(&self) -> Vec<EnvVar> {
        Vec::new()
    }
}

/// Child role converging the kpack Image of a [`KpackBuild`]
pub struct KpackImageRole<P> {
    _marker: PhantomData<fn() -> P>,
}

impl<P> KpackImageRole<P> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<P> Default for KpackImageRole<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for KpackImageRole<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KpackImageRole").finish()
    }
}

#[async_trait]
impl<P: KpackBuild> ChildRole<P> for KpackImageRole<P> {
    type Child = Image;

    fn name(&self) -> &str {
        "ChildKpackImage"
    }

    fn condition_type(&self) -> &'static str {
        KPACK_IMAGE_READY
    }

    fn role_label(&self, parent: &P) -> (String, String) {
        (P::LABEL_KEY.to_string(), parent.name_any())
    }

    async fn desired_child(&self, _ctx: &ReconcileContext, parent: &P, stash: &Stash) -> Result<Desired<Image>> {
        let Some(source) = parent.source() else {
            return Ok(Desired::Absent);
        };
        let Some(target_image) = stash.retrieve(&TARGET_IMAGE) else {
            return Ok(Desired::Unresolved);
        };

        let (key, value) = self.role_label(parent);
        let labels = merge_maps(parent.meta().labels.as_ref(), Some(&BTreeMap::from([(key, value)])));
        let env = parent.build_env();

        Ok(Desired::Child(Image {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-{}-", parent.name_any(), P::ROLE)),
                labels: Some(labels),
                ..Default::default()
            },
            spec: ImageSpec {
                tag: target_image.clone(),
                builder: BuilderReference::cluster_builder(P::BUILDER),
                service_account: String::new(),
                source: SourceConfig {
                    git: source.git.as_ref().map(|git| GitSource {
                        url: git.url.clone(),
                        revision: git.revision.clone(),
                    }),
                    sub_path: source.sub_path.clone(),
                },
                cache_size: parent.cache_size().map(str::to_string),
                build: (!env.is_empty()).then_some(ImageBuild { env }),
            },
            status: None,
        }))
    }

    fn merge_before_update(&self, current: &mut Image, desired: &Image) {
        current.metadata.labels.clone_from(&desired.metadata.labels);
        current.spec = desired.spec.clone();
    }

    fn semantic_equals(&self, a: &Image, b: &Image) -> bool {
        semantic_equals(&a.metadata.labels, &b.metadata.labels) && semantic_equals(&a.spec, &b.spec)
    }

    fn reflect_child_status_on_parent(&self, parent: &mut P, child: Option<&Image>, err: Option<&Error>) {
        if let Some(name) = err.and_then(Error::already_exists_name) {
            mark_not_owned::<Image, P>(parent, KPACK_IMAGE_READY, name);
            return;
        }

        match (child, err) {
            (Some(image), _) => {
                let status = parent.status_mut();
                status.kpack_image_ref = Some(TypedLocalObjectReference::for_object(image));
                if let Some(image_status) = &image.status {
                    status.latest_image.clone_from(&image_status.latest_image);
                    status.build_cache_ref = (!image_status.build_cache_name.is_empty()).then(|| {
                        TypedLocalObjectReference {
                            api_group: None,
                            kind: "PersistentVolumeClaim".to_string(),
                            name: image_status.build_cache_name.clone(),
                        }
                    });
                } else {
                    status.build_cache_ref = None;
                }
                parent
                    .conditions()
                    .propagate(KPACK_IMAGE_READY, image.ready_condition());
            }
            (None, None) => {
                // built outside the cluster; the target is already the latest image
                let status = parent.status_mut();
                status.kpack_image_ref = None;
                status.build_cache_ref = None;
                status.latest_image = status.target_image.clone();
                parent.conditions().mark_true(KPACK_IMAGE_READY);
            }
            (None, Some(_)) => {
                let status = parent.status_mut();
                status.kpack_image_ref = None;
                status.build_cache_ref = None;
            }
        }
    }
}
