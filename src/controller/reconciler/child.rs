//! # Child Reconciler
//!
//! Converges the single child object a parent owns for one role.
//!
//! Children are found by the role label plus a controller owner reference
//! pointing at the parent's uid. At most one child survives a pass: extra
//! children are deleted, keeping the most recently created one.
//!
//! | desired   | actual  | action                                  |
//! |-----------|---------|-----------------------------------------|
//! | absent    | none    | nothing                                 |
//! | absent    | some    | delete                                  |
//! | child     | none    | stamp owner reference, create           |
//! | child     | equal   | nothing                                 |
//! | child     | differs | merge desired fields into actual, update |
//!
//! Whatever happens, the outcome is reflected onto the parent status.
//!
//! A create that collides with an object the parent does not own is not
//! retried in a loop: the role marks its condition `NotOwned` and later
//! passes only re-check that the colliding object still exists.

use super::{display_key, ConditionedStatus, ParentResource, ReconcileContext, SubReconciler};
use crate::apis::condition::find_condition;
use crate::controller::client::Object;
use crate::controller::error::{Error, Result};
use crate::controller::events::EventType;
use crate::controller::stash::Stash;
use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Condition reason used when a fixed-name child is owned by someone else
pub const NOT_OWNED: &str = "NotOwned";

/// Outcome of computing a role's desired child
#[derive(Debug, Clone, PartialEq)]
pub enum Desired<C> {
    /// A dependency is not resolved yet; leave children and status alone
    Unresolved,
    /// No child is wanted; any existing one is deleted
    Absent,
    Child(C),
}

/// One kind of child a parent owns
#[async_trait]
pub trait ChildRole<P: ParentResource>: Send + Sync {
    type Child: Object;

    fn name(&self) -> &str;

    /// Parent condition this child's state is reflected into
    fn condition_type(&self) -> &'static str;

    /// Label key and value identifying children of this role for `parent`
    fn role_label(&self, parent: &P) -> (String, String);

    async fn desired_child(&self, ctx: &ReconcileContext, parent: &P, stash: &Stash) -> Result<Desired<Self::Child>>;

    /// Copy the fields this controller owns from `desired` into `current`
    fn merge_before_update(&self, current: &mut Self::Child, desired: &Self::Child);

    /// Compare only the fields [`ChildRole::merge_before_update`] copies
    fn semantic_equals(&self, a: &Self::Child, b: &Self::Child) -> bool;

    /// Update the parent status from the surviving child, or from the error
    /// that prevented one
    fn reflect_child_status_on_parent(&self, parent: &mut P, child: Option<&Self::Child>, err: Option<&Error>);
}

/// Controller owner reference pointing at `parent`
pub fn owner_reference<P: Resource<DynamicType = ()>>(parent: &P) -> OwnerReference {
    OwnerReference {
        api_version: P::api_version(&()).into_owned(),
        kind: P::kind(&()).into_owned(),
        name: parent.name_any(),
        uid: parent.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn is_controlled_by<C: Resource, P: Resource>(child: &C, parent: &P) -> bool {
    let Some(uid) = parent.uid() else {
        return false;
    };
    child
        .owner_references()
        .iter()
        .any(|o| o.controller == Some(true) && o.uid == uid)
}

/// Message of the NotOwned condition for a colliding child
pub fn not_owned_message<C, P>(name: &str) -> String
where
    C: Resource<DynamicType = ()>,
    P: Resource<DynamicType = ()>,
{
    format!(
        "There is an existing {} \"{}\" that the {} does not own.",
        C::kind(&()),
        name,
        P::kind(&())
    )
}

/// Mark `condition_type` False with reason NotOwned for the named child
pub fn mark_not_owned<C, P>(parent: &mut P, condition_type: &str, name: &str)
where
    C: Resource<DynamicType = ()>,
    P: ParentResource,
{
    let message = not_owned_message::<C, P>(name);
    parent
        .conditions()
        .mark_false(condition_type, NOT_OWNED, &message);
}

/// [`SubReconciler`] converging one [`ChildRole`]
pub struct ChildReconciler<R> {
    role: R,
}

impl<R> ChildReconciler<R> {
    pub fn new(role: R) -> Self {
        Self { role }
    }
}

impl<R> fmt::Debug for ChildReconciler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildReconciler").finish_non_exhaustive()
    }
}

impl<R> ChildReconciler<R> {
    async fn list_children<P>(&self, ctx: &ReconcileContext, parent: &P) -> Result<Vec<R::Child>>
    where
        P: ParentResource,
        R: ChildRole<P>,
    {
        let (key, value) = self.role.role_label(parent);
        let labels = BTreeMap::from([(key, value)]);
        let mut children: Vec<R::Child> = ctx
            .client
            .list::<R::Child>(parent.namespace().as_deref(), &labels)
            .await?
            .into_iter()
            .filter(|c| is_controlled_by(c, parent))
            .collect();
        children.sort_by(|a, b| {
            a.meta()
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .cmp(&b.meta().creation_timestamp.as_ref().map(|t| t.0))
                .then_with(|| a.name_any().cmp(&b.name_any()))
        });
        Ok(children)
    }

    async fn delete_child<P>(&self, ctx: &ReconcileContext, parent: &P, child: &R::Child) -> Result<()>
    where
        P: ParentResource,
        R: ChildRole<P>,
    {
        let kind = R::Child::kind(&());
        metrics::increment_child_operations(&kind, "delete");
        match ctx.client.delete(child).await {
            Ok(()) => {
                info!("🗑️  Deleted {} {}", kind, display_key(child));
                ctx.record(
                    parent,
                    EventType::Normal,
                    "Deleted",
                    &format!("Deleted {} \"{}\"", kind, child.name_any()),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to delete {} {}: {}", kind, display_key(child), e);
                ctx.record(
                    parent,
                    EventType::Warning,
                    "DeleteFailed",
                    &format!("Failed to delete {} \"{}\": {}", kind, child.name_any(), e),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Whether the parent already reports a NotOwned collision that still stands
    async fn still_not_owned<P>(&self, ctx: &ReconcileContext, parent: &P, desired: &R::Child) -> Result<Option<String>>
    where
        P: ParentResource,
        R: ChildRole<P>,
    {
        let Some(name) = desired.meta().name.as_deref() else {
            return Ok(None);
        };
        let expected = not_owned_message::<R::Child, P>(name);
        let reported = parent
            .status()
            .and_then(|s| find_condition(s.conditions(), self.role.condition_type()))
            .is_some_and(|c| {
                c.is_false()
                    && c.reason.as_deref() == Some(NOT_OWNED)
                    && c.message.as_deref() == Some(expected.as_str())
            });
        if !reported {
            return Ok(None);
        }
        match ctx
            .client
            .get::<R::Child>(parent.namespace().as_deref(), name)
            .await
        {
            Ok(_) => Ok(Some(name.to_string())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_child<P>(&self, ctx: &ReconcileContext, parent: &mut P, mut desired: R::Child) -> Result<()>
    where
        P: ParentResource,
        R: ChildRole<P>,
    {
        let kind = R::Child::kind(&());

        match self.still_not_owned(ctx, parent, &desired).await {
            Ok(Some(name)) => {
                debug!("{} {} is still not owned, not creating", kind, name);
                let err = Error::AlreadyExists {
                    kind: kind.to_string(),
                    name,
                };
                self.role
                    .reflect_child_status_on_parent(parent, None, Some(&err));
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                self.role.reflect_child_status_on_parent(parent, None, Some(&e));
                return Err(e);
            }
        }

        let meta = desired.meta_mut();
        meta.namespace.clone_from(&parent.meta().namespace);
        meta.owner_references = Some(vec![owner_reference(parent)]);

        metrics::increment_child_operations(&kind, "create");
        match ctx.client.create(&desired).await {
            Ok(created) => {
                info!("✨ Created {} {}", kind, display_key(&created));
                ctx.record(
                    parent,
                    EventType::Normal,
                    "Created",
                    &format!("Created {} \"{}\"", kind, created.name_any()),
                )
                .await;
                self.role
                    .reflect_child_status_on_parent(parent, Some(&created), None);
                Ok(())
            }
            Err(e) => {
                let name = desired.meta().name.clone().unwrap_or_default();
                warn!("Failed to create {} {:?}: {}", kind, name, e);
                ctx.record(
                    parent,
                    EventType::Warning,
                    "CreationFailed",
                    &format!("Failed to create {kind} \"{name}\": {e}"),
                )
                .await;
                self.role.reflect_child_status_on_parent(parent, None, Some(&e));
                if e.is_already_exists() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn update_child<P>(
        &self,
        ctx: &ReconcileContext,
        parent: &mut P,
        actual: R::Child,
        desired: &R::Child,
    ) -> Result<()>
    where
        P: ParentResource,
        R: ChildRole<P>,
    {
        if self.role.semantic_equals(desired, &actual) {
            self.role
                .reflect_child_status_on_parent(parent, Some(&actual), None);
            return Ok(());
        }

        let kind = R::Child::kind(&());
        let mut current = actual;
        self.role.merge_before_update(&mut current, desired);

        metrics::increment_child_operations(&kind, "update");
        match ctx.client.update(&current).await {
            Ok(updated) => {
                info!("📝 Updated {} {}", kind, display_key(&updated));
                ctx.record(
                    parent,
                    EventType::Normal,
                    "Updated",
                    &format!("Updated {} \"{}\"", kind, updated.name_any()),
                )
                .await;
                self.role
                    .reflect_child_status_on_parent(parent, Some(&updated), None);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to update {} {}: {}", kind, display_key(&current), e);
                ctx.record(
                    parent,
                    EventType::Warning,
                    "UpdateFailed",
                    &format!("Failed to update {} \"{}\": {}", kind, current.name_any(), e),
                )
                .await;
                self.role.reflect_child_status_on_parent(parent, None, Some(&e));
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<P, R> SubReconciler<P> for ChildReconciler<R>
where
    P: ParentResource,
    R: ChildRole<P>,
{
    fn name(&self) -> &str {
        self.role.name()
    }

    async fn reconcile(&self, ctx: &ReconcileContext, parent: &mut P, stash: &mut Stash) -> Result<()> {
        let desired = match self.role.desired_child(ctx, parent, stash).await {
            Ok(Desired::Unresolved) => {
                debug!("{}: dependencies not resolved, skipping", self.role.name());
                return Ok(());
            }
            Ok(desired) => desired,
            Err(e) => {
                self.role.reflect_child_status_on_parent(parent, None, Some(&e));
                return Err(e);
            }
        };

        let mut children = match self.list_children(ctx, parent).await {
            Ok(children) => children,
            Err(e) => {
                self.role.reflect_child_status_on_parent(parent, None, Some(&e));
                return Err(e);
            }
        };

        let keep = match desired {
            Desired::Child(_) => children.pop(),
            _ => None,
        };
        for extra in &children {
            if let Err(e) = self.delete_child(ctx, parent, extra).await {
                self.role.reflect_child_status_on_parent(parent, None, Some(&e));
                return Err(e);
            }
        }

        match (desired, keep) {
            (Desired::Child(mut desired), Some(actual)) => {
                let (key, value) = self.role.role_label(parent);
                desired.labels_mut().insert(key, value);
                self.update_child(ctx, parent, actual, &desired).await
            }
            (Desired::Child(mut desired), None) => {
                let (key, value) = self.role.role_label(parent);
                desired.labels_mut().insert(key, value);
                self.create_child(ctx, parent, desired).await
            }
            _ => {
                self.role.reflect_child_status_on_parent(parent, None, None);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{Container, ContainerSpec, IMAGE_RESOLVED};
    use crate::controller::client::ObjectKey;
    use crate::testing::{factories, FakeRecorder, FakeStore};
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    const LABEL: &str = "build.projectriff.io/container";

    /// Mirrors the container image into a ConfigMap
    struct ImageConfigMap {
        fixed_name: bool,
    }

    #[async_trait]
    impl ChildRole<Container> for ImageConfigMap {
        type Child = ConfigMap;

        fn name(&self) -> &str {
            "ImageConfigMap"
        }

        fn condition_type(&self) -> &'static str {
            IMAGE_RESOLVED
        }

        fn role_label(&self, parent: &Container) -> (String, String) {
            (LABEL.to_string(), parent.name_any())
        }

        async fn desired_child(
            &self,
            _ctx: &ReconcileContext,
            parent: &Container,
            _stash: &Stash,
        ) -> Result<Desired<ConfigMap>> {
            if parent.spec.image.is_empty() {
                return Ok(Desired::Absent);
            }
            if parent.spec.image == "unresolved" {
                return Ok(Desired::Unresolved);
            }
            let mut metadata = ObjectMeta::default();
            if self.fixed_name {
                metadata.name = Some(parent.name_any());
            } else {
                metadata.generate_name = Some(format!("{}-image-", parent.name_any()));
            }
            Ok(Desired::Child(ConfigMap {
                metadata,
                data: Some(BTreeMap::from([("image".to_string(), parent.spec.image.clone())])),
                ..Default::default()
            }))
        }

        fn merge_before_update(&self, current: &mut ConfigMap, desired: &ConfigMap) {
            current.metadata.labels.clone_from(&desired.metadata.labels);
            current.data.clone_from(&desired.data);
        }

        fn semantic_equals(&self, a: &ConfigMap, b: &ConfigMap) -> bool {
            a.data == b.data && a.metadata.labels == b.metadata.labels
        }

        fn reflect_child_status_on_parent(&self, parent: &mut Container, child: Option<&ConfigMap>, err: Option<&Error>) {
            if let Some(name) = err.and_then(Error::already_exists_name) {
                mark_not_owned::<ConfigMap, _>(parent, IMAGE_RESOLVED, name);
                return;
            }
            parent.status_mut().latest_image = child
                .and_then(|c| c.data.as_ref())
                .and_then(|d| d.get("image").cloned())
                .unwrap_or_default();
        }
    }

    fn parent(image: &str) -> Container {
        factories::container("default", "hello")
            .spec(ContainerSpec {
                image: image.to_string(),
            })
            .build()
    }

    fn children(store: &FakeStore) -> Vec<ConfigMap> {
        store.list_typed::<ConfigMap>(Some("default"))
    }

    async fn run(store: &FakeStore, recorder: &FakeRecorder, role: ImageConfigMap, parent: &mut Container) -> Result<()> {
        let ctx = store.context(recorder);
        let mut stash = Stash::default();
        ChildReconciler::new(role)
            .reconcile(&ctx, parent, &mut stash)
            .await
    }

    #[tokio::test]
    async fn test_creates_owned_child() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));

        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        let created = children(&store);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name_any(), "hello-image-001");
        assert!(is_controlled_by(&created[0], &container));
        assert_eq!(created[0].labels()[LABEL], "hello");
        assert_eq!(container.status.unwrap().latest_image, "example/hello");
        assert_eq!(recorder.messages(), vec![r#"Created ConfigMap "hello-image-001""#]);
    }

    #[tokio::test]
    async fn test_unchanged_child_is_left_alone() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));

        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();
        let actions = store.actions().len();
        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        assert_eq!(store.actions().len(), actions + 1, "only a list");
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_child_is_updated() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));
        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        container.spec.image = "example/hello:v2".to_string();
        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        let updated = children(&store);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].data.as_ref().unwrap()["image"], "example/hello:v2");
        assert_eq!(container.status.unwrap().latest_image, "example/hello:v2");
        assert_eq!(recorder.reasons(), vec!["Created", "Updated"]);
    }

    #[tokio::test]
    async fn test_absent_child_is_deleted() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));
        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        container.spec.image = String::new();
        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        assert!(children(&store).is_empty());
        assert_eq!(recorder.reasons(), vec!["Created", "Deleted"]);
        assert_eq!(container.status.unwrap().latest_image, "");
    }

    #[tokio::test]
    async fn test_unresolved_leaves_everything_untouched() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));
        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        container.spec.image = "unresolved".to_string();
        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        assert_eq!(children(&store).len(), 1);
        assert_eq!(container.status.unwrap().latest_image, "example/hello");
    }

    #[tokio::test]
    async fn test_extra_children_keep_newest() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));
        let owner = owner_reference(&container);
        for (name, created) in [("hello-image-a", "2024-01-01T00:00:00Z"), ("hello-image-b", "2024-02-01T00:00:00Z")] {
            store.seed(
                &factories::config_map("default", name)
                    .label(LABEL, "hello")
                    .owner(owner.clone())
                    .created_at(created)
                    .data("image", "example/hello")
                    .build(),
            );
        }

        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        let names: Vec<String> = children(&store).iter().map(ResourceExt::name_any).collect();
        assert_eq!(names, vec!["hello-image-b"]);
        assert_eq!(recorder.messages(), vec![r#"Deleted ConfigMap "hello-image-a""#]);
    }

    #[tokio::test]
    async fn test_children_of_other_parents_are_ignored() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));
        store.seed(
            &factories::config_map("default", "hello-image-foreign")
                .label(LABEL, "hello")
                .data("image", "example/other")
                .build(),
        );

        run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap();

        assert_eq!(children(&store).len(), 2);
        assert_eq!(recorder.reasons(), vec!["Created"]);
    }

    #[tokio::test]
    async fn test_already_exists_marks_not_owned_without_recreating() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));
        store.seed(&factories::config_map("default", "hello").data("image", "example/other").build());

        run(&store, &recorder, ImageConfigMap { fixed_name: true }, &mut container)
            .await
            .unwrap();

        let condition = container
            .conditions()
            .get_condition(IMAGE_RESOLVED)
            .cloned()
            .unwrap();
        assert!(condition.is_false());
        assert_eq!(condition.reason.as_deref(), Some(NOT_OWNED));
        assert_eq!(
            condition.message.as_deref(),
            Some(r#"There is an existing ConfigMap "hello" that the Container does not own."#)
        );
        assert_eq!(recorder.reasons(), vec!["CreationFailed"]);

        let creates = store
            .actions()
            .iter()
            .filter(|a| a.verb == "create")
            .count();
        run(&store, &recorder, ImageConfigMap { fixed_name: true }, &mut container)
            .await
            .unwrap();
        let creates_after = store
            .actions()
            .iter()
            .filter(|a| a.verb == "create")
            .count();
        assert_eq!(creates, creates_after, "no second create");
        assert_eq!(
            container.conditions().get_condition(IMAGE_RESOLVED),
            Some(&condition)
        );

        store.remove(&ObjectKey::of::<ConfigMap>(Some("default"), "hello"));
        run(&store, &recorder, ImageConfigMap { fixed_name: true }, &mut container)
            .await
            .unwrap();
        assert_eq!(recorder.reasons(), vec!["CreationFailed", "Created"]);
    }

    #[tokio::test]
    async fn test_create_failure_is_returned_and_reflected() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let mut container = store.seed(&parent("example/hello"));
        container.status_mut().latest_image = "stale".to_string();
        store.fail_on("create", "ConfigMap");

        let err = run(&store, &recorder, ImageConfigMap { fixed_name: false }, &mut container)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "inducing failure for create ConfigMap");
        assert_eq!(container.status.unwrap().latest_image, "");
        assert_eq!(
            recorder.messages(),
            vec![r#"Failed to create ConfigMap "": inducing failure for create ConfigMap"#]
        );
    }
}
