//! Publishes kpack ClusterBuilder images into the `builders` ConfigMap.

use crate::apis::ClusterBuilder;
use crate::constants::BUILDERS_CONFIGMAP;
use crate::controller::diff::semantic_equals;
use crate::controller::error::Result;
use crate::controller::reconciler::{KeyReconciler, ReconcileContext};
use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Keeps `<system namespace>/builders` mapping builder names to their latest images
///
/// Builders that are not Ready map to an empty string.
#[derive(Debug, Default)]
pub struct ClusterBuilderReconciler;

impl ClusterBuilderReconciler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KeyReconciler for ClusterBuilderReconciler {
    fn name(&self) -> &str {
        "ClusterBuilder"
    }

    async fn reconcile(&self, ctx: &ReconcileContext, namespace: Option<&str>, name: &str) -> Result<()> {
        if namespace != Some(ctx.system_namespace.as_str()) || name != BUILDERS_CONFIGMAP {
            debug!("Ignoring ConfigMap {}/{}", namespace.unwrap_or_default(), name);
            return Ok(());
        }

        let existing = match ctx.client.get::<ConfigMap>(namespace, name).await {
            Ok(config) => Some(config),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        if existing
            .as_ref()
            .is_some_and(|c| c.metadata.deletion_timestamp.is_some())
        {
            debug!("{} is being deleted, skipping", name);
            return Ok(());
        }

        let builders = ctx
            .client
            .list::<ClusterBuilder>(None, &BTreeMap::new())
            .await?;
        let data: BTreeMap<String, String> = builders
            .iter()
            .map(|b| (b.name_any(), b.ready_image().to_string()))
            .collect();

        match existing {
            None => {
                let config = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: namespace.map(str::to_string),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                metrics::increment_child_operations("ConfigMap", "create");
                ctx.client.create(&config).await?;
                info!("✨ Created {}/{} with {} builders", ctx.system_namespace, name, builders.len());
            }
            Some(mut config) => {
                let desired = Some(data);
                if semantic_equals(&config.data, &desired) {
                    debug!("{} is up to date", name);
                    return Ok(());
                }
                config.data = desired;
                metrics::increment_child_operations("ConfigMap", "update");
                ctx.client.update(&config).await?;
                info!("📝 Updated {}/{}", ctx.system_namespace, name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{factories, FakeRecorder, FakeStore};

    const FUNCTION_TAG: &str = "projectriff/builder:function";
    const APPLICATION_TAG: &str = "projectriff/builder:application";

    fn builders(store: &FakeStore) -> Option<BTreeMap<String, String>> {
        store
            .get_typed::<ConfigMap>(Some("riff-system"), "builders")
            .map(|c| c.data.unwrap_or_default())
    }

    async fn run(store: &FakeStore, namespace: &str, name: &str) -> Result<()> {
        let recorder = FakeRecorder::new();
        let ctx = store.context(&recorder);
        ClusterBuilderReconciler::new()
            .reconcile(&ctx, Some(namespace), name)
            .await
    }

    #[tokio::test]
    async fn test_creates_configmap_when_missing() {
        let store = FakeStore::new();
        store.seed(&factories::cluster_builder("riff-application").tag(APPLICATION_TAG).build());
        store.seed(
            &factories::cluster_builder("riff-function")
                .tag(FUNCTION_TAG)
                .ready(FUNCTION_TAG)
                .build(),
        );

        run(&store, "riff-system", "builders").await.unwrap();

        assert_eq!(
            builders(&store),
            Some(BTreeMap::from([
                ("riff-application".to_string(), String::new()),
                ("riff-function".to_string(), FUNCTION_TAG.to_string()),
            ]))
        );
    }

    #[tokio::test]
    async fn test_unchanged_configmap_is_not_updated() {
        let store = FakeStore::new();
        store.seed(&factories::config_map("riff-system", "builders").build());

        run(&store, "riff-system", "builders").await.unwrap();

        assert!(store.actions().iter().all(|a| a.verb != "update"));
    }

    #[tokio::test]
    async fn test_updates_changed_configmap() {
        let store = FakeStore::new();
        store.seed(
            &factories::config_map("riff-system", "builders")
                .data("riff-function", "stale")
                .build(),
        );
        store.seed(
            &factories::cluster_builder("riff-function")
                .tag(FUNCTION_TAG)
                .ready(FUNCTION_TAG)
                .build(),
        );

        run(&store, "riff-system", "builders").await.unwrap();

        assert_eq!(
            builders(&store),
            Some(BTreeMap::from([("riff-function".to_string(), FUNCTION_TAG.to_string())]))
        );
    }

    #[tokio::test]
    async fn test_ignores_other_keys_and_deleted_configmap() {
        let store = FakeStore::new();
        store.seed(&factories::cluster_builder("riff-function").tag(FUNCTION_TAG).build());

        run(&store, "riff-system", "not-builders").await.unwrap();
        run(&store, "not-riff-system", "builders").await.unwrap();
        assert!(store.actions().is_empty());

        store.seed(&factories::config_map("riff-system", "builders").deleted().build());
        run(&store, "riff-system", "builders").await.unwrap();
        assert!(store.actions().iter().all(|a| a.verb == "get"));
    }

    #[tokio::test]
    async fn test_errors_are_returned() {
        for (verb, kind, seeded) in [
            ("get", "ConfigMap", false),
            ("list", "ClusterBuilder", false),
            ("create", "ConfigMap", false),
            ("update", "ConfigMap", true),
        ] {
            let store = FakeStore::new();
            store.seed(&factories::cluster_builder("riff-function").tag(FUNCTION_TAG).build());
            if seeded {
                store.seed(&factories::config_map("riff-system", "builders").build());
            }
            store.fail_on(verb, kind);

            let err = run(&store, "riff-system", "builders").await.unwrap_err();
            assert_eq!(err.to_string(), format!("inducing failure for {verb} {kind}"));
        }
    }
}
