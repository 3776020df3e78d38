//! PulsarGateway: a Gateway fronting a Pulsar cluster.

use crate::apis::{
    Gateway, GatewaySpec, PulsarGateway, TypedLocalObjectReference, CONFIG_READY, GATEWAY_READY,
    PULSAR_GATEWAY_LABEL_KEY,
};
use crate::constants::{GATEWAY_IMAGE_KEY, PROVISIONER_IMAGE_KEY, PULSAR_GATEWAY_IMAGES_CONFIGMAP};
use crate::controller::diff::{merge_maps, semantic_equals};
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::{
    mark_not_owned, ChildReconciler, ChildRole, Desired, ParentReconciler, ParentResource, ReconcileContext,
    SubReconciler, SyncReconciler,
};
use crate::controller::stash::Stash;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodSpec, PodTemplateSpec, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

const GATEWAY_PORT: i32 = 6565;

pub fn pulsar_gateway_reconciler() -> ParentReconciler<PulsarGateway> {
    ParentReconciler::new(vec![
        sync_config(),
        Box::new(ChildReconciler::new(PulsarGatewayRole)),
    ])
}

/// Copies the gateway and provisioner images from the system ConfigMap
fn sync_config() -> Box<dyn SubReconciler<PulsarGateway>> {
    Box::new(SyncReconciler::<PulsarGateway>::new("SyncConfig", |ctx, parent, _stash| {
        Box::pin(async move {
            let namespace = ctx.system_namespace.as_str();
            ctx.track::<ConfigMap, _>(
                Some(namespace),
                PULSAR_GATEWAY_IMAGES_CONFIGMAP,
                &*parent,
            );
            let config = match ctx
                .client
                .get::<ConfigMap>(Some(namespace), PULSAR_GATEWAY_IMAGES_CONFIGMAP)
                .await
            {
                Ok(config) => config,
                Err(e) => {
                    let reason = if e.is_not_found() { "ConfigMissing" } else { "ConfigInvalid" };
                    parent.conditions().mark_false(CONFIG_READY, reason, &e.to_string());
                    return Err(e);
                }
            };
            let data = config.data.unwrap_or_default();
            let status = parent.status_mut();
            status.gateway_image = data.get(GATEWAY_IMAGE_KEY).cloned().unwrap_or_default();
            status.provisioner_image = data.get(PROVISIONER_IMAGE_KEY).cloned().unwrap_or_default();
            parent.conditions().mark_true(CONFIG_READY);
            Ok(())
        })
    }))
}

/// Gateway named after its PulsarGateway
#[derive(Debug, Default)]
pub struct PulsarGatewayRole;

#[async_trait]
impl ChildRole<PulsarGateway> for PulsarGatewayRole {
    type Child = Gateway;

    fn name(&self) -> &str {
        "ChildGateway"
    }

    fn condition_type(&self) -> &'static str {
        GATEWAY_READY
    }

    fn role_label(&self, parent: &PulsarGateway) -> (String, String) {
        (PULSAR_GATEWAY_LABEL_KEY.to_string(), parent.name_any())
    }

    async fn desired_child(
        &self,
        _ctx: &ReconcileContext,
        parent: &PulsarGateway,
        _stash: &Stash,
    ) -> Result<Desired<Gateway>> {
        let (key, value) = self.role_label(parent);
        let labels = merge_maps(parent.meta().labels.as_ref(), Some(&BTreeMap::from([(key, value)])));
        let template = parent
            .status()
            .and_then(|s| s.address.as_ref())
            .map(|address| gateway_template(parent, address.hostname(), &labels));

        Ok(Desired::Child(Gateway {
            metadata: ObjectMeta {
                name: Some(parent.name_any()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: GatewaySpec {
                template,
                ports: vec![
                    ServicePort {
                        name: Some("gateway".to_string()),
                        port: GATEWAY_PORT,
                        ..Default::default()
                    },
                    ServicePort {
                        name: Some("provisioner".to_string()),
                        port: 80,
                        target_port: Some(IntOrString::Int(8080)),
                        ..Default::default()
                    },
                ],
            },
            status: None,
        }))
    }

    fn merge_before_update(&self, current: &mut Gateway, desired: &Gateway) {
        current.metadata.labels.clone_from(&desired.metadata.labels);
        current.spec = desired.spec.clone();
    }

    fn semantic_equals(&self, a: &Gateway, b: &Gateway) -> bool {
        semantic_equals(&a.metadata.labels, &b.metadata.labels) && semantic_equals(&a.spec, &b.spec)
    }

    fn reflect_child_status_on_parent(
        &self,
        parent: &mut PulsarGateway,
        child: Option<&Gateway>,
        err: Option<&Error>,
    ) {
        if let Some(err) = err {
            if let Some(name) = err.already_exists_name() {
                mark_not_owned::<Gateway, PulsarGateway>(parent, GATEWAY_READY, name);
            }
            return;
        }
        let Some(gateway) = child else {
            parent.status_mut().gateway_ref = None;
            return;
        };
        let status = parent.status_mut();
        status.gateway_ref = Some(TypedLocalObjectReference::for_object(gateway));
        status.address = gateway.status.as_ref().and_then(|s| s.address.clone());
        parent
            .conditions()
            .propagate(GATEWAY_READY, gateway.ready_condition());
    }
}

fn gateway_template(parent: &PulsarGateway, host: &str, labels: &BTreeMap<String, String>) -> PodTemplateSpec {
    let service_url = parent.spec.service_url.as_str();
    let status = parent.status().cloned().unwrap_or_default();
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![
                Container {
                    name: "gateway".to_string(),
                    image: Some(status.gateway_image),
                    env: Some(env(&[
                        ("pulsar_serviceUrl", service_url),
                        ("storage_positions_type", "MEMORY"),
                        ("storage_records_type", "PULSAR"),
                        ("server_port", "8000"),
                    ])),
                    ..Default::default()
                },
                Container {
                    name: "provisioner".to_string(),
                    image: Some(status.provisioner_image),
                    env: Some(env(&[
                        ("GATEWAY", &format!("{host}:{GATEWAY_PORT}")),
                        ("BROKER", service_url),
                    ])),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }),
    }
}

fn env(vars: &[(&str, &str)]) -> Vec<EnvVar> {
    vars.iter()
        .map(|(name, value)| EnvVar {
            name: (*name).to_string(),
            value: Some((*value).to_string()),
            value_from: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{Addressable, READY};
    use crate::controller::reconciler::NOT_OWNED;
    use crate::testing::{factories, FakeRecorder, FakeStore};

    const NAME: &str = "my-pulsar";
    const SERVICE_URL: &str = "pulsar://pulsar.default.svc.cluster.local:6650";

    fn seed_config(store: &FakeStore) {
        store.seed(
            &factories::config_map("riff-system", PULSAR_GATEWAY_IMAGES_CONFIGMAP)
                .data(GATEWAY_IMAGE_KEY, "projectriff/liiklus@sha256:1")
                .data(PROVISIONER_IMAGE_KEY, "projectriff/pulsar-provisioner@sha256:2")
                .build(),
        );
    }

    #[tokio::test]
    async fn test_creates_gateway_without_template() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        seed_config(&store);
        store.seed(&factories::pulsar_gateway("default", NAME).service_url(SERVICE_URL).build());
        let ctx = store.context(&recorder);

        pulsar_gateway_reconciler()
            .reconcile(&ctx, Some("default"), NAME)
            .await
            .unwrap();

        let gateway: Gateway = store.get_typed(Some("default"), NAME).unwrap();
        assert_eq!(gateway.labels()[PULSAR_GATEWAY_LABEL_KEY], NAME);
        assert_eq!(gateway.spec.template, None);
        let ports: Vec<(Option<&str>, i32)> = gateway
            .spec
            .ports
            .iter()
            .map(|p| (p.name.as_deref(), p.port))
            .collect();
        assert_eq!(ports, vec![(Some("gateway"), 6565), (Some("provisioner"), 80)]);
        assert_eq!(gateway.spec.ports[1].target_port, Some(IntOrString::Int(8080)));

        let mut stored: PulsarGateway = store.get_typed(Some("default"), NAME).unwrap();
        assert!(stored.conditions().get_condition(CONFIG_READY).unwrap().is_true());
        let status = stored.status.unwrap();
        assert_eq!(status.gateway_image, "projectriff/liiklus@sha256:1");
        assert_eq!(status.gateway_ref.map(|r| r.name), Some(NAME.to_string()));
    }

    #[tokio::test]
    async fn test_template_follows_address() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        seed_config(&store);
        let parent = store.seed(&factories::pulsar_gateway("default", NAME).service_url(SERVICE_URL).build());
        store.seed(
            &factories::gateway("default", NAME)
                .owned_by(&parent)
                .label(PULSAR_GATEWAY_LABEL_KEY, NAME)
                .address("http://my-pulsar-gateway.default.svc.cluster.local:6565")
                .ready()
                .build(),
        );
        let ctx = store.context(&recorder);

        // first pass learns the address, second renders the template
        for _ in 0..2 {
            pulsar_gateway_reconciler()
                .reconcile(&ctx, Some("default"), NAME)
                .await
                .unwrap();
        }

        let gateway: Gateway = store.get_typed(Some("default"), NAME).unwrap();
        let pod = gateway.spec.template.unwrap().spec.unwrap();
        let provisioner = &pod.containers[1];
        let env: Vec<(&str, &str)> = provisioner
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(
            env,
            vec![
                ("GATEWAY", "my-pulsar-gateway.default.svc.cluster.local:6565"),
                ("BROKER", SERVICE_URL),
            ]
        );
        assert_eq!(pod.containers[0].name, "gateway");
        assert_eq!(pod.containers[0].env.as_ref().unwrap().len(), 4);

        let mut stored: PulsarGateway = store.get_typed(Some("default"), NAME).unwrap();
        assert!(stored.conditions().is_happy());
        assert_eq!(
            stored.status.unwrap().address,
            Some(Addressable {
                url: "http://my-pulsar-gateway.default.svc.cluster.local:6565".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_missing_config() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        store.seed(&factories::pulsar_gateway("default", NAME).service_url(SERVICE_URL).build());
        let ctx = store.context(&recorder);

        pulsar_gateway_reconciler()
            .reconcile(&ctx, Some("default"), NAME)
            .await
            .unwrap_err();

        let mut stored: PulsarGateway = store.get_typed(Some("default"), NAME).unwrap();
        let config = stored.conditions().get_condition(CONFIG_READY).cloned().unwrap();
        assert!(config.is_false());
        assert_eq!(config.reason.as_deref(), Some("ConfigMissing"));
        assert!(stored.conditions().get_condition(READY).unwrap().is_false());
    }

    #[tokio::test]
    async fn test_existing_gateway_not_owned() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        seed_config(&store);
        store.seed(&factories::pulsar_gateway("default", NAME).service_url(SERVICE_URL).build());
        store.seed(&factories::gateway("default", NAME).build());
        let ctx = store.context(&recorder);

        for _ in 0..2 {
            pulsar_gateway_reconciler()
                .reconcile(&ctx, Some("default"), NAME)
                .await
                .unwrap();
        }

        let mut stored: PulsarGateway = store.get_typed(Some("default"), NAME).unwrap();
        let gateway_ready = stored.conditions().get_condition(GATEWAY_READY).cloned().unwrap();
        assert!(gateway_ready.is_false());
        assert_eq!(gateway_ready.reason.as_deref(), Some(NOT_OWNED));
        assert_eq!(
            gateway_ready.message.as_deref(),
            Some(r#"There is an existing Gateway "my-pulsar" that the PulsarGateway does not own."#)
        );
        let creates = store
            .actions()
            .iter()
            .filter(|a| a.verb == "create" && a.kind == "Gateway")
            .count();
        assert_eq!(creates, 1, "collision is not retried");
    }
}
