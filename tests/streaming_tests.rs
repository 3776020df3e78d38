//! Streaming reconcile scenarios, including refreshes driven by tracked objects

mod common;

use common::{Harness, NAMESPACE, SYSTEM_NAMESPACE};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use riff_system_controller::apis::{
    Gateway, GatewayStatus, Processor, PulsarGateway, ScaledObject, Stream, DEPLOYMENT_READY, EARLIEST, GATEWAY_READY,
    LATEST,
};
use riff_system_controller::constants::{
    GATEWAY_IMAGE_KEY, PROCESSOR_IMAGES_CONFIGMAP, PROVISIONER_IMAGE_KEY, PULSAR_GATEWAY_IMAGES_CONFIGMAP,
};
use riff_system_controller::controller::client::ObjectKey;
use riff_system_controller::controller::reconciler::{ParentResource, NOT_OWNED};
use riff_system_controller::controller::streaming::{processor_reconciler, pulsar_gateway_reconciler};
use riff_system_controller::testing::factories;

const FUNCTION_IMAGE: &str = "registry.example.com/team/square@sha256:f00d";
const SIDECAR_V1: &str = "projectriff/streaming-processor@sha256:1";
const SIDECAR_V2: &str = "projectriff/streaming-processor@sha256:2";

fn seed_processor(h: &Harness) -> Processor {
    h.seed_stream("numbers", "00000000-0000-0000-0000-000000000001");
    h.seed_stream("letters", "00000000-0000-0000-0000-000000000002");
    h.seed_stream("squares", "00000000-0000-0000-0000-000000000003");
    h.store.seed(
        &factories::processor(NAMESPACE, "square")
            .image(FUNCTION_IMAGE)
            .input("numbers", "in", EARLIEST)
            .input("letters", "extra", LATEST)
            .output("squares", "out")
            .build(),
    )
}

fn sidecar_image(h: &Harness, name: &str) -> Option<String> {
    let deployment: Deployment = h.store.get_typed(Some(NAMESPACE), name)?;
    deployment.spec?.template.spec?.containers.get(1)?.image.clone()
}

#[tokio::test]
async fn test_processor_runs_and_scales_on_its_inputs() {
    let h = Harness::new();
    h.seed_processor_image(SIDECAR_V1);
    seed_processor(&h);
    let reconciler = processor_reconciler();

    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "square").await.unwrap();

    assert_eq!(
        h.recorder.messages(),
        vec![
            r#"Created Deployment "square-processor-001""#,
            r#"Created ScaledObject "square-processor-002""#,
            "Updated status",
        ]
    );
    let deployment: Deployment = h.store.get_typed(Some(NAMESPACE), "square-processor-001").unwrap();
    let pod = deployment.spec.clone().unwrap().template.spec.unwrap();
    assert_eq!(pod.containers[0].image.as_deref(), Some(FUNCTION_IMAGE));
    let env: Vec<(String, String)> = pod.containers[1]
        .env
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|e| (e.name, e.value.unwrap_or_default()))
        .collect();
    assert_eq!(env[1], ("INPUT_START_OFFSETS".to_string(), "earliest,latest".to_string()));
    assert_eq!(env[2], ("INPUT_NAMES".to_string(), "in,extra".to_string()));
    assert_eq!(env[3], ("OUTPUT_NAMES".to_string(), "out".to_string()));
    assert_eq!(pod.volumes.unwrap().len(), 6);

    let scaled: ScaledObject = h.store.get_typed(Some(NAMESPACE), "square-processor-002").unwrap();
    assert_eq!(scaled.spec.scale_target_ref.deployment_name, "square-processor-001");
    let topics: Vec<&str> = scaled
        .spec
        .triggers
        .iter()
        .map(|t| t.metadata["topic"].as_str())
        .collect();
    assert_eq!(topics, vec!["default/numbers", "default/letters"]);

    let mut deployment = deployment;
    deployment.status = Some(factories::available_deployment_status());
    h.store.replace(&deployment);
    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "square").await.unwrap();

    let mut processor: Processor = h.store.get_typed(Some(NAMESPACE), "square").unwrap();
    assert!(processor.conditions().get_condition(DEPLOYMENT_READY).unwrap().is_true());
    assert!(processor.conditions().is_happy());
    let status = processor.status.unwrap();
    assert_eq!(status.latest_image, FUNCTION_IMAGE);
    assert_eq!(status.deployment_ref.map(|r| r.name), Some("square-processor-001".to_string()));
    assert_eq!(status.scaled_object_ref.map(|r| r.name), Some("square-processor-002".to_string()));
    assert_eq!(h.actions("create", "Deployment").len(), 1);
    assert_eq!(h.actions("create", "ScaledObject").len(), 1);
}

#[tokio::test]
async fn test_processor_image_change_reaches_the_sidecar() {
    let h = Harness::new();
    h.seed_processor_image(SIDECAR_V1);
    let processor = seed_processor(&h);
    let reconciler = processor_reconciler();
    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "square").await.unwrap();
    assert_eq!(sidecar_image(&h, "square-processor-001").as_deref(), Some(SIDECAR_V1));

    h.seed_processor_image(SIDECAR_V2);
    let changed = ObjectKey::of::<ConfigMap>(Some(SYSTEM_NAMESPACE), PROCESSOR_IMAGES_CONFIGMAP);
    let parents = h.ctx.tracker.lookup(&changed);
    assert_eq!(parents, vec![ObjectKey::for_object(&processor)]);
    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "square").await.unwrap();

    assert_eq!(sidecar_image(&h, "square-processor-001").as_deref(), Some(SIDECAR_V2));
    assert!(h
        .recorder
        .messages()
        .contains(&r#"Updated Deployment "square-processor-001""#.to_string()));
    assert_eq!(h.actions("create", "Deployment").len(), 1);
}

#[tokio::test]
async fn test_streams_are_tracked_for_their_processor() {
    let h = Harness::new();
    h.seed_processor_image(SIDECAR_V1);
    let processor = seed_processor(&h);

    processor_reconciler()
        .reconcile(&h.ctx, Some(NAMESPACE), "square")
        .await
        .unwrap();

    for name in ["numbers", "letters", "squares"] {
        let stream = ObjectKey::of::<Stream>(Some(NAMESPACE), name);
        assert_eq!(h.ctx.tracker.lookup(&stream), vec![ObjectKey::for_object(&processor)]);
    }
    let unrelated = ObjectKey::of::<Stream>(Some(NAMESPACE), "other");
    assert!(h.ctx.tracker.lookup(&unrelated).is_empty());
}

#[tokio::test]
async fn test_missing_processor_images_is_reported() {
    let h = Harness::new();
    seed_processor(&h);
    let reconciler = processor_reconciler();

    reconciler
        .reconcile(&h.ctx, Some(NAMESPACE), "square")
        .await
        .unwrap_err();
    assert!(h.store.list_typed::<Deployment>(Some(NAMESPACE)).is_empty());

    h.seed_processor_image(SIDECAR_V1);
    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "square").await.unwrap();
    assert_eq!(sidecar_image(&h, "square-processor-001").as_deref(), Some(SIDECAR_V1));
}

#[tokio::test]
async fn test_pulsar_gateway_config_change_is_picked_up() {
    let h = Harness::new();
    let seed_config = |gateway_image: &str| {
        h.store.seed(
            &factories::config_map(SYSTEM_NAMESPACE, PULSAR_GATEWAY_IMAGES_CONFIGMAP)
                .data(GATEWAY_IMAGE_KEY, gateway_image)
                .data(PROVISIONER_IMAGE_KEY, "projectriff/pulsar-provisioner@sha256:1")
                .build(),
        );
    };
    seed_config("projectriff/liiklus@sha256:1");
    let parent = h.store.seed(
        &factories::pulsar_gateway(NAMESPACE, "pulsar")
            .service_url("pulsar://pulsar.default.svc.cluster.local:6650")
            .build(),
    );
    let reconciler = pulsar_gateway_reconciler();
    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "pulsar").await.unwrap();

    seed_config("projectriff/liiklus@sha256:2");
    let changed = ObjectKey::of::<ConfigMap>(Some(SYSTEM_NAMESPACE), PULSAR_GATEWAY_IMAGES_CONFIGMAP);
    assert_eq!(h.ctx.tracker.lookup(&changed), vec![ObjectKey::for_object(&parent)]);
    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "pulsar").await.unwrap();

    let stored: PulsarGateway = h.store.get_typed(Some(NAMESPACE), "pulsar").unwrap();
    assert_eq!(stored.status.unwrap().gateway_image, "projectriff/liiklus@sha256:2");
}

#[tokio::test]
async fn test_pulsar_gateway_collision_is_not_retried() {
    let h = Harness::new();
    h.store.seed(
        &factories::config_map(SYSTEM_NAMESPACE, PULSAR_GATEWAY_IMAGES_CONFIGMAP)
            .data(GATEWAY_IMAGE_KEY, "projectriff/liiklus@sha256:1")
            .data(PROVISIONER_IMAGE_KEY, "projectriff/pulsar-provisioner@sha256:1")
            .build(),
    );
    h.store.seed(
        &factories::pulsar_gateway(NAMESPACE, "pulsar")
            .service_url("pulsar://pulsar.default.svc.cluster.local:6650")
            .build(),
    );
    h.store.seed(&factories::gateway(NAMESPACE, "pulsar").build());
    let reconciler = pulsar_gateway_reconciler();

    for _ in 0..3 {
        reconciler.reconcile(&h.ctx, Some(NAMESPACE), "pulsar").await.unwrap();
    }

    let mut stored: PulsarGateway = h.store.get_typed(Some(NAMESPACE), "pulsar").unwrap();
    let gateway_ready = stored.conditions().get_condition(GATEWAY_READY).cloned().unwrap();
    assert_eq!(gateway_ready.reason.as_deref(), Some(NOT_OWNED));
    assert_eq!(h.actions("create", "Gateway").len(), 1);
}

#[tokio::test]
async fn test_pulsar_gateway_forgets_a_withdrawn_address() {
    let h = Harness::new();
    h.store.seed(
        &factories::config_map(SYSTEM_NAMESPACE, PULSAR_GATEWAY_IMAGES_CONFIGMAP)
            .data(GATEWAY_IMAGE_KEY, "projectriff/liiklus@sha256:1")
            .data(PROVISIONER_IMAGE_KEY, "projectriff/pulsar-provisioner@sha256:1")
            .build(),
    );
    h.store.seed(
        &factories::pulsar_gateway(NAMESPACE, "pulsar")
            .service_url("pulsar://pulsar.default.svc.cluster.local:6650")
            .build(),
    );
    let reconciler = pulsar_gateway_reconciler();
    let set_gateway_status = |gateway_status: Option<GatewayStatus>| {
        let mut gateway: Gateway = h.store.get_typed(Some(NAMESPACE), "pulsar").unwrap();
        gateway.status = gateway_status;
        h.store.replace(&gateway);
    };
    let template = |h: &Harness| {
        h.store
            .get_typed::<Gateway>(Some(NAMESPACE), "pulsar")
            .and_then(|g| g.spec.template)
    };

    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "pulsar").await.unwrap();
    assert!(template(&h).is_none());
    set_gateway_status(
        factories::gateway(NAMESPACE, "pulsar")
            .address("http://pulsar-gateway.default.svc.cluster.local")
            .ready()
            .build()
            .status,
    );
    for _ in 0..2 {
        reconciler.reconcile(&h.ctx, Some(NAMESPACE), "pulsar").await.unwrap();
    }
    assert!(template(&h).is_some());

    set_gateway_status(factories::gateway(NAMESPACE, "pulsar").ready().build().status);
    for _ in 0..2 {
        reconciler.reconcile(&h.ctx, Some(NAMESPACE), "pulsar").await.unwrap();
    }

    let stored: PulsarGateway = h.store.get_typed(Some(NAMESPACE), "pulsar").unwrap();
    assert_eq!(stored.status.unwrap().address, None);
    assert!(template(&h).is_none());

    let status_writes = h.actions("update_status", "PulsarGateway").len();
    reconciler.reconcile(&h.ctx, Some(NAMESPACE), "pulsar").await.unwrap();
    assert_eq!(h.actions("update_status", "PulsarGateway").len(), status_writes);
}

