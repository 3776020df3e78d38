//! Objects go through admission before the reconcilers see them

mod common;

use common::{Harness, NAMESPACE};
use riff_system_controller::apis::{Function, Image};
use riff_system_controller::controller::build::function_reconciler;
use riff_system_controller::controller::Error;
use riff_system_controller::validation::{AdmissionRegistry, DEFAULT_GIT_REVISION};
use serde_json::{json, Value};

fn admit(registry: &AdmissionRegistry, kind: &str, mut obj: Value) -> Result<Value, Error> {
    registry.apply_defaults(kind, &mut obj)?;
    registry.validate(kind, &obj)?;
    Ok(obj)
}

#[tokio::test]
async fn test_defaulted_revision_reaches_the_kpack_image() {
    let registry = AdmissionRegistry::riff();
    let admitted = admit(
        &registry,
        "Function",
        json!({
            "apiVersion": "build.projectriff.io/v1alpha1",
            "kind": "Function",
            "metadata": {"name": "square", "namespace": NAMESPACE},
            "spec": {
                "image": "registry.example.com/team/square",
                "source": {"git": {"url": "https://github.com/projectriff-samples/node-square"}}
            }
        }),
    )
    .unwrap();
    let function: Function = serde_json::from_value(admitted).unwrap();

    let h = Harness::new();
    h.store.seed(&function);
    function_reconciler()
        .reconcile(&h.ctx, Some(NAMESPACE), "square")
        .await
        .unwrap();

    let images = h.store.list_typed::<Image>(Some(NAMESPACE));
    assert_eq!(images.len(), 1);
    let git = images[0].spec.source.git.clone().unwrap();
    assert_eq!(git.revision, DEFAULT_GIT_REVISION);
}

#[test]
fn test_rejects_processor_with_reused_aliases() {
    let registry = AdmissionRegistry::riff();
    let err = admit(
        &registry,
        "Processor",
        json!({
            "apiVersion": "streaming.projectriff.io/v1alpha1",
            "kind": "Processor",
            "metadata": {"name": "square", "namespace": NAMESPACE},
            "spec": {
                "inputs": [
                    {"stream": "numbers", "alias": "in"},
                    {"stream": "letters", "alias": "in", "startOffset": "middle"}
                ],
                "template": {"spec": {"containers": [{"image": "example/square"}]}}
            }
        }),
    )
    .unwrap_err();

    let Error::Invalid(errs) = err else {
        panic!("expected field errors, got {err:?}");
    };
    let reported: Vec<(String, Vec<String>)> = errs.iter().map(|e| (e.message.clone(), e.paths.clone())).collect();
    assert_eq!(
        reported,
        vec![
            (
                "invalid value: middle".to_string(),
                vec!["spec.inputs[1].startOffset".to_string()]
            ),
            (
                "duplicate value: in".to_string(),
                vec!["spec.inputs[0].alias".to_string(), "spec.inputs[1].alias".to_string()]
            ),
        ]
    );
}

#[test]
fn test_local_function_must_not_set_cache_size() {
    let registry = AdmissionRegistry::riff();
    let err = admit(
        &registry,
        "Function",
        json!({
            "apiVersion": "build.projectriff.io/v1alpha1",
            "kind": "Function",
            "metadata": {"name": "square", "namespace": NAMESPACE},
            "spec": {"image": "registry.example.com/team/square", "cacheSize": "1Gi"}
        }),
    )
    .unwrap_err();

    assert!(err.to_string().contains("spec.cacheSize"), "{err}");
}

#[test]
fn test_deployer_needs_exactly_one_image_source() {
    let registry = AdmissionRegistry::riff();
    let deployer = |spec: Value| {
        json!({
            "apiVersion": "knative.projectriff.io/v1alpha1",
            "kind": "Deployer",
            "metadata": {"name": "square", "namespace": NAMESPACE},
            "spec": spec
        })
    };

    let both = admit(
        &registry,
        "Deployer",
        deployer(json!({
            "build": {"functionRef": "square"},
            "template": {"containers": [{"image": "registry.example.com/team/square"}]}
        })),
    )
    .unwrap_err();
    assert!(both.to_string().contains("expected exactly one, got both"), "{both}");

    let neither = admit(&registry, "Deployer", deployer(json!({"template": {"containers": []}}))).unwrap_err();
    assert!(neither.to_string().contains("expected exactly one, got neither"), "{neither}");

    admit(&registry, "Deployer", deployer(json!({"build": {"applicationRef": "petclinic"}}))).unwrap();
}

#[test]
fn test_kafka_provider_needs_bootstrap_servers() {
    let registry = AdmissionRegistry::riff();
    let provider = |spec: Value| {
        json!({
            "apiVersion": "streaming.projectriff.io/v1alpha1",
            "kind": "KafkaProvider",
            "metadata": {"name": "kafka", "namespace": NAMESPACE},
            "spec": spec
        })
    };

    let err = admit(&registry, "KafkaProvider", provider(json!({}))).unwrap_err();
    assert!(err.to_string().ends_with("missing field(s): spec"), "{err}");
    admit(
        &registry,
        "KafkaProvider",
        provider(json!({"bootstrapServers": "kafka.kafka.svc.cluster.local:9092"})),
    )
    .unwrap();
}
