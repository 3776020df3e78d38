//! Processor: a function Deployment with a stream sidecar, scaled by KEDA.
//!
//! Steps, in order:
//!
//! 1. `SyncProcessorImages` stashes the processor images ConfigMap
//! 2. `ResolveStreams` stashes the input and output Streams
//! 3. `LatestImage` copies the function image into status
//! 4. `ChildDeployment` converges the Deployment
//! 5. `ChildScaledObject` converges the KEDA ScaledObject targeting it

use crate::apis::condition::{find_condition, Condition, ConditionStatus};
use crate::apis::{
    Processor, ScaleTarget, ScaleTrigger, ScaledObject, ScaledObjectSpec, Stream, TypedLocalObjectReference,
    DEPLOYMENT_READY, LIIKLUS_TRIGGER, PROCESSOR_LABEL_KEY, SCALED_OBJECT_READY, STREAMS_READY,
};
use crate::constants::{PROCESSOR_IMAGES_CONFIGMAP, PROCESSOR_IMAGE_KEY};
use crate::controller::diff::{merge_maps, semantic_equals};
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::{
    mark_not_owned, ChildReconciler, ChildRole, Desired, ParentReconciler, ParentResource, ReconcileContext,
    SubReconciler, SyncReconciler,
};
use crate::controller::stash::{Stash, StashKey};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container as PodContainer, ContainerPort, EnvVar, PodTemplateSpec, Secret,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;

/// Data of the processor images ConfigMap
pub const PROCESSOR_IMAGES: StashKey<BTreeMap<String, String>> = StashKey::new("processor-images");
/// Streams bound as inputs, in declaration order
pub const INPUT_STREAMS: StashKey<Vec<Stream>> = StashKey::new("input-streams");
/// Streams bound as outputs, in declaration order
pub const OUTPUT_STREAMS: StashKey<Vec<Stream>> = StashKey::new("output-streams");

const FUNCTION_CONTAINER: &str = "function";
const PROCESSOR_CONTAINER: &str = "processor";
const FUNCTION_PORT: i32 = 8081;
const BINDINGS_ROOT: &str = "/var/riff/bindings";

const POLLING_INTERVAL: i32 = 1;
const COOLDOWN_PERIOD: i32 = 30;
const MIN_REPLICAS: i32 = 1;
const MAX_REPLICAS: i32 = 30;

pub fn processor_reconciler() -> ParentReconciler<Processor> {
    ParentReconciler::new(vec![
        sync_processor_images(),
        resolve_streams(),
        latest_image(),
        Box::new(ChildReconciler::new(ProcessorDeploymentRole)),
        Box::new(ChildReconciler::new(ProcessorScaledObjectRole)),
    ])
}

fn sync_processor_images() -> Box<dyn SubReconciler<Processor>> {
    Box::new(SyncReconciler::<Processor>::new("SyncProcessorImages", |ctx, parent, stash| {
        Box::pin(async move {
            let namespace = ctx.system_namespace.as_str();
            ctx.track::<ConfigMap, _>(Some(namespace), PROCESSOR_IMAGES_CONFIGMAP, &*parent);
            let config = ctx
                .client
                .get::<ConfigMap>(Some(namespace), PROCESSOR_IMAGES_CONFIGMAP)
                .await?;
            stash.store(&PROCESSOR_IMAGES, config.data.unwrap_or_default());
            Ok(())
        })
    }))
}

fn resolve_streams() -> Box<dyn SubReconciler<Processor>> {
    Box::new(SyncReconciler::<Processor>::new("ResolveStreams", |ctx, parent, stash| {
        Box::pin(sync_streams(ctx, parent, stash))
    }))
}

fn latest_image() -> Box<dyn SubReconciler<Processor>> {
    Box::new(SyncReconciler::<Processor>::new("LatestImage", |_ctx, parent, _stash| {
        Box::pin(async move {
            let image = parent.function_image().unwrap_or_default().to_string();
            parent.status_mut().latest_image = image;
            Ok(())
        })
    }))
}

async fn sync_streams(ctx: &ReconcileContext, parent: &mut Processor, stash: &mut Stash) -> Result<()> {
    let inputs = match get_streams(ctx, parent, &parent.spec.inputs).await {
        Ok(streams) => streams,
        Err(e) => {
            parent
                .conditions()
                .mark_false(STREAMS_READY, "StreamNotFound", &e.to_string());
            return Err(e);
        }
    };
    let outputs = match get_streams(ctx, parent, &parent.spec.outputs).await {
        Ok(streams) => streams,
        Err(e) => {
            stash.store(&INPUT_STREAMS, inputs);
            parent
                .conditions()
                .mark_false(STREAMS_READY, "StreamNotFound", &e.to_string());
            return Err(e);
        }
    };

    match inputs.iter().chain(&outputs).find_map(not_ready_message) {
        Some(message) => {
            debug!("{}", message);
            parent
                .conditions()
                .mark_false(STREAMS_READY, "StreamNotReady", &message);
        }
        None => parent.conditions().mark_true(STREAMS_READY),
    }
    stash.store(&INPUT_STREAMS, inputs);
    stash.store(&OUTPUT_STREAMS, outputs);
    Ok(())
}

async fn get_streams(
    ctx: &ReconcileContext,
    parent: &Processor,
    bindings: &[crate::apis::StreamBinding],
) -> Result<Vec<Stream>> {
    let namespace = parent.namespace();
    let mut streams = Vec::with_capacity(bindings.len());
    for binding in bindings {
        ctx.track::<Stream, _>(namespace.as_deref(), &binding.stream, parent);
        streams.push(
            ctx.client
                .get::<Stream>(namespace.as_deref(), &binding.stream)
                .await?,
        );
    }
    Ok(streams)
}

fn not_ready_message(stream: &Stream) -> Option<String> {
    let reason = match stream.ready_condition() {
        Some(c) if c.is_true() => return None,
        Some(c) => c.message.clone().unwrap_or_default(),
        None => "stream has no ready condition".to_string(),
    };
    Some(format!("stream {} is not ready: {}", stream.name_any(), reason))
}

fn role_labels(parent: &Processor) -> BTreeMap<String, String> {
    BTreeMap::from([(PROCESSOR_LABEL_KEY.to_string(), parent.name_any())])
}

/// Runs the function container next to the processor sidecar
#[derive(Debug, Default)]
pub struct ProcessorDeploymentRole;

#[async_trait]
impl ChildRole<Processor> for ProcessorDeploymentRole {
    type Child = Deployment;

    fn name(&self) -> &str {
        "ChildDeployment"
    }

    fn condition_type(&self) -> &'static str {
        DEPLOYMENT_READY
    }

    fn role_label(&self, parent: &Processor) -> (String, String) {
        (PROCESSOR_LABEL_KEY.to_string(), parent.name_any())
    }

    async fn desired_child(
        &self,
        _ctx: &ReconcileContext,
        parent: &Processor,
        stash: &Stash,
    ) -> Result<Desired<Deployment>> {
        let (Some(inputs), Some(outputs), Some(images)) = (
            stash.retrieve(&INPUT_STREAMS),
            stash.retrieve(&OUTPUT_STREAMS),
            stash.retrieve(&PROCESSOR_IMAGES),
        ) else {
            return Ok(Desired::Unresolved);
        };
        let Some(processor_image) = images.get(PROCESSOR_IMAGE_KEY).filter(|image| !image.is_empty()) else {
            debug!("No {} in {}, skipping", PROCESSOR_IMAGE_KEY, PROCESSOR_IMAGES_CONFIGMAP);
            return Ok(Desired::Unresolved);
        };
        Ok(Desired::Child(processor_deployment(parent, inputs, outputs, processor_image)))
    }

    fn merge_before_update(&self, current: &mut Deployment, desired: &Deployment) {
        current.metadata.labels.clone_from(&desired.metadata.labels);
        current.spec.clone_from(&desired.spec);
    }

    fn semantic_equals(&self, a: &Deployment, b: &Deployment) -> bool {
        semantic_equals(&a.metadata.labels, &b.metadata.labels) && semantic_equals(&a.spec, &b.spec)
    }

    fn reflect_child_status_on_parent(&self, parent: &mut Processor, child: Option<&Deployment>, err: Option<&Error>) {
        if let Some(err) = err {
            if let Some(name) = err.already_exists_name() {
                mark_not_owned::<Deployment, Processor>(parent, DEPLOYMENT_READY, name);
            }
            return;
        }
        let available = child.and_then(available_condition);
        parent.status_mut().deployment_ref = child.map(TypedLocalObjectReference::for_object);
        if child.is_some() {
            parent
                .conditions()
                .propagate(DEPLOYMENT_READY, available.as_ref());
        }
    }
}

/// The Deployment's `Available` condition, as a `DeploymentReady` condition
fn available_condition(deployment: &Deployment) -> Option<Condition> {
    let condition = deployment
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Available")?;
    let status = match condition.status.as_str() {
        "True" => ConditionStatus::True,
        "False" => ConditionStatus::False,
        _ => ConditionStatus::Unknown,
    };
    Some(Condition::new(DEPLOYMENT_READY, status).with_reason(
        condition.reason.as_deref().unwrap_or_default(),
        condition.message.as_deref().unwrap_or_default(),
    ))
}

fn processor_deployment(parent: &Processor, inputs: &[Stream], outputs: &[Stream], processor_image: &str) -> Deployment {
    let role = role_labels(parent);
    let template = parent.spec.template.clone().unwrap_or_default();
    let template_meta = template.metadata.unwrap_or_default();
    let mut pod_spec = template.spec.unwrap_or_default();

    let mut function = if pod_spec.containers.is_empty() {
        PodContainer::default()
    } else {
        pod_spec.containers.remove(0)
    };
    if function.name.is_empty() {
        function.name = FUNCTION_CONTAINER.to_string();
    }
    function.image = parent
        .status()
        .map(|s| s.latest_image.clone())
        .filter(|image| !image.is_empty());
    function.ports = Some(vec![ContainerPort {
        container_port: FUNCTION_PORT,
        ..Default::default()
    }]);

    let mut volumes = pod_spec.volumes.take().unwrap_or_default();
    let mut mounts = Vec::new();
    for (direction, streams) in [("input", inputs), ("output", outputs)] {
        for (index, stream) in streams.iter().enumerate() {
            let path = format!("{BINDINGS_ROOT}/{direction}_{index:03}");
            bind_stream(stream, &path, &mut volumes, &mut mounts);
        }
    }

    let processor = PodContainer {
        name: PROCESSOR_CONTAINER.to_string(),
        image: Some(processor_image.to_string()),
        env: Some(processor_env(parent)),
        volume_mounts: Some(mounts),
        ..Default::default()
    };
    let mut containers = vec![function, processor];
    containers.append(&mut pod_spec.containers);
    pod_spec.containers = containers;
    pod_spec.volumes = Some(volumes);

    Deployment {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-processor-", parent.name_any())),
            labels: Some(merge_maps(parent.meta().labels.as_ref(), Some(&role))),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(role.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(merge_maps(template_meta.labels.as_ref(), Some(&role))),
                    annotations: template_meta.annotations,
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Environment of the processor sidecar
///
/// List values are comma-joined in declaration order.
fn processor_env(parent: &Processor) -> Vec<EnvVar> {
    let join = |values: Vec<&str>| values.join(",");
    [
        ("CNB_BINDINGS", BINDINGS_ROOT.to_string()),
        (
            "INPUT_START_OFFSETS",
            join(parent.spec.inputs.iter().map(|b| b.start_offset.as_str()).collect()),
        ),
        ("INPUT_NAMES", join(parent.spec.inputs.iter().map(|b| b.alias.as_str()).collect())),
        ("OUTPUT_NAMES", join(parent.spec.outputs.iter().map(|b| b.alias.as_str()).collect())),
        ("GROUP", parent.name_any()),
        ("FUNCTION", format!("localhost:{FUNCTION_PORT}")),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        value_from: None,
    })
    .collect()
}

/// Mount a stream's binding metadata and secret under `path`
///
/// A stream bound more than once shares its volumes.
fn bind_stream(stream: &Stream, path: &str, volumes: &mut Vec<Volume>, mounts: &mut Vec<VolumeMount>) {
    let uid = stream.uid().unwrap_or_default();
    let binding = stream.binding();
    let metadata = format!("stream-{uid}-metadata");
    let secret = format!("stream-{uid}-secret");

    if !volumes.iter().any(|v| v.name == metadata) {
        volumes.push(Volume {
            name: metadata.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: binding.metadata_ref.name,
                ..Default::default()
            }),
            ..Default::default()
        });
        volumes.push(Volume {
            name: secret.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(binding.secret_ref.name),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    for (volume, leaf) in [(metadata, "metadata"), (secret, "secret")] {
        mounts.push(VolumeMount {
            name: volume,
            mount_path: format!("{path}/{leaf}"),
            read_only: Some(true),
            ..Default::default()
        });
    }
}

/// Scales the processor Deployment on input lag
#[derive(Debug, Default)]
pub struct ProcessorScaledObjectRole;

#[async_trait]
impl ChildRole<Processor> for ProcessorScaledObjectRole {
    type Child = ScaledObject;

    fn name(&self) -> &str {
        "ChildScaledObject"
    }

    fn condition_type(&self) -> &'static str {
        SCALED_OBJECT_READY
    }

    fn role_label(&self, parent: &Processor) -> (String, String) {
        (PROCESSOR_LABEL_KEY.to_string(), parent.name_any())
    }

    async fn desired_child(
        &self,
        ctx: &ReconcileContext,
        parent: &Processor,
        stash: &Stash,
    ) -> Result<Desired<ScaledObject>> {
        let Some(deployment) = parent.status().and_then(|s| s.deployment_ref.as_ref()) else {
            return Ok(Desired::Unresolved);
        };
        let Some(inputs) = stash.retrieve(&INPUT_STREAMS) else {
            return Ok(Desired::Unresolved);
        };

        let namespace = parent.namespace();
        let mut triggers = Vec::with_capacity(inputs.len());
        for stream in inputs {
            let secret_name = stream.binding().secret_ref.name;
            match ctx.client.get::<Secret>(namespace.as_deref(), &secret_name).await {
                Ok(secret) => match liiklus_trigger(&secret, &parent.name_any()) {
                    Some(trigger) => triggers.push(trigger),
                    None => debug!("Binding secret {} is incomplete", secret_name),
                },
                Err(e) if e.is_not_found() => debug!("Binding secret {} not found", secret_name),
                Err(e) => return Err(e),
            }
        }
        if !inputs.is_empty() && triggers.is_empty() {
            debug!("No triggers for {} yet, skipping", parent.name_any());
            return Ok(Desired::Unresolved);
        }

        let streams_failed = parent
            .status()
            .and_then(|s| find_condition(&s.conditions, STREAMS_READY))
            .is_some_and(Condition::is_false);

        Ok(Desired::Child(ScaledObject {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-processor-", parent.name_any())),
                labels: Some(merge_maps(parent.meta().labels.as_ref(), Some(&role_labels(parent)))),
                ..Default::default()
            },
            spec: ScaledObjectSpec {
                scale_target_ref: ScaleTarget {
                    deployment_name: deployment.name.clone(),
                    container_name: String::new(),
                },
                polling_interval: Some(POLLING_INTERVAL),
                cooldown_period: Some(COOLDOWN_PERIOD),
                min_replica_count: Some(MIN_REPLICAS),
                max_replica_count: Some(if streams_failed { 0 } else { MAX_REPLICAS }),
                triggers,
            },
            status: None,
        }))
    }

    fn merge_before_update(&self, current: &mut ScaledObject, desired: &ScaledObject) {
        current.metadata.labels.clone_from(&desired.metadata.labels);
        current.spec = desired.spec.clone();
    }

    fn semantic_equals(&self, a: &ScaledObject, b: &ScaledObject) -> bool {
        semantic_equals(&a.metadata.labels, &b.metadata.labels) && semantic_equals(&a.spec, &b.spec)
    }

    fn reflect_child_status_on_parent(
        &self,
        parent: &mut Processor,
        child: Option<&ScaledObject>,
        err: Option<&Error>,
    ) {
        if let Some(err) = err {
            if let Some(name) = err.already_exists_name() {
                mark_not_owned::<ScaledObject, Processor>(parent, SCALED_OBJECT_READY, name);
            }
            return;
        }
        parent.status_mut().scaled_object_ref = child.map(TypedLocalObjectReference::for_object);
        if child.is_some() {
            parent.conditions().mark_true(SCALED_OBJECT_READY);
        }
    }
}

/// Trigger reading lag for `group` from the gateway a binding secret names
fn liiklus_trigger(secret: &Secret, group: &str) -> Option<ScaleTrigger> {
    let address = secret_value(secret, "gateway")?;
    let topic = secret_value(secret, "topic")?;
    Some(ScaleTrigger {
        trigger_type: LIIKLUS_TRIGGER.to_string(),
        metadata: BTreeMap::from([
            ("address".to_string(), address),
            ("group".to_string(), group.to_string()),
            ("topic".to_string(), topic),
        ]),
    })
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|value| String::from_utf8_lossy(&value.0).into_owned())
        .filter(|value| !value.is_empty())
}
