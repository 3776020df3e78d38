//! # Streaming Resources
//!
//! `streaming.projectriff.io/v1alpha1` resources. A Processor runs a function
//! against input Streams and writes to output Streams; a PulsarGateway runs a
//! Gateway that provisions Streams on a Pulsar cluster. KafkaProviders and
//! InMemoryGateways are admitted but not reconciled.

use super::condition::{find_condition, Condition, ConditionSet, READY};
use super::refs::{LocalObjectReference, TypedLocalObjectReference};
use k8s_openapi::api::core::v1::{PodTemplateSpec, ServicePort};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label set on every child created for a Processor
pub const PROCESSOR_LABEL_KEY: &str = "streaming.projectriff.io/processor";
/// Label set on the Gateway created for a PulsarGateway
pub const PULSAR_GATEWAY_LABEL_KEY: &str = "streaming.projectriff.io/pulsar-gateway";

/// Read from the oldest available message
pub const EARLIEST: &str = "earliest";
/// Read only messages produced after the processor starts
pub const LATEST: &str = "latest";

pub const DEPLOYMENT_READY: &str = "DeploymentReady";
pub const SCALED_OBJECT_READY: &str = "ScaledObjectReady";
pub const STREAMS_READY: &str = "StreamsReady";
pub const CONFIG_READY: &str = "ConfigReady";
pub const GATEWAY_READY: &str = "GatewayReady";

pub static PROCESSOR_CONDITIONS: ConditionSet =
    ConditionSet::new(READY, &[DEPLOYMENT_READY, SCALED_OBJECT_READY, STREAMS_READY]);
pub static PULSAR_GATEWAY_CONDITIONS: ConditionSet = ConditionSet::new(READY, &[CONFIG_READY, GATEWAY_READY]);

/// Processor Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: streaming.projectriff.io/v1alpha1
/// kind: Processor
/// metadata:
///   name: square
/// spec:
///   inputs:
///     - stream: numbers
///       alias: in
///       startOffset: earliest
///   outputs:
///     - stream: squares
///       alias: out
///   template:
///     spec:
///       containers:
///         - name: function
///           image: registry.example.com/square
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Processor",
    group = "streaming.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "ProcessorStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSpec {
    #[serde(default)]
    pub inputs: Vec<StreamBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StreamBinding>,
    /// Pod template whose first container runs the function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub template: Option<PodTemplateSpec>,
}

/// Binds a Stream to a named input or output of a processor
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamBinding {
    pub stream: String,
    pub alias: String,
    /// `earliest`, `latest` or empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start_offset: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub latest_image: String,
    #[serde(default)]
    pub deployment_ref: Option<TypedLocalObjectReference>,
    #[serde(default)]
    pub scaled_object_ref: Option<TypedLocalObjectReference>,
}

impl Processor {
    /// Image of the function container, if the template names one
    pub fn function_image(&self) -> Option<&str> {
        self.spec
            .template
            .as_ref()
            .and_then(|t| t.spec.as_ref())
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.as_deref())
            .filter(|image| !image.is_empty())
    }
}

/// Stream Custom Resource Definition
///
/// Streams are provisioned by their gateway; this controller only reads
/// their binding status.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Stream",
    group = "streaming.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "StreamStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
    #[serde(default)]
    pub gateway: LocalObjectReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub binding: BindingStatus,
}

/// ConfigMap and Secret describing how to reach a provisioned stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    #[serde(default)]
    pub metadata_ref: LocalObjectReference,
    #[serde(default)]
    pub secret_ref: LocalObjectReference,
}

impl Stream {
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, READY))
    }

    pub fn binding(&self) -> BindingStatus {
        self.status
            .as_ref()
            .map(|s| s.binding.clone())
            .unwrap_or_default()
    }
}

/// Gateway Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Gateway",
    group = "streaming.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "GatewayStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub template: Option<PodTemplateSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
}

impl Gateway {
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, READY))
    }
}

/// URL a gateway is reachable at
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Addressable {
    pub url: String,
}

impl Addressable {
    /// Host part of the url, without scheme, port or path
    pub fn hostname(&self) -> &str {
        let rest = self
            .url
            .split_once("://")
            .map_or(self.url.as_str(), |(_, rest)| rest);
        let authority = rest.split('/').next().unwrap_or_default();
        authority
            .rsplit_once(':')
            .map_or(authority, |(host, _)| host)
    }
}

/// PulsarGateway Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "PulsarGateway",
    group = "streaming.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "PulsarGatewayStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PulsarGatewaySpec {
    #[serde(default, rename = "serviceURL")]
    pub service_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PulsarGatewayStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub address: Option<Addressable>,
    #[serde(default)]
    pub gateway_ref: Option<TypedLocalObjectReference>,
    #[serde(default)]
    pub gateway_image: String,
    #[serde(default)]
    pub provisioner_image: String,
}

/// KafkaProvider Custom Resource Definition
///
/// Provisions Streams on a Kafka cluster. Only admitted here.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "KafkaProvider",
    group = "streaming.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaProviderSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bootstrap_servers: String,
}

/// InMemoryGateway Custom Resource Definition
///
/// A gateway keeping records in memory, for development. Only admitted here.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "InMemoryGateway",
    group = "streaming.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced
)]
pub struct InMemoryGatewaySpec {}

conditioned_status!(ProcessorStatus);
conditioned_status!(PulsarGatewayStatus);
parent_resource!(Processor, ProcessorStatus, PROCESSOR_CONDITIONS);
parent_resource!(PulsarGateway, PulsarGatewayStatus, PULSAR_GATEWAY_CONDITIONS);
