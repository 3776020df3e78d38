//! # Knative Resources
//!
//! `knative.projectriff.io/v1alpha1` resources. A Deployer runs a built
//! workload, or a plain image, as a Knative service. This controller only
//! admits them.

use k8s_openapi::api::core::v1::PodSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Deployer Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: knative.projectriff.io/v1alpha1
/// kind: Deployer
/// metadata:
///   name: square
/// spec:
///   build:
///     functionRef: square
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Deployer",
    group = "knative.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DeployerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<DeployerBuild>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub template: Option<PodSpec>,
}

/// The riff build resource whose latest image is deployed
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployerBuild {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub application_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function_ref: String,
}
