//! # Build Resources
//!
//! `build.projectriff.io/v1alpha1` resources: Functions and Applications are
//! built from source by kpack, Containers reference a prebuilt image.

use super::condition::{Condition, ConditionSet, READY};
use super::refs::TypedLocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label set on kpack Images created for a Function
pub const FUNCTION_LABEL_KEY: &str = "build.projectriff.io/function";
/// Label set on kpack Images created for an Application
pub const APPLICATION_LABEL_KEY: &str = "build.projectriff.io/application";

/// Target image has been determined
pub const IMAGE_RESOLVED: &str = "ImageResolved";
/// Child kpack Image reports Ready
pub const KPACK_IMAGE_READY: &str = "KpackImageReady";

pub static BUILD_CONDITIONS: ConditionSet = ConditionSet::new(READY, &[IMAGE_RESOLVED, KPACK_IMAGE_READY]);
pub static CONTAINER_CONDITIONS: ConditionSet = ConditionSet::new(READY, &[IMAGE_RESOLVED]);

/// Function Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: build.projectriff.io/v1alpha1
/// kind: Function
/// metadata:
///   name: square
/// spec:
///   source:
///     git:
///       url: https://github.com/projectriff-samples/node-square
///       revision: main
///   artifact: square.js
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Function",
    group = "build.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "BuildStatus",
    shortname = "fn",
    printcolumn = r#"{"name":"Latest Image", "type":"string", "jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Repository to push built images to; defaults to `<default-image-prefix>/<name>`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<String>,
    /// Omitted for images built outside the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub artifact: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub handler: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub invoker: String,
}

/// Application Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Application",
    group = "build.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "BuildStatus",
    shortname = "app",
    printcolumn = r#"{"name":"Latest Image", "type":"string", "jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

/// Container Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Container",
    group = "build.projectriff.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "ContainerStatus",
    printcolumn = r#"{"name":"Latest Image", "type":"string", "jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Git>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Git {
    pub url: String,
    #[serde(default)]
    pub revision: String,
}

/// Status shared by Functions and Applications
///
/// Every field is serialized, cleared ones as `""` or null, so a status merge
/// patch overwrites what the server holds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub target_image: String,
    #[serde(default)]
    pub latest_image: String,
    #[serde(default)]
    pub kpack_image_ref: Option<TypedLocalObjectReference>,
    #[serde(default)]
    pub build_cache_ref: Option<TypedLocalObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub target_image: String,
    #[serde(default)]
    pub latest_image: String,
}

conditioned_status!(BuildStatus);
conditioned_status!(ContainerStatus);
parent_resource!(Function, BuildStatus, BUILD_CONDITIONS);
parent_resource!(Application, BuildStatus, BUILD_CONDITIONS);
parent_resource!(Container, ContainerStatus, CONTAINER_CONDITIONS);
