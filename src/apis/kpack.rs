//! kpack `kpack.io/v1alpha1` shapes, trimmed to the fields the build
//! reconcilers write or read. The CRDs are installed by kpack, so no schema
//! is generated for them.

use super::condition::{find_condition, Condition, READY};
use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Builder used for Function images
pub const FUNCTION_BUILDER: &str = "riff-function";
/// Builder used for Application images
pub const APPLICATION_BUILDER: &str = "riff-application";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[kube(
    kind = "Image",
    group = "kpack.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    status = "ImageStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub tag: String,
    #[serde(default)]
    pub builder: BuilderReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ImageBuild>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl BuilderReference {
    pub fn cluster_builder(name: &str) -> Self {
        Self {
            kind: "ClusterBuilder".to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GitSource {
    pub url: String,
    pub revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ImageBuild {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_cache_name: String,
}

impl Image {
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, READY))
    }
}

/// Cluster scoped builder image
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[kube(
    kind = "ClusterBuilder",
    group = "kpack.io",
    version = "v1alpha1",
    derive = "PartialEq",
    derive = "Default",
    status = "ClusterBuilderStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBuilderSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBuilderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_image: String,
}

impl ClusterBuilder {
    /// Latest builder image, or empty until the builder is Ready
    pub fn ready_image(&self) -> &str {
        self.status
            .as_ref()
            .filter(|s| find_condition(&s.conditions, READY).is_some_and(Condition::is_true))
            .map_or("", |s| s.latest_image.as_str())
    }
}
