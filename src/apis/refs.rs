//! Object references carried in resource status.

use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pointer from a parent's status to an object in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypedLocalObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    pub kind: String,
    pub name: String,
}

impl TypedLocalObjectReference {
    pub fn for_object<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        let group = K::group(&());
        Self {
            api_group: (!group.is_empty()).then(|| group.into_owned()),
            kind: K::kind(&()).into_owned(),
            name: obj.name_any(),
        }
    }
}

/// Name-only reference to a ConfigMap or Secret in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use kube::api::ObjectMeta;

    #[test]
    fn test_reference_for_core_group_omits_api_group() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("echo-processor-000".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let reference = TypedLocalObjectReference::for_object(&deployment);
        assert_eq!(reference.api_group.as_deref(), Some("apps"));
        assert_eq!(reference.kind, "Deployment");
        assert_eq!(reference.name, "echo-processor-000");

        let configmap = k8s_openapi::api::core::v1::ConfigMap {
            metadata: ObjectMeta {
                name: Some("riff-build".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let reference = TypedLocalObjectReference::for_object(&configmap);
        assert_eq!(reference.api_group, None);
        assert_eq!(reference.kind, "ConfigMap");
    }
}
