//! Admission dispatch from kind to validate and default handlers.

use super::rules::Admissible;
use crate::apis::{
    Application, Container, Deployer, Function, InMemoryGateway, KafkaProvider, Processor, PulsarGateway,
};
use crate::controller::error::{Error, Result};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

type Validator = Box<dyn Fn(&Value) -> Result<()> + Send + Sync>;
type Defaulter = Box<dyn Fn(&mut Value) -> Result<()> + Send + Sync>;

struct Handlers {
    validate: Validator,
    default: Defaulter,
}

/// Table of admission handlers keyed by kind
///
/// Built explicitly, usually through [`AdmissionRegistry::riff`].
#[derive(Default)]
pub struct AdmissionRegistry {
    handlers: BTreeMap<String, Handlers>,
}

impl fmt::Debug for AdmissionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl AdmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every riff resource with admission rules
    pub fn riff() -> Self {
        Self::new()
            .register::<Function>()
            .register::<Application>()
            .register::<Container>()
            .register::<Processor>()
            .register::<PulsarGateway>()
            .register::<KafkaProvider>()
            .register::<InMemoryGateway>()
            .register::<Deployer>()
    }

    #[must_use]
    pub fn register<K>(mut self) -> Self
    where
        K: Admissible + Resource<DynamicType = ()> + Serialize + DeserializeOwned + 'static,
    {
        let handlers = Handlers {
            validate: Box::new(|value: &Value| {
                let obj: K = serde_json::from_value(value.clone())?;
                obj.validate().into_result().map_err(Error::from)
            }),
            default: Box::new(|value: &mut Value| {
                let mut obj: K = serde_json::from_value(value.clone())?;
                obj.apply_defaults();
                *value = serde_json::to_value(&obj)?;
                Ok(())
            }),
        };
        self.handlers.insert(K::kind(&()).into_owned(), handlers);
        self
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    fn handlers(&self, kind: &str) -> Result<&Handlers> {
        self.handlers
            .get(kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }

    /// Validate an object of `kind`; field problems come back as [`Error::Invalid`]
    pub fn validate(&self, kind: &str, obj: &Value) -> Result<()> {
        (self.handlers(kind)?.validate)(obj)
    }

    /// Fill in defaults on an object of `kind` in place
    pub fn apply_defaults(&self, kind: &str, obj: &mut Value) -> Result<()> {
        (self.handlers(kind)?.default)(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::field::{missing_field, CURRENT_FIELD};
    use serde_json::json;

    #[test]
    fn test_unknown_kind() {
        let registry = AdmissionRegistry::riff();
        let err = registry.validate("Stream", &json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownKind(kind) if kind == "Stream"));
        assert!(AdmissionRegistry::new()
            .apply_defaults("Processor", &mut json!({}))
            .is_err());
    }

    #[test]
    fn test_dispatches_by_kind() {
        let registry = AdmissionRegistry::riff();
        assert_eq!(
            registry.kinds(),
            vec![
                "Application",
                "Container",
                "Deployer",
                "Function",
                "InMemoryGateway",
                "KafkaProvider",
                "Processor",
                "PulsarGateway"
            ]
        );

        let empty = json!({
            "apiVersion": "streaming.projectriff.io/v1alpha1",
            "kind": "Processor",
            "metadata": {"name": "square", "namespace": "default"},
            "spec": {}
        });
        match registry.validate("Processor", &empty) {
            Err(Error::Invalid(errs)) => assert_eq!(errs, missing_field(&[CURRENT_FIELD]).via_field("spec")),
            other => panic!("expected invalid, got {other:?}"),
        }

        let container = json!({
            "apiVersion": "build.projectriff.io/v1alpha1",
            "kind": "Container",
            "metadata": {"name": "hello", "namespace": "default"},
            "spec": {"image": "registry.example.com/hello"}
        });
        registry.validate("Container", &container).unwrap();
    }

    #[test]
    fn test_default_then_validate_processor() {
        let registry = AdmissionRegistry::riff();
        let mut processor = json!({
            "apiVersion": "streaming.projectriff.io/v1alpha1",
            "kind": "Processor",
            "metadata": {"name": "square", "namespace": "default"},
            "spec": {
                "inputs": [{"stream": "numbers", "alias": "in"}],
                "template": {"spec": {"containers": [{"name": "", "image": "example/square"}]}}
            }
        });

        registry.apply_defaults("Processor", &mut processor).unwrap();
        assert_eq!(processor["spec"]["template"]["spec"]["containers"][0]["name"], "function");
        registry.validate("Processor", &processor).unwrap();
    }

    #[test]
    fn test_malformed_object_is_a_serialization_error() {
        let registry = AdmissionRegistry::riff();
        let err = registry
            .validate("Function", &json!({"spec": {"image": 42}}))
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_default_then_validate_deployer() {
        let registry = AdmissionRegistry::riff();
        let mut deployer = json!({
            "apiVersion": "knative.projectriff.io/v1alpha1",
            "kind": "Deployer",
            "metadata": {"name": "square", "namespace": "default"},
            "spec": {"build": {"functionRef": "square"}}
        });

        registry.apply_defaults("Deployer", &mut deployer).unwrap();
        assert_eq!(deployer["spec"]["template"]["containers"].as_array().map(Vec::len), Some(1));
        registry.validate("Deployer", &deployer).unwrap();

        let mut gateway = json!({
            "apiVersion": "streaming.projectriff.io/v1alpha1",
            "kind": "InMemoryGateway",
            "metadata": {"name": "dev", "namespace": "default"},
            "spec": {}
        });
        let before = gateway.clone();
        registry.apply_defaults("InMemoryGateway", &mut gateway).unwrap();
        assert_eq!(gateway, before);
        registry.validate("InMemoryGateway", &gateway).unwrap();
    }
}
