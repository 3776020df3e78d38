//! Builders for the objects tests seed into a [`FakeStore`](super::FakeStore).
//!
//! Every factory starts from a named object and layers metadata, spec and
//! status on top; `build` hands back the object.
//!
//! ```ignore
//! let function = factories::function("default", "square")
//!     .image("registry.example.com/square")
//!     .source_git("https://github.com/projectriff-samples/node-square", "main")
//!     .build();
//! ```

use super::store::time;
use crate::apis::{
    Addressable, Application, ApplicationSpec, BindingStatus, BuilderReference, ClusterBuilder, ClusterBuilderSpec,
    Condition, ConditionStatus, Container, ContainerSpec, Function, FunctionSpec, Gateway, GatewaySpec, Git,
    GitSource, Image, ImageBuild, ImageSpec, LocalObjectReference, Processor, ProcessorSpec, PulsarGateway,
    PulsarGatewaySpec, Source, Stream, StreamBinding, StreamSpec, TypedLocalObjectReference, FUNCTION_BUILDER,
    READY,
};
use crate::controller::reconciler::owner_reference;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Container as PodContainer, EnvVar, PodSpec, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};

/// Fluent builder over one object
#[derive(Debug, Clone)]
pub struct Factory<K> {
    object: K,
}

pub type ConfigMapFactory = Factory<ConfigMap>;
pub type SecretFactory = Factory<Secret>;
pub type ContainerFactory = Factory<Container>;
pub type FunctionFactory = Factory<Function>;
pub type ApplicationFactory = Factory<Application>;
pub type ImageFactory = Factory<Image>;
pub type ClusterBuilderFactory = Factory<ClusterBuilder>;
pub type ProcessorFactory = Factory<Processor>;
pub type StreamFactory = Factory<Stream>;
pub type GatewayFactory = Factory<Gateway>;
pub type PulsarGatewayFactory = Factory<PulsarGateway>;

impl<K: Resource<DynamicType = ()>> Factory<K> {
    fn named(mut object: K, namespace: Option<&str>, name: &str) -> Self {
        let meta = object.meta_mut();
        meta.name = Some(name.to_string());
        meta.namespace = namespace.map(str::to_string);
        Self { object }
    }

    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.object
            .labels_mut()
            .insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: OwnerReference) -> Self {
        self.object
            .meta_mut()
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(owner);
        self
    }

    /// Controlled by `parent`, which must already carry a uid
    #[must_use]
    pub fn owned_by<P: Resource<DynamicType = ()>>(self, parent: &P) -> Self {
        self.owner(owner_reference(parent))
    }

    #[must_use]
    pub fn created_at(mut self, rfc3339: &str) -> Self {
        self.object.meta_mut().creation_timestamp = time(rfc3339);
        self
    }

    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.object.meta_mut().deletion_timestamp = time(&Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        self
    }

    #[must_use]
    pub fn generation(mut self, generation: i64) -> Self {
        self.object.meta_mut().generation = Some(generation);
        self
    }

    #[must_use]
    pub fn uid(mut self, uid: &str) -> Self {
        self.object.meta_mut().uid = Some(uid.to_string());
        self
    }

    pub fn build(self) -> K {
        self.object
    }
}

fn ready() -> Condition {
    Condition::new(READY, ConditionStatus::True)
}

fn git_source(url: &str, revision: &str) -> Source {
    Source {
        git: Some(Git {
            url: url.to_string(),
            revision: revision.to_string(),
        }),
        sub_path: String::new(),
    }
}

fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    conditions.retain(|c| c.r#type != condition.r#type);
    conditions.push(condition);
}

pub fn config_map(namespace: &str, name: &str) -> ConfigMapFactory {
    Factory::named(ConfigMap::default(), Some(namespace), name)
}

impl Factory<ConfigMap> {
    #[must_use]
    pub fn data(mut self, key: &str, value: &str) -> Self {
        self.object
            .data
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        self
    }
}

pub fn secret(namespace: &str, name: &str) -> SecretFactory {
    Factory::named(Secret::default(), Some(namespace), name)
}

impl Factory<Secret> {
    #[must_use]
    pub fn data(mut self, key: &str, value: &str) -> Self {
        self.object
            .data
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), ByteString(value.as_bytes().to_vec()));
        self
    }
}

pub fn container(namespace: &str, name: &str) -> ContainerFactory {
    Factory::named(Container::new(name, ContainerSpec::default()), Some(namespace), name)
}

impl Factory<Container> {
    #[must_use]
    pub fn spec(mut self, spec: ContainerSpec) -> Self {
        self.object.spec = spec;
        self
    }

    #[must_use]
    pub fn latest_image(mut self, image: &str) -> Self {
        self.object
            .status
            .get_or_insert_with(Default::default)
            .latest_image = image.to_string();
        self
    }
}

pub fn function(namespace: &str, name: &str) -> FunctionFactory {
    Factory::named(Function::new(name, FunctionSpec::default()), Some(namespace), name)
}

impl Factory<Function> {
    #[must_use]
    pub fn image(mut self, image: &str) -> Self {
        self.object.spec.image = image.to_string();
        self
    }

    #[must_use]
    pub fn source_git(mut self, url: &str, revision: &str) -> Self {
        self.object.spec.source = Some(git_source(url, revision));
        self
    }

    #[must_use]
    pub fn artifact(mut self, artifact: &str) -> Self {
        self.object.spec.artifact = artifact.to_string();
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: &str) -> Self {
        self.object.spec.handler = handler.to_string();
        self
    }
}

pub fn application(namespace: &str, name: &str) -> ApplicationFactory {
    Factory::named(Application::new(name, ApplicationSpec::default()), Some(namespace), name)
}

impl Factory<Application> {
    #[must_use]
    pub fn image(mut self, image: &str) -> Self {
        self.object.spec.image = image.to_string();
        self
    }

    #[must_use]
    pub fn source_git(mut self, url: &str, revision: &str) -> Self {
        self.object.spec.source = Some(git_source(url, revision));
        self
    }

    #[must_use]
    pub fn cache_size(mut self, size: &str) -> Self {
        self.object.spec.cache_size = Some(size.to_string());
        self
    }
}

pub fn kpack_image(namespace: &str, name: &str) -> ImageFactory {
    Factory::named(Image::new(name, ImageSpec::default()), Some(namespace), name)
}

impl Factory<Image> {
    #[must_use]
    pub fn tag(mut self, tag: &str) -> Self {
        self.object.spec.tag = tag.to_string();
        self
    }

    /// Built by the function builder with the given buildpack settings
    #[must_use]
    pub fn function_builder(mut self, artifact: &str, handler: &str, invoker: &str) -> Self {
        self.object.spec.builder = BuilderReference::cluster_builder(FUNCTION_BUILDER);
        let env = [
            ("RIFF", "true"),
            ("RIFF_ARTIFACT", artifact),
            ("RIFF_HANDLER", handler),
            ("RIFF_OVERRIDE", invoker),
        ]
        .into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        })
        .collect();
        self.object.spec.build = Some(ImageBuild { env });
        self
    }

    #[must_use]
    pub fn source_git(mut self, url: &str, revision: &str) -> Self {
        self.object.spec.source.git = Some(GitSource {
            url: url.to_string(),
            revision: revision.to_string(),
        });
        self
    }

    #[must_use]
    pub fn ready(mut self) -> Self {
        let status = self.object.status.get_or_insert_with(Default::default);
        upsert_condition(&mut status.conditions, ready());
        self
    }

    #[must_use]
    pub fn latest_image(mut self, image: &str) -> Self {
        self.object
            .status
            .get_or_insert_with(Default::default)
            .latest_image = image.to_string();
        self
    }

    #[must_use]
    pub fn build_cache(mut self, name: &str) -> Self {
        self.object
            .status
            .get_or_insert_with(Default::default)
            .build_cache_name = name.to_string();
        self
    }
}

pub fn cluster_builder(name: &str) -> ClusterBuilderFactory {
    Factory::named(ClusterBuilder::new(name, ClusterBuilderSpec::default()), None, name)
}

impl Factory<ClusterBuilder> {
    #[must_use]
    pub fn tag(mut self, tag: &str) -> Self {
        self.object.spec.tag = tag.to_string();
        self
    }

    /// Ready with `latest` as the built builder image
    #[must_use]
    pub fn ready(mut self, latest: &str) -> Self {
        let status = self.object.status.get_or_insert_with(Default::default);
        upsert_condition(&mut status.conditions, ready());
        status.latest_image = latest.to_string();
        self
    }
}

pub fn processor(namespace: &str, name: &str) -> ProcessorFactory {
    Factory::named(Processor::new(name, ProcessorSpec::default()), Some(namespace), name)
}

impl Factory<Processor> {
    /// Function image, as an unnamed first container of the template
    #[must_use]
    pub fn image(mut self, image: &str) -> Self {
        self.object.spec.template = Some(PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![PodContainer {
                    image: Some(image.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        });
        self
    }

    #[must_use]
    pub fn input(mut self, stream: &str, alias: &str, start_offset: &str) -> Self {
        self.object.spec.inputs.push(StreamBinding {
            stream: stream.to_string(),
            alias: alias.to_string(),
            start_offset: start_offset.to_string(),
        });
        self
    }

    #[must_use]
    pub fn output(mut self, stream: &str, alias: &str) -> Self {
        self.object.spec.outputs.push(StreamBinding {
            stream: stream.to_string(),
            alias: alias.to_string(),
            start_offset: String::new(),
        });
        self
    }

    #[must_use]
    pub fn latest_image(mut self, image: &str) -> Self {
        self.object
            .status
            .get_or_insert_with(Default::default)
            .latest_image = image.to_string();
        self
    }

    #[must_use]
    pub fn deployment_ref(mut self, name: &str) -> Self {
        self.object
            .status
            .get_or_insert_with(Default::default)
            .deployment_ref = Some(deployment_ref(name));
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        let status = self.object.status.get_or_insert_with(Default::default);
        upsert_condition(&mut status.conditions, condition);
        self
    }
}

pub fn stream(namespace: &str, name: &str) -> StreamFactory {
    Factory::named(Stream::new(name, StreamSpec::default()), Some(namespace), name)
}

impl Factory<Stream> {
    #[must_use]
    pub fn binding(mut self, metadata: &str, secret: &str) -> Self {
        self.object
            .status
            .get_or_insert_with(Default::default)
            .binding = BindingStatus {
            metadata_ref: LocalObjectReference {
                name: metadata.to_string(),
            },
            secret_ref: LocalObjectReference {
                name: secret.to_string(),
            },
        };
        self
    }

    #[must_use]
    pub fn ready(mut self) -> Self {
        let status = self.object.status.get_or_insert_with(Default::default);
        upsert_condition(&mut status.conditions, ready());
        self
    }
}

pub fn pulsar_gateway(namespace: &str, name: &str) -> PulsarGatewayFactory {
    Factory::named(PulsarGateway::new(name, PulsarGatewaySpec::default()), Some(namespace), name)
}

impl Factory<PulsarGateway> {
    #[must_use]
    pub fn service_url(mut self, url: &str) -> Self {
        self.object.spec.service_url = url.to_string();
        self
    }
}

pub fn gateway(namespace: &str, name: &str) -> GatewayFactory {
    Factory::named(Gateway::new(name, GatewaySpec::default()), Some(namespace), name)
}

impl Factory<Gateway> {
    #[must_use]
    pub fn address(mut self, url: &str) -> Self {
        self.object
            .status
            .get_or_insert_with(Default::default)
            .address = Some(Addressable { url: url.to_string() });
        self
    }

    #[must_use]
    pub fn ready(mut self) -> Self {
        let status = self.object.status.get_or_insert_with(Default::default);
        upsert_condition(&mut status.conditions, ready());
        self
    }
}

pub fn deployment_ref(name: &str) -> TypedLocalObjectReference {
    TypedLocalObjectReference {
        api_group: Some("apps".to_string()),
        kind: "Deployment".to_string(),
        name: name.to_string(),
    }
}

/// Status of a Deployment whose replicas are all available
pub fn available_deployment_status() -> DeploymentStatus {
    DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".to_string(),
            status: "True".to_string(),
            reason: Some("MinimumReplicasAvailable".to_string()),
            message: Some("Deployment has minimum availability.".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}
