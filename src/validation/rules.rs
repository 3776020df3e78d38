//! Validation and defaulting rules per resource kind.

use super::field::{
    disallowed_fields, duplicate_value, invalid_value, missing_field, missing_one_of, multiple_one_of, FieldErrors,
    CURRENT_FIELD,
};
use crate::apis::{
    Application, Container, Deployer, DeployerBuild, DeployerSpec, Function, InMemoryGateway, KafkaProvider,
    KafkaProviderSpec, Processor, ProcessorSpec, PulsarGateway, Source, StreamBinding, EARLIEST, LATEST,
};
use k8s_openapi::api::core::v1::{Container as PodContainer, PodSpec, PodTemplateSpec};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name required of a processor's first container
pub const FUNCTION_CONTAINER: &str = "function";
/// Git revision used when none is given
pub const DEFAULT_GIT_REVISION: &str = "master";

/// Pod spec fields a Deployer template may set
const DEPLOYER_TEMPLATE_FIELDS: &[&str] = &["containers", "serviceAccountName", "volumes"];

/// A resource the admission webhook validates and defaults
pub trait Admissible {
    fn validate(&self) -> FieldErrors;

    fn apply_defaults(&mut self) {}
}

impl Admissible for Processor {
    fn validate(&self) -> FieldErrors {
        validate_processor_spec(&self.spec).via_field("spec")
    }

    fn apply_defaults(&mut self) {
        let template = self.spec.template.get_or_insert_with(PodTemplateSpec::default);
        let pod = template.spec.get_or_insert_with(PodSpec::default);
        if pod.containers.is_empty() {
            pod.containers.push(PodContainer::default());
        }
        if pod.containers[0].name.is_empty() {
            pod.containers[0].name = FUNCTION_CONTAINER.to_string();
        }
    }
}

fn validate_processor_spec(spec: &ProcessorSpec) -> FieldErrors {
    if *spec == ProcessorSpec::default() {
        return missing_field(&[CURRENT_FIELD]);
    }

    let mut errs = FieldErrors::new();

    match spec
        .template
        .as_ref()
        .and_then(|t| t.spec.as_ref())
        .and_then(|s| s.containers.first())
    {
        None => errs = errs.also(missing_field(&["template.spec.containers"])),
        Some(container) if container.name != FUNCTION_CONTAINER => {
            errs = errs.also(invalid_value(&container.name, "template.spec.containers[0].name"));
        }
        Some(_) => {}
    }

    if spec.inputs.is_empty() {
        errs = errs.also(missing_field(&["inputs"]));
    }
    for (i, input) in spec.inputs.iter().enumerate() {
        errs = errs.also(validate_binding(input).via_field_index("inputs", i));
        if !matches!(input.start_offset.as_str(), "" | EARLIEST | LATEST) {
            errs = errs.also(invalid_value(&input.start_offset, &format!("inputs[{i}].startOffset")));
        }
    }
    for (i, output) in spec.outputs.iter().enumerate() {
        errs = errs.also(validate_binding(output).via_field_index("outputs", i));
    }

    errs.also(unique_aliases(&spec.inputs, "inputs"))
        .also(unique_aliases(&spec.outputs, "outputs"))
}

fn validate_binding(binding: &StreamBinding) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if binding.stream.is_empty() {
        errs = errs.also(missing_field(&["stream"]));
    }
    if binding.alias.is_empty() {
        errs = errs.also(missing_field(&["alias"]));
    }
    errs
}

/// One error per duplicated alias naming every use, in first-use order
fn unique_aliases(bindings: &[StreamBinding], list: &str) -> FieldErrors {
    let mut order: Vec<&str> = Vec::new();
    let mut uses: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (i, binding) in bindings.iter().enumerate() {
        let alias = binding.alias.as_str();
        let paths = uses.entry(alias).or_insert_with(|| {
            order.push(alias);
            Vec::new()
        });
        paths.push(format!("{list}[{i}].alias"));
    }

    order
        .into_iter()
        .filter_map(|alias| {
            let paths = uses.get(alias).filter(|paths| paths.len() > 1)?;
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            Some(duplicate_value(alias, &paths))
        })
        .fold(FieldErrors::new(), FieldErrors::also)
}

fn validate_build(source: Option<&Source>, cache_size: Option<&str>) -> FieldErrors {
    let mut errs = FieldErrors::new();
    match source {
        Some(source) => {
            if source.git.as_ref().is_some_and(|git| git.url.is_empty()) {
                errs = errs.also(missing_field(&["source.git.url"]));
            }
        }
        None => {
            if cache_size.is_some() {
                errs = errs.also(disallowed_fields(&["cacheSize"]));
            }
        }
    }
    errs
}

fn default_revision(source: Option<&mut Source>) {
    if let Some(git) = source.and_then(|s| s.git.as_mut()) {
        if git.revision.is_empty() {
            git.revision = DEFAULT_GIT_REVISION.to_string();
        }
    }
}

impl Admissible for Function {
    fn validate(&self) -> FieldErrors {
        validate_build(self.spec.source.as_ref(), self.spec.cache_size.as_deref()).via_field("spec")
    }

    fn apply_defaults(&mut self) {
        default_revision(self.spec.source.as_mut());
    }
}

impl Admissible for Application {
    fn validate(&self) -> FieldErrors {
        validate_build(self.spec.source.as_ref(), self.spec.cache_size.as_deref()).via_field("spec")
    }

    fn apply_defaults(&mut self) {
        default_revision(self.spec.source.as_mut());
    }
}

impl Admissible for Container {
    fn validate(&self) -> FieldErrors {
        FieldErrors::new()
    }
}

impl Admissible for PulsarGateway {
    fn validate(&self) -> FieldErrors {
        if self.spec.service_url.is_empty() {
            return missing_field(&["spec.serviceURL"]);
        }
        FieldErrors::new()
    }
}

impl Admissible for Deployer {
    fn validate(&self) -> FieldErrors {
        validate_deployer_spec(&self.spec).via_field("spec")
    }

    fn apply_defaults(&mut self) {
        let template = self.spec.template.get_or_insert_with(PodSpec::default);
        if template.containers.is_empty() {
            template.containers.push(PodContainer::default());
        }
    }
}

fn validate_deployer_spec(spec: &DeployerSpec) -> FieldErrors {
    if *spec == DeployerSpec::default() {
        return missing_field(&[CURRENT_FIELD]);
    }

    let mut errs = spec
        .template
        .as_ref()
        .map_or_else(FieldErrors::new, limited_template_fields);

    let image = spec
        .template
        .as_ref()
        .and_then(|t| t.containers.first())
        .and_then(|c| c.image.as_deref())
        .unwrap_or_default();
    let one_of = ["build", "template.containers[0].image"];
    match (&spec.build, image.is_empty()) {
        (None, true) => errs = errs.also(missing_one_of(&one_of)),
        (Some(_), false) => errs = errs.also(multiple_one_of(&one_of)),
        (Some(build), true) => errs = errs.also(validate_deployer_build(build).via_field("build")),
        (None, false) => {}
    }
    errs
}

/// Reject pod spec fields a Deployer does not support, and extra containers
fn limited_template_fields(template: &PodSpec) -> FieldErrors {
    let mut paths: Vec<String> = match serde_json::to_value(template) {
        Ok(Value::Object(fields)) => fields
            .keys()
            .filter(|key| !DEPLOYER_TEMPLATE_FIELDS.contains(&key.as_str()))
            .map(|key| format!("template.{key}"))
            .collect(),
        _ => Vec::new(),
    };
    paths.extend((1..template.containers.len()).map(|i| format!("template.containers[{i}]")));
    if paths.is_empty() {
        return FieldErrors::new();
    }
    let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
    disallowed_fields(&paths)
}

fn validate_deployer_build(build: &DeployerBuild) -> FieldErrors {
    let refs = [
        ("applicationRef", &build.application_ref),
        ("containerRef", &build.container_ref),
        ("functionRef", &build.function_ref),
    ];
    let used: Vec<&str> = refs
        .iter()
        .filter(|(_, name)| !name.is_empty())
        .map(|(field, _)| *field)
        .collect();
    match used.len() {
        0 => missing_one_of(&refs.map(|(field, _)| field)),
        1 => FieldErrors::new(),
        _ => multiple_one_of(&used),
    }
}

impl Admissible for KafkaProvider {
    fn validate(&self) -> FieldErrors {
        if self.spec == KafkaProviderSpec::default() {
            return missing_field(&["spec"]);
        }
        if self.spec.bootstrap_servers.is_empty() {
            return missing_field(&["spec.bootstrapServers"]);
        }
        FieldErrors::new()
    }
}

impl Admissible for InMemoryGateway {
    fn validate(&self) -> FieldErrors {
        FieldErrors::new()
    }
}
