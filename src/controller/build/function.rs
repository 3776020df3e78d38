use super::{resolve_target_image, BuildTarget, KpackBuild, KpackImageRole};
use crate::apis::{Function, Source, FUNCTION_BUILDER, FUNCTION_LABEL_KEY};
use crate::controller::reconciler::{ChildReconciler, ParentReconciler, ParentResource};
use k8s_openapi::api::core::v1::EnvVar;

impl BuildTarget for Function {
    fn spec_image(&self) -> &str {
        &self.spec.image
    }

    fn set_target_image(&mut self, image: String) {
        self.status_mut().target_image = image;
    }
}

impl KpackBuild for Function {
    const LABEL_KEY: &'static str = FUNCTION_LABEL_KEY;
    const ROLE: &'static str = "function";
    const BUILDER: &'static str = FUNCTION_BUILDER;

    fn source(&self) -> Option<&Source> {
        self.spec.source.as_ref()
    }

    fn cache_size(&self) -> Option<&str> {
        self.spec.cache_size.as_deref()
    }

    /// Tells the function buildpack which artifact, handler and invoker to use
    fn build_env(&self) -> Vec<EnvVar> {
        [
            ("RIFF", "true"),
            ("RIFF_ARTIFACT", self.spec.artifact.as_str()),
            ("RIFF_HANDLER", self.spec.handler.as_str()),
            ("RIFF_OVERRIDE", self.spec.invoker.as_str()),
        ]
        .into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        })
        .collect()
    }
}

/// Function: resolve the target image, then build it with kpack
pub fn function_reconciler() -> ParentReconciler<Function> {
    ParentReconciler::new(vec![
        resolve_target_image::<Function>(),
        Box::new(ChildReconciler::new(KpackImageRole::<Function>::new())),
    ])
}
