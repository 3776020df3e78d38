use super::{resolve_target_image, BuildTarget, KpackBuild, KpackImageRole};
use crate::apis::{Application, Source, APPLICATION_BUILDER, APPLICATION_LABEL_KEY};
use crate::controller::reconciler::{ChildReconciler, ParentReconciler, ParentResource};

impl BuildTarget for Application {
    fn spec_image(&self) -> &str {
        &self.spec.image
    }

    fn set_target_image(&mut self, image: String) {
        self.status_mut().target_image = image;
    }
}

impl KpackBuild for Application {
    const LABEL_KEY: &'static str = APPLICATION_LABEL_KEY;
    const ROLE: &'static str = "application";
    const BUILDER: &'static str = APPLICATION_BUILDER;

    fn source(&self) -> Option<&Source> {
        self.spec.source.as_ref()
    }

    fn cache_size(&self) -> Option<&str> {
        self.spec.cache_size.as_deref()
    }
}

pub fn application_reconciler() -> ParentReconciler<Application> {
    ParentReconciler::new(vec![
        resolve_target_image::<Application>(),
        Box::new(ChildReconciler::new(KpackImageRole::<Application>::new())),
    ])
}
