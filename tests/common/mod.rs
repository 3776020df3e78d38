//! Shared fixtures for the reconcile scenario tests
//!
//! Every scenario runs against the in-memory store with a single context,
//! so the tracker built up by one pass is visible to the next.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use riff_system_controller::apis::Stream;
use riff_system_controller::constants::{
    BUILD_CONFIGMAP, DEFAULT_IMAGE_PREFIX_KEY, PROCESSOR_IMAGES_CONFIGMAP, PROCESSOR_IMAGE_KEY,
};
use riff_system_controller::controller::reconciler::ReconcileContext;
use riff_system_controller::testing::{factories, Action, FakeRecorder, FakeStore};

pub const NAMESPACE: &str = "default";
pub const SYSTEM_NAMESPACE: &str = "riff-system";

pub struct Harness {
    pub store: FakeStore,
    pub recorder: FakeRecorder,
    pub ctx: ReconcileContext,
}

impl Harness {
    pub fn new() -> Self {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        let ctx = store.context(&recorder);
        Self { store, recorder, ctx }
    }

    pub fn seed_image_prefix(&self, prefix: &str) {
        self.store.seed(
            &factories::config_map(NAMESPACE, BUILD_CONFIGMAP)
                .data(DEFAULT_IMAGE_PREFIX_KEY, prefix)
                .build(),
        );
    }

    pub fn seed_processor_image(&self, image: &str) {
        self.store.seed(
            &factories::config_map(SYSTEM_NAMESPACE, PROCESSOR_IMAGES_CONFIGMAP)
                .data(PROCESSOR_IMAGE_KEY, image)
                .build(),
        );
    }

    /// Seed a ready stream bound to `{name}-binding-metadata` and `{name}-binding-secret`
    pub fn seed_stream(&self, name: &str, uid: &str) -> Stream {
        self.store.seed(
            &factories::secret(NAMESPACE, &format!("{name}-binding-secret"))
                .data("gateway", &format!("{name}-gateway.{NAMESPACE}:6565"))
                .data("topic", &format!("{NAMESPACE}/{name}"))
                .build(),
        );
        self.store.seed(
            &factories::stream(NAMESPACE, name)
                .uid(uid)
                .binding(&format!("{name}-binding-metadata"), &format!("{name}-binding-secret"))
                .ready()
                .build(),
        )
    }

    /// Recorded store calls for `verb` on `kind`
    pub fn actions(&self, verb: &str, kind: &str) -> Vec<Action> {
        self.store
            .actions()
            .into_iter()
            .filter(|a| a.verb == verb && a.kind == kind)
            .collect()
    }
}
