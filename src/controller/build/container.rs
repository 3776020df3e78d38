use super::{resolve_target_image, BuildTarget, TARGET_IMAGE};
use crate::apis::Container;
use crate::controller::reconciler::{ParentReconciler, ParentResource, SyncReconciler};

impl BuildTarget for Container {
    fn spec_image(&self) -> &str {
        &self.spec.image
    }

    fn set_target_image(&mut self, image: String) {
        self.status_mut().target_image = image;
    }
}

/// Container: resolve the image and report it as the latest image
///
/// Digests are not resolved, so the latest image is the target image.
pub fn container_reconciler() -> ParentReconciler<Container> {
    ParentReconciler::new(vec![
        resolve_target_image::<Container>(),
        Box::new(SyncReconciler::<Container>::new("LatestImage", |_ctx, parent, stash| {
            Box::pin(async move {
                if let Some(image) = stash.retrieve(&TARGET_IMAGE) {
                    parent.status_mut().latest_image.clone_from(image);
                }
                Ok(())
            })
        })),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::IMAGE_RESOLVED;
    use crate::testing::{factories, FakeRecorder, FakeStore};

    #[tokio::test]
    async fn test_latest_image_follows_target() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        store.seed(
            &factories::config_map("default", "riff-build")
                .data("default-image-prefix", "registry.example.com/team")
                .build(),
        );
        store.seed(&factories::container("default", "hello").build());
        let ctx = store.context(&recorder);

        container_reconciler()
            .reconcile(&ctx, Some("default"), "hello")
            .await
            .unwrap();

        let mut stored: Container = store.get_typed(Some("default"), "hello").unwrap();
        assert!(stored.conditions().is_happy());
        let status = stored.status.unwrap();
        assert_eq!(status.target_image, "registry.example.com/team/hello");
        assert_eq!(status.latest_image, "registry.example.com/team/hello");
    }

    #[tokio::test]
    async fn test_unresolved_image_keeps_previous_latest() {
        let store = FakeStore::new();
        let recorder = FakeRecorder::new();
        store.seed(
            &factories::container("default", "hello")
                .latest_image("registry.example.com/team/hello")
                .build(),
        );
        let ctx = store.context(&recorder);

        container_reconciler()
            .reconcile(&ctx, Some("default"), "hello")
            .await
            .unwrap_err();

        let mut stored: Container = store.get_typed(Some("default"), "hello").unwrap();
        assert!(stored.conditions().get_condition(IMAGE_RESOLVED).unwrap().is_false());
        assert_eq!(stored.status.unwrap().latest_image, "registry.example.com/team/hello");
    }
}
