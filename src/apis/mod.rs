//! # API Types
//!
//! Custom resources reconciled by this controller, plus the minimal shapes of
//! the kpack and KEDA resources it writes and reads.
//!
//! - `build.projectriff.io/v1alpha1`: [`Function`], [`Application`], [`Container`]
//! - `streaming.projectriff.io/v1alpha1`: [`Processor`], [`Stream`], [`Gateway`], [`PulsarGateway`]
//! - `streaming.projectriff.io/v1alpha1`, admitted only: [`KafkaProvider`], [`InMemoryGateway`]
//! - `knative.projectriff.io/v1alpha1`, admitted only: [`Deployer`]
//! - `kpack.io/v1alpha1`: [`Image`], [`ClusterBuilder`]
//! - `keda.k8s.io/v1alpha1`: [`ScaledObject`]

/// Implements `ConditionedStatus` for a status struct with `conditions`
/// and `observed_generation` fields.
macro_rules! conditioned_status {
    ($status:ty) => {
        impl $crate::controller::reconciler::ConditionedStatus for $status {
            fn conditions(&self) -> &[$crate::apis::condition::Condition] {
                &self.conditions
            }

            fn conditions_mut(&mut self) -> &mut Vec<$crate::apis::condition::Condition> {
                &mut self.conditions
            }

            fn set_observed_generation(&mut self, generation: Option<i64>) {
                self.observed_generation = generation;
            }
        }
    };
}

/// Implements `ParentResource` for a kube-derived custom resource.
macro_rules! parent_resource {
    ($kind:ty, $status:ty, $conditions:expr) => {
        impl $crate::controller::reconciler::ParentResource for $kind {
            type Status = $status;

            fn condition_set() -> &'static $crate::apis::condition::ConditionSet {
                &$conditions
            }

            fn status(&self) -> Option<&$status> {
                self.status.as_ref()
            }

            fn status_mut(&mut self) -> &mut $status {
                self.status.get_or_insert_with(Default::default)
            }
        }
    };
}

pub mod build;
pub mod condition;
pub mod keda;
pub mod knative;
pub mod kpack;
pub mod refs;
pub mod streaming;

pub use build::*;
pub use condition::{Condition, ConditionManager, ConditionSet, ConditionStatus, READY};
pub use keda::*;
pub use knative::*;
pub use kpack::*;
pub use refs::{LocalObjectReference, TypedLocalObjectReference};
pub use streaming::*;
