//! # Streaming Reconcilers
//!
//! Reconcilers for `streaming.projectriff.io` resources.
//!
//! A Processor becomes a Deployment running the function next to a stream
//! sidecar, plus a KEDA ScaledObject scaling it on input lag. A
//! PulsarGateway becomes a Gateway configured for its Pulsar cluster.

mod processor;
mod pulsar_gateway;

pub use processor::{
    processor_reconciler, ProcessorDeploymentRole, ProcessorScaledObjectRole, INPUT_STREAMS, OUTPUT_STREAMS,
    PROCESSOR_IMAGES,
};
pub use pulsar_gateway::{pulsar_gateway_reconciler, PulsarGatewayRole};
