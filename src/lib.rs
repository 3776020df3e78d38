//! riff System Controller Library
//!
//! Kubernetes controllers for riff: Functions, Applications and Containers
//! build into images through kpack, Processors run as Deployments scaled by
//! KEDA, and PulsarGateways run as streaming Gateways.
//!
//! Tests are included in the module files and under `tests/`.

pub mod apis;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod testing;
pub mod validation;
