//! # Controller
//!
//! Reconciliation engine and the per-resource reconcilers.
//!
//! - `backoff`: Exponential backoff for failed reconciles
//! - `client`: Object CRUD boundary and typed client
//! - `diff`: Semantic equality and label merging
//! - `error`: Error taxonomy
//! - `events`: Kubernetes Events
//! - `reconciler`: Parent, sync and child sub-reconcilers
//! - `stash`: Typed per-pass value registry
//! - `tracker`: Watched object to parent index
//! - `build`: Function, Application, Container and ClusterBuilder reconcilers
//! - `streaming`: Processor and PulsarGateway reconcilers

pub mod backoff;
pub mod build;
pub mod client;
pub mod diff;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod stash;
pub mod streaming;
pub mod tracker;

pub use error::{Error, Result};
