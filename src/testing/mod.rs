//! # Test Support
//!
//! In-memory collaborators for exercising reconcilers without a cluster.
//!
//! - [`FakeStore`]: an [`ObjectStore`](crate::controller::ObjectStore) that
//!   assigns names, uids and resource versions like the API server
//! - [`FakeRecorder`]: captures events for assertions
//! - [`factories`]: fluent builders for seeded objects

pub mod factories;
mod recorder;
mod store;

pub use recorder::{FakeRecorder, RecordedEvent};
pub use store::{Action, FakeStore};
