//! # Validation
//!
//! Admission validation and defaulting for riff resources.
//!
//! - `field`: Field error shape and path prefixing
//! - `rules`: Per-kind rules ([`Admissible`])
//! - `registry`: Kind to handler dispatch ([`AdmissionRegistry`])

pub mod field;
mod registry;
mod rules;

pub use field::{FieldError, FieldErrors};
pub use registry::AdmissionRegistry;
pub use rules::{Admissible, DEFAULT_GIT_REVISION, FUNCTION_CONTAINER};
