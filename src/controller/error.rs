//! # Errors
//!
//! Error type shared by the object store, the reconciler framework and the
//! resource reconcilers.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while reconciling
#[derive(Debug, Error)]
pub enum Error {
    /// Object does not exist
    #[error("{kind} \"{name}\" not found in namespace \"{namespace}\"")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Create collided with an existing object of the same name
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    /// Update carried a stale resourceVersion
    #[error("operation cannot be fulfilled on {kind} \"{name}\": the object has been modified")]
    Conflict { kind: String, name: String },

    /// A well-known ConfigMap or one of its keys is missing
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// No admission handlers are registered for the kind
    #[error("no admission handlers registered for kind {0}")]
    UnknownKind(String),

    /// Admission request failed validation
    #[error("validation failed:\n{0}")]
    Invalid(#[from] crate::validation::FieldErrors),

    /// Kubernetes API error that is not classified above
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object could not be converted between typed and dynamic form
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Classify a kube client error for the named object
    pub fn from_kube(err: kube::Error, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                namespace: namespace.unwrap_or_default().to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => Self::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether requeueing can be expected to make progress
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyExists { .. } | Self::UnknownKind(_) | Self::Invalid(_) | Self::Serialization(_)
        )
    }

    /// Name of the object an AlreadyExists error collided with
    pub fn already_exists_name(&self) -> Option<&str> {
        match self {
            Self::AlreadyExists { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Suggested requeue delay when no per-resource backoff is available
    pub fn requeue_delay(&self) -> Duration {
        match self {
            Self::Conflict { .. } => Duration::from_secs(1),
            Self::NotFound { .. } | Self::MissingConfig(_) => Duration::from_secs(30),
            _ => Duration::from_secs(10),
        }
    }
}

/// Result type for reconciler operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        let not_found = Error::NotFound {
            kind: "Stream".to_string(),
            namespace: "default".to_string(),
            name: "letters".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(not_found.is_retryable());
        assert_eq!(
            not_found.to_string(),
            "Stream \"letters\" not found in namespace \"default\""
        );

        let exists = Error::AlreadyExists {
            kind: "Gateway".to_string(),
            name: "my-gateway".to_string(),
        };
        assert!(exists.is_already_exists());
        assert!(!exists.is_retryable());
        assert_eq!(exists.already_exists_name(), Some("my-gateway"));

        let conflict = Error::Conflict {
            kind: "Deployment".to_string(),
            name: "p-processor-000".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());
        assert_eq!(conflict.requeue_delay(), Duration::from_secs(1));
    }
}
