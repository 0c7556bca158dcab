//! crinit error types.
//!
//! Validation errors carry the exact user-facing message. Remote failures keep
//! the underlying `ClusterError` as their source so `{:#}` formatting prints
//! the full chain.

use std::time::Duration;

use cluster_client::{ClusterError, ObjectRef};
use thiserror::Error;

use crate::credentials::PkiError;

/// Errors that can occur while bootstrapping or deleting a cluster registry.
#[derive(Debug, Error)]
pub enum CrinitError {
    /// Invalid flag or flag combination, detected before any remote call
    #[error("{0}")]
    Validation(String),

    /// Kubernetes API error outside of a specific provisioning step
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Certificate or key generation failed
    #[error("credential generation failed: {0}")]
    Pki(#[from] PkiError),

    /// Kubeconfig could not be read, parsed or used
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Filesystem error (kubeconfig writes)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A readiness wait hit its deadline without a more specific error
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// A readiness wait hit its deadline; `source` is the last error observed
    #[error("{what}")]
    Poll {
        what: String,
        #[source]
        source: ClusterError,
    },

    /// Creating or deleting a specific object failed
    #[error("failed to {action} {object}")]
    Step {
        action: &'static str,
        object: ObjectRef,
        #[source]
        source: ClusterError,
    },
}

impl CrinitError {
    /// Wrap a create failure with the object it concerned
    pub fn create(object: ObjectRef, source: ClusterError) -> Self {
        Self::Step {
            action: "create",
            object,
            source,
        }
    }

    /// Wrap a delete failure with the object it concerned
    pub fn delete(object: ObjectRef, source: ClusterError) -> Self {
        Self::Step {
            action: "delete",
            object,
            source,
        }
    }

    /// Shorthand for a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
