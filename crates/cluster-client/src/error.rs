//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to a Kubernetes API server
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes client or API error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be turned into a client configuration
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// HTTP request/response error (health probes)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// API server returned an error
    #[error("API error: {0}")]
    Api(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClusterError {
    /// Classify a `kube::Error` for the object described by `what`.
    ///
    /// 404 and 409 responses become [`ClusterError::NotFound`] and
    /// [`ClusterError::AlreadyExists`]; everything else is kept as is.
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(what.into()),
            kube::Error::Api(ae) if ae.code == 409 => Self::AlreadyExists(what.into()),
            other => Self::Kube(other),
        }
    }

    /// True for [`ClusterError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for [`ClusterError::AlreadyExists`]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
