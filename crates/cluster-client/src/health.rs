//! Registry health probing
//!
//! The registry API server answers `GET /healthz` with the literal body `ok`
//! once it is serving. Probing goes over TLS, trusting only the CA generated
//! for the registry, and authenticates with the credentials written to the
//! user's kubeconfig.

use crate::error::ClusterError;
use tracing::debug;

/// Credentials presented to the registry when probing its health endpoint
///
/// Mirrors the admin entry written to the kubeconfig: a client certificate,
/// plus a bearer token when token auth is enabled.
#[derive(Clone)]
pub struct HealthCredentials {
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub token: Option<String>,
}

impl std::fmt::Debug for HealthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCredentials")
            .field("client_cert_pem", &"..")
            .field("token", &self.token.as_ref().map(|_| ".."))
            .finish_non_exhaustive()
    }
}

/// Trait for probing a registry's health endpoint
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    /// Fetch the health endpoint and return its body
    async fn healthz(&self) -> Result<String, ClusterError>;
}

/// reqwest-backed health probe
#[derive(Clone)]
pub struct HttpsHealthProbe {
    client: reqwest::Client,
    url: String,
    credentials: HealthCredentials,
}

impl HttpsHealthProbe {
    /// Create a probe for `endpoint` (e.g. `https://10.0.0.1:30443`)
    ///
    /// Only `ca_pem` is trusted when verifying the server certificate.
    pub fn new(endpoint: &str, ca_pem: &str, credentials: HealthCredentials) -> Result<Self, ClusterError> {
        let ca_cert = reqwest::Certificate::from_pem(ca_pem.as_bytes())
            .map_err(|e| ClusterError::InvalidRequest(format!("Invalid CA certificate: {e}")))?;

        let bundle = format!("{}\n{}", credentials.client_cert_pem, credentials.client_key_pem);
        let identity = reqwest::Identity::from_pem(bundle.as_bytes())
            .map_err(|e| ClusterError::InvalidRequest(format!("Invalid client identity: {e}")))?;

        let client = reqwest::Client::builder()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca_cert)
            .identity(identity)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/healthz", endpoint.trim_end_matches('/')),
            credentials,
        })
    }

    /// URL the probe requests
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl HealthProbe for HttpsHealthProbe {
    async fn healthz(&self) -> Result<String, ClusterError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.credentials.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(url = %self.url, %status, "Health probe response");

        if !status.is_success() {
            return Err(ClusterError::Api(format!("{}: {} - {}", self.url, status, body)));
        }
        Ok(body)
    }
}
