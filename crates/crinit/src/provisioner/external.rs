//! Cross-cluster wiring
//!
//! When the registry runs outside the aggregator's cluster, the aggregator
//! reaches it through an ExternalName service, and the registry reaches the
//! aggregator with a kubeconfig built from its service account token.

use std::collections::BTreeMap;
use std::io::Write;

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceSpec};
use tracing::debug;

use super::secret::create_secret;
use super::{CA_CERT_KEY, KUBECONFIG_SECRET_KEY, object_meta};
use crate::error::CrinitError;
use crate::kubeconfig::build_aggregator_kubeconfig;
use crate::poller::{PollSettings, wait_for_service_account_token};

pub const TOKEN_KEY: &str = "token";

/// Build an ExternalName service resolving to `canonical_name`
pub fn build_external_name_service(namespace: &str, name: &str, canonical_name: &str) -> Service {
    Service {
        metadata: object_meta(Some(namespace), name),
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(canonical_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Make sure the aggregator has a service `name` for the registry.
///
/// An existing service is reused as is. Returns the service and whether this
/// call created it. Dry run reads nothing and reports it as created.
pub async fn ensure_external_name_service(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    name: &str,
    canonical_name: &str,
    dry_run: bool,
) -> Result<(Service, bool), CrinitError> {
    let service = build_external_name_service(namespace, name, canonical_name);
    if dry_run {
        return Ok((service, true));
    }

    let what = ObjectRef::namespaced(ObjectKind::Service, namespace, name);
    match client.get_service(namespace, name).await {
        Ok(existing) => {
            debug!(service = %what, context = %client.context(), "Reusing existing service in aggregator");
            Ok((existing, false))
        }
        Err(e) if e.is_not_found() => {
            let created = client
                .create_service(namespace, &service)
                .await
                .map_err(|e| CrinitError::create(what, e))?;
            Ok((created, true))
        }
        Err(e) => Err(CrinitError::Cluster(e)),
    }
}

/// Build the aggregator kubeconfig from the service account token secret
/// and store it, with its CA, in `name` on the host cluster.
///
/// In dry run the token does not exist yet, so the secret is returned
/// without data.
#[allow(clippy::too_many_arguments, reason = "host and aggregator each need their own client, names and poll settings")]
pub async fn create_aggregator_kubeconfig_secret(
    host: &dyn ClusterClientTrait,
    aggregator: &dyn ClusterClientTrait,
    out: &mut dyn Write,
    namespace: &str,
    name: &str,
    service_account: &str,
    token_poll: PollSettings,
    dry_run: bool,
) -> Result<Secret, CrinitError> {
    if dry_run {
        return create_secret(host, namespace, name, BTreeMap::new(), true).await;
    }

    let token_secret = wait_for_service_account_token(aggregator, out, namespace, service_account, token_poll).await?;
    let data = token_secret.data.unwrap_or_default();
    let (Some(token), Some(ca)) = (data.get(TOKEN_KEY), data.get(CA_CERT_KEY)) else {
        return Err(CrinitError::Kubeconfig(
            "secret missing either or both of 'ca.crt' and 'token' in its Data".to_string(),
        ));
    };
    let token = std::str::from_utf8(&token.0)
        .map_err(|e| CrinitError::Kubeconfig(format!("service account token is not UTF-8: {e}")))?;

    let kubeconfig = build_aggregator_kubeconfig(aggregator.server_url(), token, &ca.0)?;
    let data = BTreeMap::from([
        (
            KUBECONFIG_SECRET_KEY.to_string(),
            ByteString(serde_yaml::to_string(&kubeconfig)?.into_bytes()),
        ),
        (CA_CERT_KEY.to_string(), ca.clone()),
    ]);
    create_secret(host, namespace, name, data, false).await
}
