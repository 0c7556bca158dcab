//! Namespace creation

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::api::core::v1::Namespace;
use tracing::debug;

use super::object_meta;
use crate::error::CrinitError;

/// Build the registry namespace
pub fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: object_meta(None, name),
        ..Default::default()
    }
}

/// Create namespace `name`; AlreadyExists is an error
pub async fn create_namespace(
    client: &dyn ClusterClientTrait,
    name: &str,
    dry_run: bool,
) -> Result<Namespace, CrinitError> {
    let namespace = build_namespace(name);
    if dry_run {
        return Ok(namespace);
    }

    debug!(namespace = %name, context = %client.context(), "Creating namespace");
    client
        .create_namespace(&namespace)
        .await
        .map_err(|e| CrinitError::create(ObjectRef::cluster_scoped(ObjectKind::Namespace, name), e))
}

/// Make sure namespace `name` exists.
///
/// Returns `Some` only when this call created it, so callers can tell
/// whether the namespace is theirs to delete.
pub async fn ensure_namespace(
    client: &dyn ClusterClientTrait,
    name: &str,
    dry_run: bool,
) -> Result<Option<Namespace>, CrinitError> {
    match create_namespace(client, name, dry_run).await {
        Ok(namespace) => Ok(Some(namespace)),
        Err(CrinitError::Step { source, .. }) if source.is_already_exists() => {
            debug!(namespace = %name, context = %client.context(), "Namespace already exists");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
