//! RBAC objects for an aggregated registry
//!
//! All of these are created in the aggregator cluster. They let the
//! registry's service account delegate authentication and authorization
//! to the aggregator and manage `clusters`.

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding, RoleRef, Subject};

use super::{API_GROUP, object_meta};
use crate::error::CrinitError;

pub const SERVICE_ACCOUNT_NAME: &str = "clusterregistry-k8s-io-apiserver";
pub const CLUSTER_ROLE_NAME: &str = "clusterregistry.k8s.io:apiserver";
pub const AUTH_DELEGATOR_BINDING_NAME: &str = "clusterregistry.k8s.io:apiserver-auth-delegator";
pub const AUTH_READER_BINDING_NAME: &str = "clusterregistry.k8s.io:extension-apiserver-authentication-reader";
pub const AUTH_DELEGATOR_ROLE: &str = "system:auth-delegator";
pub const AUTH_READER_ROLE: &str = "extension-apiserver-authentication-reader";
pub const AUTH_READER_NAMESPACE: &str = "kube-system";

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const CLUSTER_VERBS: [&str; 7] = ["get", "list", "watch", "create", "update", "patch", "delete"];

fn registry_subject(namespace: &str) -> Vec<Subject> {
    vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: SERVICE_ACCOUNT_NAME.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }]
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

pub fn build_service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(Some(namespace), SERVICE_ACCOUNT_NAME),
        ..Default::default()
    }
}

pub fn build_cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: object_meta(None, CLUSTER_ROLE_NAME),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![API_GROUP.to_string()]),
            resources: Some(vec!["clusters".to_string()]),
            verbs: CLUSTER_VERBS.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Binding of the registry service account to cluster role `role`
pub fn build_cluster_role_binding(name: &str, role: &str, namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: object_meta(None, name),
        role_ref: role_ref("ClusterRole", role),
        subjects: Some(registry_subject(namespace)),
    }
}

/// Lets the service account read the `extension-apiserver-authentication`
/// config map in `kube-system`
pub fn build_auth_reader_role_binding(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(Some(AUTH_READER_NAMESPACE), AUTH_READER_BINDING_NAME),
        role_ref: role_ref("Role", AUTH_READER_ROLE),
        subjects: Some(registry_subject(namespace)),
    }
}

pub async fn create_service_account(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    dry_run: bool,
) -> Result<ServiceAccount, CrinitError> {
    let account = build_service_account(namespace);
    if dry_run {
        return Ok(account);
    }
    client.create_service_account(namespace, &account).await.map_err(|e| {
        CrinitError::create(
            ObjectRef::namespaced(ObjectKind::ServiceAccount, namespace, SERVICE_ACCOUNT_NAME),
            e,
        )
    })
}

pub async fn create_cluster_role(client: &dyn ClusterClientTrait, dry_run: bool) -> Result<ClusterRole, CrinitError> {
    let role = build_cluster_role();
    if dry_run {
        return Ok(role);
    }
    client
        .create_cluster_role(&role)
        .await
        .map_err(|e| CrinitError::create(ObjectRef::cluster_scoped(ObjectKind::ClusterRole, CLUSTER_ROLE_NAME), e))
}

pub async fn create_cluster_role_binding(
    client: &dyn ClusterClientTrait,
    name: &str,
    role: &str,
    namespace: &str,
    dry_run: bool,
) -> Result<ClusterRoleBinding, CrinitError> {
    let binding = build_cluster_role_binding(name, role, namespace);
    if dry_run {
        return Ok(binding);
    }
    client
        .create_cluster_role_binding(&binding)
        .await
        .map_err(|e| CrinitError::create(ObjectRef::cluster_scoped(ObjectKind::ClusterRoleBinding, name), e))
}

pub async fn create_auth_reader_role_binding(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    dry_run: bool,
) -> Result<RoleBinding, CrinitError> {
    let binding = build_auth_reader_role_binding(namespace);
    if dry_run {
        return Ok(binding);
    }
    client.create_role_binding(AUTH_READER_NAMESPACE, &binding).await.map_err(|e| {
        CrinitError::create(
            ObjectRef::namespaced(ObjectKind::RoleBinding, AUTH_READER_NAMESPACE, AUTH_READER_BINDING_NAME),
            e,
        )
    })
}
