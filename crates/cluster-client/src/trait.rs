//! Cluster API seam
//!
//! Every remote read and write crinit performs against a host or aggregator
//! cluster goes through [`ClusterClientTrait`]. [`crate::ClusterClient`]
//! talks to a real API server; the `test-util` mock keeps objects in memory.

use crate::error::ClusterError;
use crate::object::ObjectRef;
use crds::Cluster;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;

/// Trait for the Kubernetes operations used while bootstrapping a registry
///
/// Create operations return the object as stored by the API server (with
/// server-populated fields such as allocated node ports), and map conflicts
/// to [`ClusterError::AlreadyExists`]. Lookups of missing objects map to
/// [`ClusterError::NotFound`].
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Kubeconfig context this client was built from
    fn context(&self) -> &str;

    /// API server URL, without a trailing slash
    fn server_url(&self) -> &str;

    // Core
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError>;
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError>;
    async fn create_persistent_volume_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ClusterError>;
    async fn create_service_account(&self, namespace: &str, account: &ServiceAccount) -> Result<ServiceAccount, ClusterError>;
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, ClusterError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError>;

    // Apps
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError>;

    // RBAC
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, ClusterError>;
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<ClusterRoleBinding, ClusterError>;
    async fn create_role_binding(&self, namespace: &str, binding: &RoleBinding) -> Result<RoleBinding, ClusterError>;

    // Aggregation
    async fn create_api_service(&self, api_service: &APIService) -> Result<APIService, ClusterError>;

    // Registry
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ClusterError>;

    /// Delete a previously created object
    async fn delete_object(&self, object: &ObjectRef) -> Result<(), ClusterError>;
}
