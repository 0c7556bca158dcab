//! Kubernetes-backed ClusterClient
//!
//! Thin wrapper around `kube::Api` that classifies API errors and records
//! which kubeconfig context it talks to.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::object::{ObjectKind, ObjectRef};
use crds::Cluster;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Client for one Kubernetes cluster, selected by kubeconfig context
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    context: String,
    server_url: String,
}

impl ClusterClient {
    /// Wrap an existing `kube::Client`
    pub fn new(client: Client, context: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            client,
            context: context.into(),
            server_url: server_url.into(),
        }
    }

    /// Build a client for `context` out of an already loaded kubeconfig
    pub async fn from_kubeconfig(kubeconfig: Kubeconfig, context: &str) -> Result<Self, ClusterError> {
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
        let server_url = config.cluster_url.to_string().trim_end_matches('/').to_string();
        debug!(context, server = %server_url, "Building Kubernetes client");

        let client = Client::try_from(config)?;
        Ok(Self::new(client, context, server_url))
    }

    /// Underlying `kube::Client`
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn create<K>(&self, api: Api<K>, object: &K, what: ObjectRef) -> Result<K, ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        debug!(context = %self.context, object = %what, "Creating object");
        api.create(&PostParams::default(), object)
            .await
            .map_err(|e| ClusterError::from_kube(e, what.to_string()))
    }

    async fn get<K>(&self, api: Api<K>, what: ObjectRef) -> Result<K, ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        api.get(&what.name)
            .await
            .map_err(|e| ClusterError::from_kube(e, what.to_string()))
    }

    async fn delete<K>(&self, api: Api<K>, what: &ObjectRef) -> Result<(), ClusterError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        debug!(context = %self.context, object = %what, "Deleting object");
        api.delete(&what.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube(e, what.to_string()))
    }

    fn namespaced_ref<K: Resource>(kind: ObjectKind, namespace: &str, object: &K) -> ObjectRef {
        ObjectRef::namespaced(kind, namespace, object.name_any())
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for ClusterClient {
    fn context(&self) -> &str {
        &self.context
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::Namespace, namespace.name_any());
        self.create(Api::all(self.client.clone()), namespace, what).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        let what = Self::namespaced_ref(ObjectKind::Service, namespace, service);
        self.create(Api::namespaced(self.client.clone(), namespace), service, what).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::Service, namespace, name);
        self.get(Api::namespaced(self.client.clone(), namespace), what).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let what = Self::namespaced_ref(ObjectKind::Secret, namespace, secret);
        self.create(Api::namespaced(self.client.clone(), namespace), secret, what).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::Secret, namespace, name);
        self.get(Api::namespaced(self.client.clone(), namespace), what).await
    }

    async fn create_persistent_volume_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ClusterError> {
        let what = Self::namespaced_ref(ObjectKind::PersistentVolumeClaim, namespace, claim);
        self.create(Api::namespaced(self.client.clone(), namespace), claim, what).await
    }

    async fn create_service_account(&self, namespace: &str, account: &ServiceAccount) -> Result<ServiceAccount, ClusterError> {
        let what = Self::namespaced_ref(ObjectKind::ServiceAccount, namespace, account);
        self.create(Api::namespaced(self.client.clone(), namespace), account, what).await
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::ServiceAccount, namespace, name);
        self.get(Api::namespaced(self.client.clone(), namespace), what).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let what = Self::namespaced_ref(ObjectKind::Deployment, namespace, deployment);
        self.create(Api::namespaced(self.client.clone(), namespace), deployment, what).await
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::ClusterRole, role.name_any());
        self.create(Api::all(self.client.clone()), role, what).await
    }

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<ClusterRoleBinding, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::ClusterRoleBinding, binding.name_any());
        self.create(Api::all(self.client.clone()), binding, what).await
    }

    async fn create_role_binding(&self, namespace: &str, binding: &RoleBinding) -> Result<RoleBinding, ClusterError> {
        let what = Self::namespaced_ref(ObjectKind::RoleBinding, namespace, binding);
        self.create(Api::namespaced(self.client.clone(), namespace), binding, what).await
    }

    async fn create_api_service(&self, api_service: &APIService) -> Result<APIService, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::ApiService, api_service.name_any());
        self.create(Api::all(self.client.clone()), api_service, what).await
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, ClusterError> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), ClusterError> {
        if object.kind.is_namespaced() && object.namespace.is_none() {
            return Err(ClusterError::InvalidRequest(format!("{object} has no namespace")));
        }
        let client = self.client.clone();
        let namespace = object.namespace.as_deref().unwrap_or_default();
        match object.kind {
            ObjectKind::Namespace => self.delete::<Namespace>(Api::all(client), object).await,
            ObjectKind::Service => self.delete::<Service>(Api::namespaced(client, namespace), object).await,
            ObjectKind::Secret => self.delete::<Secret>(Api::namespaced(client, namespace), object).await,
            ObjectKind::PersistentVolumeClaim => {
                self.delete::<PersistentVolumeClaim>(Api::namespaced(client, namespace), object).await
            }
            ObjectKind::Deployment => self.delete::<Deployment>(Api::namespaced(client, namespace), object).await,
            ObjectKind::ServiceAccount => {
                self.delete::<ServiceAccount>(Api::namespaced(client, namespace), object).await
            }
            ObjectKind::ClusterRole => self.delete::<ClusterRole>(Api::all(client), object).await,
            ObjectKind::ClusterRoleBinding => self.delete::<ClusterRoleBinding>(Api::all(client), object).await,
            ObjectKind::RoleBinding => self.delete::<RoleBinding>(Api::namespaced(client, namespace), object).await,
            ObjectKind::ApiService => self.delete::<APIService>(Api::all(client), object).await,
        }
    }
}
