//! In-memory cluster for crinit tests
//!
//! [`MockClusterClient`] acts as a small API server. Created objects are
//! stored, creating an existing object returns `AlreadyExists`, and deleting
//! a missing one returns `NotFound`. It can also allocate node ports, publish
//! load balancer ingress, mint service account tokens and fail chosen calls.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::health::HealthProbe;
use crate::object::{ObjectKind, ObjectRef};
use crds::Cluster;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Namespace, Node, NodeAddress, NodeStatus,
    ObjectReference, PersistentVolumeClaim, Pod, PodStatus, Secret, Service, ServiceAccount,
    ServiceStatus,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::Resource;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Store<K> = Arc<Mutex<BTreeMap<(String, String), K>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Injected failure for one operation
#[derive(Debug, Clone)]
struct Failure {
    message: String,
    // None fails forever, Some(n) fails the next n calls
    remaining: Option<usize>,
}

/// Load balancer ingress that shows up after a number of service reads
#[derive(Debug, Clone)]
struct PendingIngress {
    ingress: Vec<LoadBalancerIngress>,
    after_reads: usize,
}

/// Token minted for every new service account
#[derive(Debug, Clone)]
struct TokenController {
    token: String,
    ca_pem: String,
}

/// Cluster whose objects live in memory
///
/// Clones share state, so a test can hand one clone to the code under test
/// and inspect another. Every trait call is appended to a call log
/// (`"<operation> <target>"`) so tests can assert on what was sent and in
/// which order.
#[derive(Clone)]
pub struct MockClusterClient {
    context: String,
    server_url: String,
    // In-memory storage keyed by (namespace, name); cluster-scoped objects use ""
    namespaces: Store<Namespace>,
    services: Store<Service>,
    secrets: Store<Secret>,
    claims: Store<PersistentVolumeClaim>,
    deployments: Store<Deployment>,
    service_accounts: Store<ServiceAccount>,
    cluster_roles: Store<ClusterRole>,
    cluster_role_bindings: Store<ClusterRoleBinding>,
    role_bindings: Store<RoleBinding>,
    api_services: Store<APIService>,
    nodes: Arc<Mutex<Vec<Node>>>,
    pods: Arc<Mutex<Vec<Pod>>>,
    clusters: Arc<Mutex<Vec<Cluster>>>,
    // Behaviour knobs
    calls: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, Failure>>>,
    pending_ingress: Arc<Mutex<Option<PendingIngress>>>,
    service_reads: Arc<Mutex<usize>>,
    token_controller: Arc<Mutex<Option<TokenController>>>,
    next_node_port: Arc<Mutex<i32>>,
}

impl MockClusterClient {
    /// Create a new mock client for `context`
    pub fn new(context: impl Into<String>) -> Self {
        let context = context.into();
        Self {
            server_url: format!("https://{context}.example:6443"),
            context,
            namespaces: Arc::default(),
            services: Arc::default(),
            secrets: Arc::default(),
            claims: Arc::default(),
            deployments: Arc::default(),
            service_accounts: Arc::default(),
            cluster_roles: Arc::default(),
            cluster_role_bindings: Arc::default(),
            role_bindings: Arc::default(),
            api_services: Arc::default(),
            nodes: Arc::default(),
            pods: Arc::default(),
            clusters: Arc::default(),
            calls: Arc::default(),
            failures: Arc::default(),
            pending_ingress: Arc::default(),
            service_reads: Arc::default(),
            token_controller: Arc::default(),
            next_node_port: Arc::new(Mutex::new(30000)),
        }
    }

    /// Override the API server URL reported by [`ClusterClientTrait::server_url`]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Add a node with the given `(type, address)` pairs (for test setup)
    pub fn add_node(&self, name: &str, addresses: &[(&str, &str)]) {
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(type_, address)| NodeAddress {
                            type_: type_.to_string(),
                            address: address.to_string(),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        lock(&self.nodes).push(node);
    }

    /// Add a pod in `phase` carrying `labels` (for test setup)
    pub fn add_pod(&self, namespace: &str, name: &str, labels: &[(&str, &str)], phase: &str) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        lock(&self.pods).push(pod);
    }

    /// Add a registry cluster object (for test setup)
    pub fn add_cluster(&self, cluster: Cluster) {
        lock(&self.clusters).push(cluster);
    }

    /// Add a secret directly to the store (for test setup)
    pub fn add_secret(&self, namespace: &str, secret: Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        lock(&self.secrets).insert((namespace.to_string(), name), secret);
    }

    /// Fail every call to `operation` with an API error
    pub fn fail_on(&self, operation: &str, message: &str) {
        lock(&self.failures).insert(
            operation.to_string(),
            Failure {
                message: message.to_string(),
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls to `operation`, then succeed
    pub fn fail_times(&self, operation: &str, times: usize, message: &str) {
        lock(&self.failures).insert(
            operation.to_string(),
            Failure {
                message: message.to_string(),
                remaining: Some(times),
            },
        );
    }

    /// Populate load balancer ingress on LoadBalancer services once they
    /// have been read `after_reads` times
    pub fn set_load_balancer_ingress(&self, ingress: Vec<LoadBalancerIngress>, after_reads: usize) {
        *lock(&self.pending_ingress) = Some(PendingIngress { ingress, after_reads });
    }

    /// Mint a token secret for every service account created, the way the
    /// token controller of a real cluster does
    pub fn with_token_controller(self, token: &str, ca_pem: &str) -> Self {
        *lock(&self.token_controller) = Some(TokenController {
            token: token.to_string(),
            ca_pem: ca_pem.to_string(),
        });
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Calls that create or delete objects, in order
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("create_") || c.starts_with("delete_"))
            .collect()
    }

    /// References to every object currently stored
    pub fn objects(&self) -> BTreeSet<ObjectRef> {
        fn collect<K>(out: &mut BTreeSet<ObjectRef>, store: &Store<K>, kind: ObjectKind) {
            for (namespace, name) in lock(store).keys() {
                out.insert(if kind.is_namespaced() {
                    ObjectRef::namespaced(kind, namespace, name)
                } else {
                    ObjectRef::cluster_scoped(kind, name)
                });
            }
        }

        let mut out = BTreeSet::new();
        collect(&mut out, &self.namespaces, ObjectKind::Namespace);
        collect(&mut out, &self.services, ObjectKind::Service);
        collect(&mut out, &self.secrets, ObjectKind::Secret);
        collect(&mut out, &self.claims, ObjectKind::PersistentVolumeClaim);
        collect(&mut out, &self.deployments, ObjectKind::Deployment);
        collect(&mut out, &self.service_accounts, ObjectKind::ServiceAccount);
        collect(&mut out, &self.cluster_roles, ObjectKind::ClusterRole);
        collect(&mut out, &self.cluster_role_bindings, ObjectKind::ClusterRoleBinding);
        collect(&mut out, &self.role_bindings, ObjectKind::RoleBinding);
        collect(&mut out, &self.api_services, ObjectKind::ApiService);
        out
    }

    /// Stored secret, if any
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        lock(&self.secrets).get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Stored service, if any
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        lock(&self.services).get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Stored deployment, if any
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        lock(&self.deployments).get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Stored persistent volume claim, if any
    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        lock(&self.claims).get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Stored API service registration, if any
    pub fn api_service(&self, name: &str) -> Option<APIService> {
        lock(&self.api_services).get(&(String::new(), name.to_string())).cloned()
    }

    /// Stored cluster role, if any
    pub fn cluster_role(&self, name: &str) -> Option<ClusterRole> {
        lock(&self.cluster_roles).get(&(String::new(), name.to_string())).cloned()
    }

    /// Stored cluster role binding, if any
    pub fn cluster_role_binding(&self, name: &str) -> Option<ClusterRoleBinding> {
        lock(&self.cluster_role_bindings).get(&(String::new(), name.to_string())).cloned()
    }

    /// Stored role binding, if any
    pub fn role_binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
        lock(&self.role_bindings).get(&(namespace.to_string(), name.to_string())).cloned()
    }

    fn record(&self, operation: &str, target: &str) -> Result<(), ClusterError> {
        lock(&self.calls).push(format!("{operation} {target}"));

        let mut failures = lock(&self.failures);
        let Some(failure) = failures.get_mut(operation) else {
            return Ok(());
        };
        if failure.remaining == Some(0) {
            failures.remove(operation);
            return Ok(());
        }
        if let Some(n) = failure.remaining.as_mut() {
            *n -= 1;
        }
        Err(ClusterError::Api(failure.message.clone()))
    }

    fn insert<K>(store: &Store<K>, what: ObjectRef, object: &K) -> Result<K, ClusterError>
    where
        K: Resource + Clone,
    {
        let key = (what.namespace.clone().unwrap_or_default(), what.name.clone());
        let mut guard = lock(store);
        if guard.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(what.to_string()));
        }

        let mut stored = object.clone();
        let meta = stored.meta_mut();
        meta.namespace = what.namespace.clone();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some("1".to_string());
        guard.insert(key, stored.clone());
        Ok(stored)
    }

    fn fetch<K: Clone>(store: &Store<K>, what: ObjectRef) -> Result<K, ClusterError> {
        let key = (what.namespace.clone().unwrap_or_default(), what.name.clone());
        lock(store)
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(what.to_string()))
    }

    fn remove<K>(store: &Store<K>, what: &ObjectRef) -> Result<(), ClusterError> {
        let key = (what.namespace.clone().unwrap_or_default(), what.name.clone());
        lock(store)
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(what.to_string()))
    }

    fn name_of<K: Resource>(object: &K) -> Result<String, ClusterError> {
        object
            .meta()
            .name
            .clone()
            .ok_or_else(|| ClusterError::InvalidRequest("object has no name".to_string()))
    }

    fn allocate_node_ports(&self, service: &mut Service) {
        let Some(spec) = service.spec.as_mut() else {
            return;
        };
        spec.cluster_ip.get_or_insert_with(|| "10.96.0.10".to_string());
        let exposes_node_ports = matches!(spec.type_.as_deref(), Some("NodePort" | "LoadBalancer"));
        if !exposes_node_ports {
            return;
        }
        for port in spec.ports.iter_mut().flatten() {
            if port.node_port.is_none() {
                let mut next = lock(&self.next_node_port);
                port.node_port = Some(*next);
                *next += 1;
            }
        }
    }

    fn mint_token_secret(&self, namespace: &str, account: &mut ServiceAccount) -> Result<(), ClusterError> {
        let Some(controller) = lock(&self.token_controller).clone() else {
            return Ok(());
        };
        let account_name = Self::name_of(account)?;
        let secret_name = format!("{account_name}-token-x7k2p");

        let mut annotations = BTreeMap::new();
        annotations.insert("kubernetes.io/service-account.name".to_string(), account_name);
        let mut data = BTreeMap::new();
        data.insert("token".to_string(), ByteString(controller.token.into_bytes()));
        data.insert("ca.crt".to_string(), ByteString(controller.ca_pem.into_bytes()));
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                annotations: Some(annotations),
                ..Default::default()
            },
            type_: Some("kubernetes.io/service-account-token".to_string()),
            data: Some(data),
            ..Default::default()
        };
        Self::insert(
            &self.secrets,
            ObjectRef::namespaced(ObjectKind::Secret, namespace, secret_name.clone()),
            &secret,
        )?;

        account.secrets = Some(vec![ObjectReference {
            name: Some(secret_name),
            ..Default::default()
        }]);
        Ok(())
    }

    fn with_ingress(&self, mut service: Service) -> Service {
        let is_load_balancer = service
            .spec
            .as_ref()
            .and_then(|s| s.type_.as_deref())
            .is_some_and(|t| t == "LoadBalancer");
        if !is_load_balancer {
            return service;
        }

        let reads = {
            let mut reads = lock(&self.service_reads);
            *reads += 1;
            *reads
        };
        if let Some(pending) = lock(&self.pending_ingress).as_ref() {
            if reads > pending.after_reads {
                service.status = Some(ServiceStatus {
                    load_balancer: Some(LoadBalancerStatus {
                        ingress: Some(pending.ingress.clone()),
                    }),
                    ..Default::default()
                });
            }
        }
        service
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    fn context(&self) -> &str {
        &self.context
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::Namespace, Self::name_of(namespace)?);
        self.record("create_namespace", &what.name)?;
        Self::insert(&self.namespaces, what, namespace)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::Service, namespace, Self::name_of(service)?);
        self.record("create_service", &format!("{namespace}/{}", what.name))?;
        let mut service = service.clone();
        self.allocate_node_ports(&mut service);
        Self::insert(&self.services, what, &service)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.record("get_service", &format!("{namespace}/{name}"))?;
        let service = Self::fetch(&self.services, ObjectRef::namespaced(ObjectKind::Service, namespace, name))?;
        Ok(self.with_ingress(service))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::Secret, namespace, Self::name_of(secret)?);
        self.record("create_secret", &format!("{namespace}/{}", what.name))?;
        Self::insert(&self.secrets, what, secret)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        self.record("get_secret", &format!("{namespace}/{name}"))?;
        Self::fetch(&self.secrets, ObjectRef::namespaced(ObjectKind::Secret, namespace, name))
    }

    async fn create_persistent_volume_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::PersistentVolumeClaim, namespace, Self::name_of(claim)?);
        self.record("create_persistent_volume_claim", &format!("{namespace}/{}", what.name))?;
        Self::insert(&self.claims, what, claim)
    }

    async fn create_service_account(&self, namespace: &str, account: &ServiceAccount) -> Result<ServiceAccount, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::ServiceAccount, namespace, Self::name_of(account)?);
        self.record("create_service_account", &format!("{namespace}/{}", what.name))?;
        let mut account = account.clone();
        self.mint_token_secret(namespace, &mut account)?;
        Self::insert(&self.service_accounts, what, &account)
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, ClusterError> {
        self.record("get_service_account", &format!("{namespace}/{name}"))?;
        Self::fetch(
            &self.service_accounts,
            ObjectRef::namespaced(ObjectKind::ServiceAccount, namespace, name),
        )
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        self.record("list_nodes", "")?;
        Ok(lock(&self.nodes).clone())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        self.record("list_pods", namespace)?;
        Ok(lock(&self.pods)
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::Deployment, namespace, Self::name_of(deployment)?);
        self.record("create_deployment", &format!("{namespace}/{}", what.name))?;
        Self::insert(&self.deployments, what, deployment)
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::ClusterRole, Self::name_of(role)?);
        self.record("create_cluster_role", &what.name)?;
        Self::insert(&self.cluster_roles, what, role)
    }

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<ClusterRoleBinding, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::ClusterRoleBinding, Self::name_of(binding)?);
        self.record("create_cluster_role_binding", &what.name)?;
        Self::insert(&self.cluster_role_bindings, what, binding)
    }

    async fn create_role_binding(&self, namespace: &str, binding: &RoleBinding) -> Result<RoleBinding, ClusterError> {
        let what = ObjectRef::namespaced(ObjectKind::RoleBinding, namespace, Self::name_of(binding)?);
        self.record("create_role_binding", &format!("{namespace}/{}", what.name))?;
        Self::insert(&self.role_bindings, what, binding)
    }

    async fn create_api_service(&self, api_service: &APIService) -> Result<APIService, ClusterError> {
        let what = ObjectRef::cluster_scoped(ObjectKind::ApiService, Self::name_of(api_service)?);
        self.record("create_api_service", &what.name)?;
        Self::insert(&self.api_services, what, api_service)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, ClusterError> {
        self.record("list_clusters", "")?;
        Ok(lock(&self.clusters).clone())
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), ClusterError> {
        self.record("delete_object", &object.to_string())?;
        match object.kind {
            ObjectKind::Namespace => Self::remove(&self.namespaces, object),
            ObjectKind::Service => Self::remove(&self.services, object),
            ObjectKind::Secret => Self::remove(&self.secrets, object),
            ObjectKind::PersistentVolumeClaim => Self::remove(&self.claims, object),
            ObjectKind::Deployment => Self::remove(&self.deployments, object),
            ObjectKind::ServiceAccount => Self::remove(&self.service_accounts, object),
            ObjectKind::ClusterRole => Self::remove(&self.cluster_roles, object),
            ObjectKind::ClusterRoleBinding => Self::remove(&self.cluster_role_bindings, object),
            ObjectKind::RoleBinding => Self::remove(&self.role_bindings, object),
            ObjectKind::ApiService => Self::remove(&self.api_services, object),
        }
    }
}

/// Mock health probe returning scripted responses
///
/// Responses are consumed in order; the last one repeats forever.
#[derive(Clone)]
pub struct MockHealthProbe {
    responses: Arc<Mutex<VecDeque<Result<String, String>>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockHealthProbe {
    /// Probe that answers with each of `responses` in turn
    pub fn new(responses: Vec<Result<&str, &str>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            )),
            calls: Arc::default(),
        }
    }

    /// Number of probes made so far
    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait::async_trait]
impl HealthProbe for MockHealthProbe {
    async fn healthz(&self) -> Result<String, ClusterError> {
        *lock(&self.calls) += 1;
        let mut responses = lock(&self.responses);
        let next = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        match next {
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(ClusterError::Api(message)),
            None => Err(ClusterError::Api("no scripted health response".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let mock = MockClusterClient::new("host");
        mock.create_secret("ns", &named_secret("creds")).await.expect("first create");

        let err = mock.create_secret("ns", &named_secret("creds")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(mock.calls(), vec!["create_secret ns/creds", "create_secret ns/creds"]);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let mock = MockClusterClient::new("host");
        let err = mock
            .delete_object(&ObjectRef::namespaced(ObjectKind::Secret, "ns", "absent"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_transient_failures_recover() {
        let mock = MockClusterClient::new("host");
        mock.fail_times("list_nodes", 2, "connection refused");

        assert!(mock.list_nodes().await.is_err());
        assert!(mock.list_nodes().await.is_err());
        assert!(mock.list_nodes().await.is_ok());
    }

    #[tokio::test]
    async fn test_health_probe_repeats_last_response() {
        let probe = MockHealthProbe::new(vec![Err("refused"), Ok("ok")]);
        assert!(probe.healthz().await.is_err());
        assert_eq!(probe.healthz().await.expect("ok"), "ok");
        assert_eq!(probe.healthz().await.expect("ok"), "ok");
        assert_eq!(probe.calls(), 3);
    }
}
