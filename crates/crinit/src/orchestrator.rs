//! Bootstrap orchestration.
//!
//! Runs the init sequence for a validated [`DeploymentPlan`] against a host
//! cluster and, when aggregated, an aggregator cluster. Steps run in a fixed
//! order and the first error stops the run. Every object created is recorded
//! with the cluster it lives in, so a failed run can be torn down.

use std::io::Write;
use std::sync::Arc;

use cluster_client::{
    ClusterClientTrait, HealthCredentials, HealthProbe, HttpsHealthProbe, ObjectKind, ObjectRef,
};
use tracing::{debug, info, warn};

use crate::credentials::{CredentialRequest, Credentials, LOCAL_DNS_ZONE, generate_credentials};
use crate::error::CrinitError;
use crate::kubeconfig::{self, KubeconfigEntry};
use crate::options::{DeploymentPlan, Topology};
use crate::poller::{PollConfig, wait_for_aggregator, wait_for_healthy, wait_for_pods};
use crate::provisioner::apiservice::{api_service_name, create_api_service};
use crate::provisioner::deployment::{ApiServerSpec, AuthMode, create_deployment};
use crate::provisioner::external::{create_aggregator_kubeconfig_secret, ensure_external_name_service};
use crate::provisioner::namespace::{create_namespace, ensure_namespace};
use crate::provisioner::rbac::{
    self, AUTH_DELEGATOR_BINDING_NAME, AUTH_DELEGATOR_ROLE, AUTH_READER_BINDING_NAME, AUTH_READER_NAMESPACE,
    CLUSTER_ROLE_NAME, SERVICE_ACCOUNT_NAME,
};
use crate::provisioner::secret::{create_secret, credentials_secret_data};
use crate::provisioner::service::{ServiceEndpoint, ServiceRequest, create_service};
use crate::provisioner::storage::create_persistent_volume_claim;

/// Init steps, in the order they complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    NamespaceCreated,
    ServiceCreated,
    /// Cross-cluster only: namespace and ExternalName service in the aggregator
    CrossClusterNamespaceAndExternalService,
    CredentialsGenerated,
    SecretCreated,
    /// Only with persistent etcd storage
    PvcCreated,
    /// Aggregated only
    RbacCreated,
    /// Cross-cluster only
    CrossClusterKubeconfigSecretCreated,
    DeploymentCreated,
    /// Aggregated only
    ApiServiceCreated,
    KubeconfigUpdated,
    ApiServerHealthy,
    /// Aggregated only
    AggregatorServing,
}

/// Which cluster an object lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Host,
    Aggregator,
}

/// Objects created by one run, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionedObjectSet {
    entries: Vec<(Target, ObjectRef)>,
}

impl ProvisionedObjectSet {
    /// Record `object`; recording the same object twice keeps one entry
    pub fn record(&mut self, target: Target, object: ObjectRef) {
        if !self.contains(target, &object) {
            self.entries.push((target, object));
        }
    }

    pub fn contains(&self, target: Target, object: &ObjectRef) -> bool {
        self.entries.iter().any(|(t, o)| *t == target && o == object)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &(Target, ObjectRef)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub completed: Vec<Step>,
    pub provisioned: ProvisionedObjectSet,
    pub endpoint: ServiceEndpoint,
}

/// Outcome of a failed run: the error plus how far the run got
#[derive(Debug)]
pub struct RunFailure {
    pub error: CrinitError,
    /// Last step that completed, if any
    pub high_water: Option<Step>,
    pub provisioned: ProvisionedObjectSet,
}

/// Builds the probe used to wait for the registry's health endpoint
pub trait HealthProbeFactory: Send + Sync {
    /// Probe for the registry at `endpoint` (`host[:port]`) using `credentials`
    fn probe(&self, endpoint: &str, credentials: &Credentials) -> Result<Box<dyn HealthProbe>, CrinitError>;
}

/// Probes over HTTPS, trusting the generated CA and presenting the admin
/// client certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpsProbeFactory;

impl HealthProbeFactory for HttpsProbeFactory {
    fn probe(&self, endpoint: &str, credentials: &Credentials) -> Result<Box<dyn HealthProbe>, CrinitError> {
        let probe = HttpsHealthProbe::new(
            &format!("https://{endpoint}"),
            &credentials.ca.cert_pem,
            HealthCredentials {
                client_cert_pem: credentials.admin.cert_pem.clone(),
                client_key_pem: credentials.admin.key_pem.clone(),
                token: credentials.token().map(str::to_string),
            },
        )?;
        Ok(Box::new(probe))
    }
}

#[derive(Default)]
struct Progress {
    completed: Vec<Step>,
    provisioned: ProvisionedObjectSet,
}

impl Progress {
    fn complete(&mut self, step: Step) {
        debug!(?step, "Step complete");
        self.completed.push(step);
    }

    fn record(&mut self, target: Target, object: ObjectRef) {
        self.provisioned.record(target, object);
    }
}

fn begin(out: &mut dyn Write, message: &str) -> Result<(), CrinitError> {
    write!(out, "{message}")?;
    out.flush()?;
    Ok(())
}

fn done(out: &mut dyn Write) -> Result<(), CrinitError> {
    writeln!(out, " done")?;
    Ok(())
}

/// Drives init, teardown and delete against a host and an aggregator cluster
pub struct Orchestrator {
    host: Arc<dyn ClusterClientTrait>,
    aggregator: Option<Arc<dyn ClusterClientTrait>>,
    probes: Arc<dyn HealthProbeFactory>,
    polls: PollConfig,
}

impl Orchestrator {
    /// Creates a new orchestrator. `aggregator` may be the same client as
    /// `host`; it is required for aggregated plans.
    pub fn new(
        host: Arc<dyn ClusterClientTrait>,
        aggregator: Option<Arc<dyn ClusterClientTrait>>,
        probes: Arc<dyn HealthProbeFactory>,
    ) -> Self {
        Self {
            host,
            aggregator,
            probes,
            polls: PollConfig::default(),
        }
    }

    /// Override the poll intervals and deadlines
    pub fn with_poll_config(mut self, polls: PollConfig) -> Self {
        self.polls = polls;
        self
    }

    fn aggregator(&self) -> Result<&dyn ClusterClientTrait, CrinitError> {
        self.aggregator
            .as_deref()
            .ok_or_else(|| CrinitError::validation("an aggregator client is required for aggregated deployments"))
    }

    fn client(&self, target: Target) -> Result<&dyn ClusterClientTrait, CrinitError> {
        match target {
            Target::Host => Ok(self.host.as_ref()),
            Target::Aggregator => self.aggregator(),
        }
    }

    /// Bootstraps a cluster registry.
    ///
    /// This method:
    /// 1. Creates the namespace and service in the host cluster and resolves the service address
    /// 2. Cross-cluster: ensures the namespace and an ExternalName service in the aggregator
    /// 3. Generates credentials and stores them in a secret, then creates the etcd claim
    /// 4. Aggregated: creates the RBAC objects in the aggregator
    /// 5. Cross-cluster: stores a kubeconfig for the aggregator in the host cluster
    /// 6. Creates the API server deployment, then the APIService when aggregated
    /// 7. Updates the kubeconfig and waits for the registry (and aggregator) to serve
    ///
    /// Progress is written to `out`. The first error stops the run; nothing
    /// already created is removed.
    pub async fn run(&self, plan: &DeploymentPlan, out: &mut dyn Write) -> Result<RunReport, RunFailure> {
        let mut progress = Progress::default();
        match self.execute(plan, out, &mut progress).await {
            Ok(endpoint) => Ok(RunReport {
                completed: progress.completed,
                provisioned: progress.provisioned,
                endpoint,
            }),
            Err(error) => {
                warn!(error = %error, high_water = ?progress.completed.last(), "Cluster registry bootstrap failed");
                Err(RunFailure {
                    error,
                    high_water: progress.completed.last().copied(),
                    provisioned: progress.provisioned,
                })
            }
        }
    }

    async fn execute(
        &self,
        plan: &DeploymentPlan,
        out: &mut dyn Write,
        progress: &mut Progress,
    ) -> Result<ServiceEndpoint, CrinitError> {
        let host = self.host.as_ref();
        let ns = plan.namespace.as_str();
        let dry_run = plan.dry_run;
        info!("Bootstrapping cluster registry {} in context {}", plan.name, host.context());

        begin(out, &format!("Creating a namespace {ns} for the cluster registry..."))?;
        create_namespace(host, ns, dry_run).await?;
        progress.record(Target::Host, ObjectRef::cluster_scoped(ObjectKind::Namespace, ns));
        done(out)?;
        progress.complete(Step::NamespaceCreated);

        begin(out, "Creating cluster registry API server service...")?;
        let service_request = ServiceRequest {
            namespace: ns,
            name: &plan.service_name,
            service_type: plan.service_type,
            node_port: plan.node_port,
            advertise_address: plan.advertise_address,
        };
        let (_, endpoint) = create_service(host, out, &service_request, self.polls.load_balancer, dry_run).await?;
        progress.record(
            Target::Host,
            ObjectRef::namespaced(ObjectKind::Service, ns, &plan.service_name),
        );
        done(out)?;
        debug!(ips = ?endpoint.ips, hostnames = ?endpoint.hostnames, "Resolved registry service address");
        progress.complete(Step::ServiceCreated);

        if let Some(cross) = plan.cross_cluster() {
            let aggregator = self.aggregator()?;
            begin(out, "Creating cluster registry API server ExternalName service in aggregator...")?;
            if ensure_namespace(aggregator, ns, dry_run).await?.is_some() {
                progress.record(Target::Aggregator, ObjectRef::cluster_scoped(ObjectKind::Namespace, ns));
            }
            let (_, created) =
                ensure_external_name_service(aggregator, ns, &plan.service_name, &cross.canonical_name, dry_run)
                    .await?;
            if created {
                progress.record(
                    Target::Aggregator,
                    ObjectRef::namespaced(ObjectKind::Service, ns, &plan.service_name),
                );
            }
            done(out)?;
            progress.complete(Step::CrossClusterNamespaceAndExternalService);
        }

        begin(out, "Creating cluster registry objects (credentials, persistent volume claim)...")?;
        let credentials = generate_credentials(&CredentialRequest {
            namespace: ns.to_string(),
            name: plan.name.clone(),
            service_name: plan.service_name.clone(),
            dns_zone: LOCAL_DNS_ZONE.to_string(),
            ips: endpoint.ips.clone(),
            hostnames: endpoint.hostnames.clone(),
            extra_dns_names: plan.cross_cluster().map(|c| c.canonical_name.clone()).into_iter().collect(),
            enable_basic_auth: plan.enable_basic_auth,
            enable_token_auth: plan.enable_token_auth,
        })?;
        progress.complete(Step::CredentialsGenerated);

        create_secret(host, ns, &plan.credentials_name, credentials_secret_data(&credentials), dry_run).await?;
        progress.record(
            Target::Host,
            ObjectRef::namespaced(ObjectKind::Secret, ns, &plan.credentials_name),
        );
        progress.complete(Step::SecretCreated);

        if let Some(storage) = &plan.etcd_storage {
            create_persistent_volume_claim(host, ns, &plan.pvc_name, storage, dry_run).await?;
            progress.record(
                Target::Host,
                ObjectRef::namespaced(ObjectKind::PersistentVolumeClaim, ns, &plan.pvc_name),
            );
            progress.complete(Step::PvcCreated);
        }
        done(out)?;

        if plan.is_aggregated() {
            self.create_rbac_objects(plan, out, progress).await?;
            progress.complete(Step::RbacCreated);
        }

        let auth = match &plan.topology {
            Topology::Standalone => AuthMode::Standalone,
            Topology::Aggregated { cross_cluster: None, .. } => AuthMode::DelegatedInCluster {
                service_account: SERVICE_ACCOUNT_NAME.to_string(),
            },
            Topology::Aggregated { cross_cluster: Some(_), .. } => {
                let aggregator = self.aggregator()?;
                begin(out, "Creating kubeconfig secret in host cluster based on SA in aggregator...")?;
                create_aggregator_kubeconfig_secret(
                    host,
                    aggregator,
                    out,
                    ns,
                    &plan.agg_kubeconfig_name,
                    SERVICE_ACCOUNT_NAME,
                    self.polls.service_account_token,
                    dry_run,
                )
                .await?;
                progress.record(
                    Target::Host,
                    ObjectRef::namespaced(ObjectKind::Secret, ns, &plan.agg_kubeconfig_name),
                );
                done(out)?;
                progress.complete(Step::CrossClusterKubeconfigSecretCreated);
                AuthMode::DelegatedRemote {
                    kubeconfig_secret: plan.agg_kubeconfig_name.clone(),
                }
            }
        };

        begin(out, "Creating cluster registry deployment...")?;
        // only one address can be advertised; prefer the user's
        let advertise_address = plan
            .advertise_address
            .map(|ip| ip.to_string())
            .or_else(|| endpoint.ips.first().cloned());
        let spec = ApiServerSpec {
            namespace: ns.to_string(),
            name: plan.server_name.clone(),
            server_image: plan.server_image.clone(),
            etcd_image: plan.etcd_image.clone(),
            credentials_secret: plan.credentials_name.clone(),
            advertise_address,
            basic_auth_file: credentials.password.is_some(),
            token_auth_file: credentials.token.is_some(),
            arg_overrides: plan.arg_overrides.clone(),
            etcd_claim: plan.etcd_storage.as_ref().map(|_| plan.pvc_name.clone()),
            auth,
        };
        create_deployment(host, &spec, dry_run).await?;
        progress.record(
            Target::Host,
            ObjectRef::namespaced(ObjectKind::Deployment, ns, &plan.server_name),
        );
        done(out)?;
        progress.complete(Step::DeploymentCreated);

        if plan.is_aggregated() {
            begin(out, "Creating cluster registry Kubernetes API Service...")?;
            create_api_service(self.aggregator()?, ns, &plan.service_name, &credentials.ca.cert_pem, dry_run).await?;
            progress.record(
                Target::Aggregator,
                ObjectRef::cluster_scoped(ObjectKind::ApiService, api_service_name()),
            );
            done(out)?;
            progress.complete(Step::ApiServiceCreated);
        }

        begin(out, "Updating kubeconfig...")?;
        if !dry_run {
            let address = endpoint.endpoint().ok_or_else(|| {
                CrinitError::Kubeconfig(format!("no address found for service {}", plan.service_name))
            })?;
            let path = kubeconfig::resolve_path(plan.kubeconfig.as_deref())?;
            let entry = KubeconfigEntry::new(&plan.name, &address, &credentials)?;
            kubeconfig::update_kubeconfig(&path, &entry, dry_run)?;
        }
        done(out)?;
        progress.complete(Step::KubeconfigUpdated);

        if dry_run {
            writeln!(out, "Cluster registry can be run (dry run)")?;
            info!("Cluster registry can be run (dry run)");
            return Ok(endpoint);
        }

        begin(out, "Waiting for the cluster registry API server to come up...")?;
        wait_for_pods(host, out, ns, &[plan.server_name.clone()], self.polls.pods).await?;
        let address = endpoint.endpoint().unwrap_or_default();
        let probe = self.probes.probe(&address, &credentials)?;
        wait_for_healthy(probe.as_ref(), out, self.polls.health).await?;
        done(out)?;
        writeln!(out, "Cluster registry API server is running at: {}", endpoint.summary())?;
        progress.complete(Step::ApiServerHealthy);

        if plan.is_aggregated() {
            begin(out, "Waiting for the cluster registry API to be available via the aggregator...")?;
            wait_for_aggregator(self.aggregator()?, out, self.polls.aggregator).await?;
            done(out)?;
            progress.complete(Step::AggregatorServing);
        }

        info!("Cluster registry {} is running", plan.name);
        Ok(endpoint)
    }

    /// Service account, cluster role and bindings in the aggregator.
    ///
    /// The namespace already exists there: it is the host namespace when
    /// running in the aggregator, and was ensured earlier otherwise.
    async fn create_rbac_objects(
        &self,
        plan: &DeploymentPlan,
        out: &mut dyn Write,
        progress: &mut Progress,
    ) -> Result<(), CrinitError> {
        let aggregator = self.aggregator()?;
        let ns = plan.namespace.as_str();
        let dry_run = plan.dry_run;

        begin(out, "Creating RBAC objects...")?;
        rbac::create_service_account(aggregator, ns, dry_run).await?;
        progress.record(
            Target::Aggregator,
            ObjectRef::namespaced(ObjectKind::ServiceAccount, ns, SERVICE_ACCOUNT_NAME),
        );

        rbac::create_cluster_role(aggregator, dry_run).await?;
        progress.record(
            Target::Aggregator,
            ObjectRef::cluster_scoped(ObjectKind::ClusterRole, CLUSTER_ROLE_NAME),
        );

        for (binding, role) in [
            (CLUSTER_ROLE_NAME, CLUSTER_ROLE_NAME),
            (AUTH_DELEGATOR_BINDING_NAME, AUTH_DELEGATOR_ROLE),
        ] {
            rbac::create_cluster_role_binding(aggregator, binding, role, ns, dry_run).await?;
            progress.record(
                Target::Aggregator,
                ObjectRef::cluster_scoped(ObjectKind::ClusterRoleBinding, binding),
            );
        }

        if plan.cross_cluster().is_none() {
            rbac::create_auth_reader_role_binding(aggregator, ns, dry_run).await?;
            progress.record(
                Target::Aggregator,
                ObjectRef::namespaced(ObjectKind::RoleBinding, AUTH_READER_NAMESPACE, AUTH_READER_BINDING_NAME),
            );
        }
        done(out)?;
        Ok(())
    }

    /// Delete every object in `set`, newest first, each in the cluster it
    /// was created in.
    ///
    /// Objects that are already gone are skipped. Every object is attempted;
    /// the first failure is returned at the end.
    pub async fn teardown(&self, set: &ProvisionedObjectSet, out: &mut dyn Write) -> Result<(), CrinitError> {
        let mut first_error = None;
        for (target, object) in set.iter().rev() {
            begin(out, &format!("Deleting {object}..."))?;
            let client = match self.client(*target) {
                Ok(client) => client,
                Err(e) => {
                    writeln!(out, " skipped")?;
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            match client.delete_object(object).await {
                Ok(()) => done(out)?,
                Err(e) if e.is_not_found() => {
                    debug!(object = %object, "Already deleted");
                    writeln!(out, " not found")?;
                }
                Err(e) => {
                    warn!(object = %object, error = %e, "Failed to delete object");
                    writeln!(out, " failed")?;
                    first_error.get_or_insert(CrinitError::delete(object.clone(), e));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete the registry described by `plan`.
    ///
    /// The object set is reconstructed from the plan. The namespace is only
    /// deleted when `delete_namespace` is set since it may be shared. The
    /// kubeconfig entries for the registry are removed as well. In dry run
    /// the objects are listed and nothing is changed.
    pub async fn delete(
        &self,
        plan: &DeploymentPlan,
        delete_namespace: bool,
        out: &mut dyn Write,
    ) -> Result<ProvisionedObjectSet, CrinitError> {
        let set = delete_plan(plan, delete_namespace);
        if plan.dry_run {
            for (target, object) in set.iter() {
                writeln!(out, "Would delete {object} ({target:?})")?;
            }
            return Ok(set);
        }

        self.teardown(&set, out).await?;

        begin(out, "Updating kubeconfig...")?;
        let path = kubeconfig::resolve_path(plan.kubeconfig.as_deref())?;
        if path.exists() {
            let mut config = kubeconfig::load(&path)?;
            if kubeconfig::remove_entries(&mut config, &plan.name) {
                kubeconfig::write_atomic(&path, &config)?;
            }
        }
        done(out)?;
        info!("Cluster registry {} deleted", plan.name);
        Ok(set)
    }
}

/// Objects an init run for `plan` creates, in creation order
pub fn delete_plan(plan: &DeploymentPlan, delete_namespace: bool) -> ProvisionedObjectSet {
    let ns = plan.namespace.as_str();
    let mut set = ProvisionedObjectSet::default();

    if delete_namespace {
        set.record(Target::Host, ObjectRef::cluster_scoped(ObjectKind::Namespace, ns));
    }
    set.record(
        Target::Host,
        ObjectRef::namespaced(ObjectKind::Service, ns, &plan.service_name),
    );
    if plan.cross_cluster().is_some() {
        if delete_namespace {
            set.record(Target::Aggregator, ObjectRef::cluster_scoped(ObjectKind::Namespace, ns));
        }
        set.record(
            Target::Aggregator,
            ObjectRef::namespaced(ObjectKind::Service, ns, &plan.service_name),
        );
    }
    set.record(
        Target::Host,
        ObjectRef::namespaced(ObjectKind::Secret, ns, &plan.credentials_name),
    );
    if plan.etcd_storage.is_some() {
        set.record(
            Target::Host,
            ObjectRef::namespaced(ObjectKind::PersistentVolumeClaim, ns, &plan.pvc_name),
        );
    }
    if plan.is_aggregated() {
        set.record(
            Target::Aggregator,
            ObjectRef::namespaced(ObjectKind::ServiceAccount, ns, SERVICE_ACCOUNT_NAME),
        );
        set.record(
            Target::Aggregator,
            ObjectRef::cluster_scoped(ObjectKind::ClusterRole, CLUSTER_ROLE_NAME),
        );
        for binding in [CLUSTER_ROLE_NAME, AUTH_DELEGATOR_BINDING_NAME] {
            set.record(
                Target::Aggregator,
                ObjectRef::cluster_scoped(ObjectKind::ClusterRoleBinding, binding),
            );
        }
        if plan.cross_cluster().is_none() {
            set.record(
                Target::Aggregator,
                ObjectRef::namespaced(ObjectKind::RoleBinding, AUTH_READER_NAMESPACE, AUTH_READER_BINDING_NAME),
            );
        }
    }
    if plan.cross_cluster().is_some() {
        set.record(
            Target::Host,
            ObjectRef::namespaced(ObjectKind::Secret, ns, &plan.agg_kubeconfig_name),
        );
    }
    set.record(
        Target::Host,
        ObjectRef::namespaced(ObjectKind::Deployment, ns, &plan.server_name),
    );
    if plan.is_aggregated() {
        set.record(
            Target::Aggregator,
            ObjectRef::cluster_scoped(ObjectKind::ApiService, api_service_name()),
        );
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DeploymentOptions;
    use cluster_client::{MockClusterClient, MockHealthProbe};
    use k8s_openapi::api::core::v1::LoadBalancerIngress;
    use std::path::Path;

    struct ScriptedProbes(MockHealthProbe);

    impl HealthProbeFactory for ScriptedProbes {
        fn probe(&self, _endpoint: &str, _credentials: &Credentials) -> Result<Box<dyn HealthProbe>, CrinitError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    fn healthy() -> Arc<dyn HealthProbeFactory> {
        Arc::new(ScriptedProbes(MockHealthProbe::new(vec![Ok("ok")])))
    }

    fn options(kubeconfig: &Path) -> DeploymentOptions {
        DeploymentOptions {
            name: "foo".to_string(),
            host_context: "host".to_string(),
            kubeconfig: Some(kubeconfig.to_path_buf()),
            ..Default::default()
        }
    }

    fn host_with_node() -> MockClusterClient {
        let host = MockClusterClient::new("host");
        host.add_node("node-1", &[("InternalIP", "10.0.0.1")]);
        host.add_pod("clusterregistry", "foo-apiserver-6d5f7", &[], "Running");
        host
    }

    fn output(out: Vec<u8>) -> String {
        String::from_utf8(out).expect("utf8")
    }

    #[tokio::test]
    async fn test_standalone_dry_run_makes_no_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");
        let plan = DeploymentOptions {
            standalone: true,
            dry_run: true,
            ..options(&kubeconfig)
        }
        .validate()
        .expect("plan");
        let host = MockClusterClient::new("host");
        let orchestrator = Orchestrator::new(Arc::new(host.clone()), None, healthy());
        let mut out: Vec<u8> = Vec::new();

        let report = orchestrator.run(&plan, &mut out).await.expect("dry run");

        assert!(host.calls().is_empty());
        assert!(!kubeconfig.exists());
        let out = output(out);
        assert!(out.ends_with("Cluster registry can be run (dry run)\n"), "{out}");
        let kinds: Vec<ObjectKind> = report.provisioned.iter().map(|(_, o)| o.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::Namespace,
                ObjectKind::Service,
                ObjectKind::Secret,
                ObjectKind::PersistentVolumeClaim,
                ObjectKind::Deployment,
            ]
        );
        assert_eq!(report.completed.last(), Some(&Step::KubeconfigUpdated));
    }

    #[tokio::test]
    async fn test_aggregated_dry_run_makes_no_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");
        let plan = DeploymentOptions {
            dry_run: true,
            ..options(&kubeconfig)
        }
        .validate()
        .expect("plan");
        let host = MockClusterClient::new("host");
        let client: Arc<dyn ClusterClientTrait> = Arc::new(host.clone());
        let orchestrator = Orchestrator::new(client.clone(), Some(client), healthy());
        let mut out: Vec<u8> = Vec::new();

        let report = orchestrator.run(&plan, &mut out).await.expect("dry run");

        assert!(host.calls().is_empty());
        assert!(!kubeconfig.exists());
        let out = output(out);
        assert!(out.ends_with("Cluster registry can be run (dry run)\n"), "{out}");
        assert!(report.provisioned.contains(
            Target::Aggregator,
            &ObjectRef::cluster_scoped(ObjectKind::ApiService, api_service_name())
        ));
    }

    #[tokio::test]
    async fn test_cross_cluster_dry_run_makes_no_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");
        let plan = DeploymentOptions {
            aggregator_context: Some("agg".to_string()),
            canonical_name: Some("foo.registry.example.com".to_string()),
            dry_run: true,
            ..options(&kubeconfig)
        }
        .validate()
        .expect("plan");
        let host = MockClusterClient::new("host");
        let aggregator = MockClusterClient::new("agg");
        let orchestrator = Orchestrator::new(Arc::new(host.clone()), Some(Arc::new(aggregator.clone())), healthy());
        let mut out: Vec<u8> = Vec::new();

        let report = orchestrator.run(&plan, &mut out).await.expect("dry run");

        assert!(host.calls().is_empty());
        assert!(aggregator.calls().is_empty());
        assert!(!kubeconfig.exists());
        let out = output(out);
        assert!(out.ends_with("Cluster registry can be run (dry run)\n"), "{out}");
        assert!(report.completed.contains(&Step::CrossClusterNamespaceAndExternalService));
        assert!(report.provisioned.contains(
            Target::Host,
            &ObjectRef::namespaced(ObjectKind::Secret, "clusterregistry", "foo-aggkubeconfig")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_load_balancer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");
        let plan = DeploymentOptions {
            standalone: true,
            service_type: "LoadBalancer".to_string(),
            ..options(&kubeconfig)
        }
        .validate()
        .expect("plan");
        let host = MockClusterClient::new("host");
        host.add_pod("clusterregistry", "foo-apiserver-6d5f7", &[], "Running");
        host.set_load_balancer_ingress(
            vec![
                LoadBalancerIngress {
                    ip: Some("150.0.0.1".to_string()),
                    ..Default::default()
                },
                LoadBalancerIngress {
                    hostname: Some("foo".to_string()),
                    ..Default::default()
                },
            ],
            0,
        );
        let orchestrator = Orchestrator::new(Arc::new(host.clone()), None, healthy());
        let mut out: Vec<u8> = Vec::new();

        let report = orchestrator.run(&plan, &mut out).await.expect("run");

        assert_eq!(report.endpoint.ips, vec!["150.0.0.1"]);
        assert_eq!(report.endpoint.hostnames, vec!["foo"]);
        assert!(output(out).contains("Cluster registry API server is running at: 150.0.0.1, foo\n"));
        assert_eq!(report.completed.last(), Some(&Step::ApiServerHealthy));

        let config = kubeconfig::load(&kubeconfig).expect("kubeconfig");
        let json = serde_json::to_value(&config).expect("json");
        assert_eq!(json["clusters"][0]["cluster"]["server"], "https://150.0.0.1");

        let deployment = host.deployment("clusterregistry", "foo-apiserver").expect("deployment");
        let pod = deployment.spec.and_then(|s| s.template.spec).expect("pod spec");
        assert_eq!(pod.service_account_name.as_deref(), Some("default"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregated_same_cluster() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");
        let plan = options(&kubeconfig).validate().expect("plan");
        let host = host_with_node();
        let client: Arc<dyn ClusterClientTrait> = Arc::new(host.clone());
        let orchestrator = Orchestrator::new(client.clone(), Some(client), healthy());
        let mut out: Vec<u8> = Vec::new();

        let report = orchestrator.run(&plan, &mut out).await.expect("run");

        assert_eq!(report.completed.last(), Some(&Step::AggregatorServing));
        assert!(!report.completed.contains(&Step::CrossClusterNamespaceAndExternalService));
        assert!(host.secret("clusterregistry", "foo-aggkubeconfig").is_none());
        assert!(host.role_binding("kube-system", AUTH_READER_BINDING_NAME).is_some());
        assert!(host.api_service("v1alpha1.clusterregistry.k8s.io").is_some());

        let deployment = host.deployment("clusterregistry", "foo-apiserver").expect("deployment");
        let pod = deployment.spec.and_then(|s| s.template.spec).expect("pod spec");
        assert_eq!(pod.service_account_name.as_deref(), Some(SERVICE_ACCOUNT_NAME));
        let command = pod.containers[0].command.clone().expect("command");
        assert!(command.contains(&"--use-delegated-auth=true".to_string()));
        assert!(command.contains(&"--advertise-address=10.0.0.1".to_string()));

        let out = output(out);
        assert!(out.contains("Creating RBAC objects... done\n"), "{out}");
        assert!(out.contains("Cluster registry API server is running at: 10.0.0.1:30000\n"), "{out}");
        assert!(out.contains("Waiting for the cluster registry API to be available via the aggregator..."));
        assert!(out.ends_with(" done\n"), "{out}");

        // every object recorded exactly matches what the cluster holds
        let recorded: std::collections::BTreeSet<ObjectRef> =
            report.provisioned.iter().map(|(_, o)| o.clone()).collect();
        assert_eq!(recorded, host.objects());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregated_cross_cluster() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");
        let plan = DeploymentOptions {
            aggregator_context: Some("agg".to_string()),
            canonical_name: Some("foo.registry.example.com".to_string()),
            ..options(&kubeconfig)
        }
        .validate()
        .expect("plan");
        let host = host_with_node();
        let ca = generate_credentials(&CredentialRequest {
            namespace: "default".to_string(),
            name: "agg".to_string(),
            service_name: "kubernetes".to_string(),
            dns_zone: LOCAL_DNS_ZONE.to_string(),
            ..Default::default()
        })
        .expect("ca")
        .ca
        .cert_pem;
        let aggregator = MockClusterClient::new("agg")
            .with_server_url("https://203.0.113.5:6443")
            .with_token_controller("sa-token", &ca);
        let orchestrator = Orchestrator::new(Arc::new(host.clone()), Some(Arc::new(aggregator.clone())), healthy());
        let mut out: Vec<u8> = Vec::new();

        let report = orchestrator.run(&plan, &mut out).await.expect("run");

        assert!(report.completed.contains(&Step::CrossClusterNamespaceAndExternalService));
        assert!(report.completed.contains(&Step::CrossClusterKubeconfigSecretCreated));
        let external = aggregator.service("clusterregistry", "foo").expect("external name");
        assert_eq!(
            external.spec.and_then(|s| s.external_name).as_deref(),
            Some("foo.registry.example.com")
        );
        assert!(aggregator.role_binding("kube-system", AUTH_READER_BINDING_NAME).is_none());
        assert!(host.secret("clusterregistry", "foo-aggkubeconfig").is_some());

        let deployment = host.deployment("clusterregistry", "foo-apiserver").expect("deployment");
        let pod = deployment.spec.and_then(|s| s.template.spec).expect("pod spec");
        assert!(pod.service_account_name.is_none());

        assert!(report.provisioned.contains(
            Target::Aggregator,
            &ObjectRef::cluster_scoped(ObjectKind::Namespace, "clusterregistry")
        ));
        assert!(report.provisioned.contains(
            Target::Host,
            &ObjectRef::namespaced(ObjectKind::Secret, "clusterregistry", "foo-aggkubeconfig")
        ));
    }

    #[test]
    fn test_cross_cluster_without_canonical_name_fails_before_any_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = DeploymentOptions {
            aggregator_context: Some("agg".to_string()),
            ..options(&dir.path().join("config"))
        }
        .validate();

        assert!(matches!(result, Err(CrinitError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rbac_rerun_conflict_stops_run_with_high_water_mark() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = options(&dir.path().join("config")).validate().expect("plan");
        let host = host_with_node();
        host.create_cluster_role(&rbac::build_cluster_role())
            .await
            .expect("leftover role");
        let client: Arc<dyn ClusterClientTrait> = Arc::new(host.clone());
        let orchestrator = Orchestrator::new(client.clone(), Some(client), healthy());
        let mut out: Vec<u8> = Vec::new();

        let failure = orchestrator.run(&plan, &mut out).await.unwrap_err();

        assert_eq!(failure.high_water, Some(Step::PvcCreated));
        assert_eq!(
            failure.error.to_string(),
            "failed to create ClusterRole clusterregistry.k8s.io:apiserver"
        );
        // the service account was created before the conflict
        assert!(failure.provisioned.contains(
            Target::Aggregator,
            &ObjectRef::namespaced(ObjectKind::ServiceAccount, "clusterregistry", SERVICE_ACCOUNT_NAME)
        ));
        assert!(host.deployment("clusterregistry", "foo-apiserver").is_none());
        assert!(output(out).ends_with("Creating RBAC objects..."));
    }

    #[tokio::test]
    async fn test_teardown_removes_what_a_failed_run_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = DeploymentOptions {
            standalone: true,
            ..options(&dir.path().join("config"))
        }
        .validate()
        .expect("plan");
        let host = host_with_node();
        host.fail_on("create_deployment", "quota exceeded");
        let orchestrator = Orchestrator::new(Arc::new(host.clone()), None, healthy());
        let mut out: Vec<u8> = Vec::new();

        let failure = orchestrator.run(&plan, &mut out).await.unwrap_err();
        assert_eq!(failure.high_water, Some(Step::PvcCreated));
        assert_eq!(failure.provisioned.len(), 4);

        orchestrator
            .teardown(&failure.provisioned, &mut Vec::<u8>::new())
            .await
            .expect("teardown");
        assert!(host.objects().is_empty());

        let deletes: Vec<String> = host
            .mutating_calls()
            .into_iter()
            .filter(|c| c.starts_with("delete_object"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                "delete_object PersistentVolumeClaim clusterregistry/foo-etcd-claim",
                "delete_object Secret clusterregistry/foo-apiserver-credentials",
                "delete_object Service clusterregistry/foo",
                "delete_object Namespace clusterregistry",
            ]
        );

        // a second teardown only finds missing objects
        orchestrator
            .teardown(&failure.provisioned, &mut Vec::<u8>::new())
            .await
            .expect("idempotent teardown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_keeps_namespace_and_cleans_kubeconfig() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kubeconfig = dir.path().join("config");
        let plan = options(&kubeconfig).validate().expect("plan");
        let host = host_with_node();
        let client: Arc<dyn ClusterClientTrait> = Arc::new(host.clone());
        let orchestrator = Orchestrator::new(client.clone(), Some(client), healthy());
        orchestrator.run(&plan, &mut Vec::<u8>::new()).await.expect("run");

        let mut out: Vec<u8> = Vec::new();
        orchestrator.delete(&plan, false, &mut out).await.expect("delete");

        let remaining: Vec<ObjectRef> = host.objects().into_iter().collect();
        assert_eq!(
            remaining,
            vec![ObjectRef::cluster_scoped(ObjectKind::Namespace, "clusterregistry")]
        );
        let config = kubeconfig::load(&kubeconfig).expect("kubeconfig");
        assert!(config.clusters.is_empty());
        assert!(config.contexts.is_empty());
    }

    #[tokio::test]
    async fn test_delete_dry_run_lists_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = DeploymentOptions {
            standalone: true,
            dry_run: true,
            etcd_persistent_storage: false,
            ..options(&dir.path().join("config"))
        }
        .validate()
        .expect("plan");
        let host = MockClusterClient::new("host");
        let orchestrator = Orchestrator::new(Arc::new(host.clone()), None, healthy());
        let mut out: Vec<u8> = Vec::new();

        let set = orchestrator.delete(&plan, true, &mut out).await.expect("dry run");

        assert_eq!(set.len(), 4);
        assert!(host.calls().is_empty());
        assert_eq!(
            output(out),
            "Would delete Namespace clusterregistry (Host)\n\
             Would delete Service clusterregistry/foo (Host)\n\
             Would delete Secret clusterregistry/foo-apiserver-credentials (Host)\n\
             Would delete Deployment clusterregistry/foo-apiserver (Host)\n"
        );
    }

    #[test]
    fn test_delete_plan_matches_cross_cluster_init() {
        let plan = DeploymentOptions {
            name: "foo".to_string(),
            host_context: "host".to_string(),
            aggregator_context: Some("agg".to_string()),
            canonical_name: Some("foo.example.com".to_string()),
            ..Default::default()
        }
        .validate()
        .expect("plan");

        let set = delete_plan(&plan, false);
        let aggregator_objects = set.iter().filter(|(t, _)| *t == Target::Aggregator).count();
        // ExternalName service, SA, cluster role, two bindings and the APIService
        assert_eq!(aggregator_objects, 6);
        assert!(set.contains(
            Target::Host,
            &ObjectRef::namespaced(ObjectKind::Secret, "clusterregistry", "foo-aggkubeconfig")
        ));
    }
}
