//! Deployment options and validation.
//!
//! [`DeploymentOptions`] is what the user typed. [`DeploymentOptions::validate`]
//! checks it without touching any cluster and produces a [`DeploymentPlan`]
//! carrying the resolved topology and every derived object name.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::warn;

use crate::error::CrinitError;
use crate::provisioner::storage::parse_quantity;

/// Namespace the registry is deployed into unless overridden
pub const DEFAULT_NAMESPACE: &str = "clusterregistry";
/// Registry API server image
pub const DEFAULT_SERVER_IMAGE: &str = "clusterregistry:dev";
/// etcd sidecar image
pub const DEFAULT_ETCD_IMAGE: &str = "gcr.io/google_containers/etcd:3.0.17";
/// Size requested for the etcd persistent volume claim
pub const DEFAULT_ETCD_PV_CAPACITY: &str = "10Gi";

const SERVICE_TYPE_FLAG: &str = "api-server-service-type";
const ADVERTISE_ADDRESS_FLAG: &str = "api-server-advertise-address";
const PORT_FLAG: &str = "api-server-port";
const STANDALONE_FLAG: &str = "api-server-standalone";
const ALLOW_LOAD_BALANCER_FLAG: &str = "allow-aggregated-load-balancer";

/// How the registry API server service is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceType {
    LoadBalancer,
    #[default]
    NodePort,
}

impl ServiceType {
    /// Kubernetes service type name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadBalancer => "LoadBalancer",
            Self::NodePort => "NodePort",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = CrinitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LoadBalancer" => Ok(Self::LoadBalancer),
            "NodePort" => Ok(Self::NodePort),
            other => Err(CrinitError::validation(format!(
                "invalid {SERVICE_TYPE_FLAG}: {other}, should be either LoadBalancer or NodePort"
            ))),
        }
    }
}

/// Cross-cluster settings: the registry runs in the host cluster while the
/// aggregator runs elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossCluster {
    /// DNS name the aggregator uses to reach the registry
    pub canonical_name: String,
}

/// Deployment shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// Self-contained API server with its own authn/z
    Standalone,
    /// API server registered with an aggregator
    Aggregated {
        aggregator_context: String,
        cross_cluster: Option<CrossCluster>,
    },
}

/// Persistent storage for etcd
#[derive(Debug, Clone, PartialEq)]
pub struct EtcdStorage {
    pub capacity: Quantity,
    pub storage_class: Option<String>,
}

/// Raw user input for one provisioning run
#[derive(Debug, Clone)]
pub struct DeploymentOptions {
    pub name: String,
    pub host_context: String,
    pub aggregator_context: Option<String>,
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
    pub server_image: String,
    pub etcd_image: String,
    pub etcd_pv_capacity: String,
    pub etcd_pv_storage_class: Option<String>,
    pub etcd_persistent_storage: bool,
    pub enable_basic_auth: bool,
    pub enable_token_auth: bool,
    pub service_type: String,
    /// Accept a LoadBalancer service for an aggregated registry
    pub allow_load_balancer: bool,
    pub advertise_address: Option<String>,
    pub port: Option<i64>,
    pub arg_overrides: String,
    pub standalone: bool,
    pub canonical_name: Option<String>,
    pub dry_run: bool,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            host_context: String::new(),
            aggregator_context: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            kubeconfig: None,
            server_image: DEFAULT_SERVER_IMAGE.to_string(),
            etcd_image: DEFAULT_ETCD_IMAGE.to_string(),
            etcd_pv_capacity: DEFAULT_ETCD_PV_CAPACITY.to_string(),
            etcd_pv_storage_class: None,
            etcd_persistent_storage: true,
            enable_basic_auth: false,
            enable_token_auth: false,
            service_type: ServiceType::NodePort.to_string(),
            allow_load_balancer: false,
            advertise_address: None,
            port: None,
            arg_overrides: String::new(),
            standalone: false,
            canonical_name: None,
            dry_run: false,
        }
    }
}

/// Validated options plus every name derived from them
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub name: String,
    pub namespace: String,
    pub host_context: String,
    pub kubeconfig: Option<PathBuf>,
    pub topology: Topology,

    pub server_image: String,
    pub etcd_image: String,
    pub etcd_storage: Option<EtcdStorage>,
    pub enable_basic_auth: bool,
    pub enable_token_auth: bool,

    pub service_type: ServiceType,
    pub advertise_address: Option<IpAddr>,
    pub node_port: Option<i32>,
    pub arg_overrides: BTreeMap<String, String>,
    pub dry_run: bool,

    /// Service name; equal to the registry name
    pub service_name: String,
    /// Deployment name, `<name>-apiserver`
    pub server_name: String,
    /// Credentials secret, `<name>-apiserver-credentials`
    pub credentials_name: String,
    /// etcd claim, `<service>-etcd-claim`
    pub pvc_name: String,
    /// Aggregator kubeconfig secret, `<name>-aggkubeconfig`
    pub agg_kubeconfig_name: String,

    /// Non-fatal notices produced during validation
    pub warnings: Vec<String>,
}

impl DeploymentOptions {
    /// Check the options and resolve them into a plan. Makes no remote calls.
    pub fn validate(self) -> Result<DeploymentPlan, CrinitError> {
        if self.name.trim().is_empty() {
            return Err(CrinitError::validation("NAME is required"));
        }
        if self.host_context.trim().is_empty() {
            return Err(CrinitError::validation("host-cluster-context is required"));
        }

        let service_type: ServiceType = self.service_type.parse()?;
        if service_type == ServiceType::LoadBalancer && !self.standalone && !self.allow_load_balancer {
            return Err(CrinitError::validation(format!(
                "{service_type} should only be used with {STANDALONE_FLAG} unless {ALLOW_LOAD_BALANCER_FLAG} is set"
            )));
        }

        let advertise_address = match self.advertise_address.as_deref().filter(|a| !a.is_empty()) {
            None => None,
            Some(raw) => {
                let ip = raw.parse::<IpAddr>().map_err(|_| {
                    CrinitError::validation(format!(
                        "invalid {ADVERTISE_ADDRESS_FLAG}: {raw}, should be a valid ip address"
                    ))
                })?;
                if service_type != ServiceType::NodePort {
                    return Err(CrinitError::validation(format!(
                        "{ADVERTISE_ADDRESS_FLAG} should be passed only with '{SERVICE_TYPE_FLAG}=NodePort'"
                    )));
                }
                Some(ip)
            }
        };

        let node_port = match self.port.filter(|p| *p != 0) {
            None => None,
            Some(port) => {
                if service_type != ServiceType::NodePort {
                    return Err(CrinitError::validation(format!(
                        "{PORT_FLAG} should be passed only with '{SERVICE_TYPE_FLAG}=NodePort'"
                    )));
                }
                let port = i32::try_from(port)
                    .ok()
                    .filter(|p| (0..=65535).contains(p))
                    .ok_or_else(|| {
                        CrinitError::validation(format!("Please provide a valid port number for {PORT_FLAG}"))
                    })?;
                Some(port)
            }
        };

        let arg_overrides = parse_overrides(&self.arg_overrides)?;

        let etcd_storage = if self.etcd_persistent_storage {
            Some(EtcdStorage {
                capacity: parse_quantity(&self.etcd_pv_capacity)?,
                storage_class: self.etcd_pv_storage_class.filter(|c| !c.is_empty()),
            })
        } else {
            None
        };

        let mut warnings = Vec::new();
        let topology = if self.standalone {
            Topology::Standalone
        } else {
            let aggregator_context = match self.aggregator_context.filter(|c| !c.is_empty()) {
                Some(context) => context,
                None => {
                    warn!(context = %self.host_context, "No aggregator context given, using host context");
                    warnings.push(format!(
                        "WARNING: Using context {:?} for aggregator since no dedicated context specified",
                        self.host_context
                    ));
                    self.host_context.clone()
                }
            };
            let cross_cluster = if aggregator_context == self.host_context {
                None
            } else {
                let canonical_name = self.canonical_name.filter(|n| !n.is_empty()).ok_or_else(|| {
                    CrinitError::validation("canonical-name is required when running outside of aggregator")
                })?;
                Some(CrossCluster { canonical_name })
            };
            Topology::Aggregated {
                aggregator_context,
                cross_cluster,
            }
        };

        let server_name = format!("{}-apiserver", self.name);
        Ok(DeploymentPlan {
            credentials_name: format!("{server_name}-credentials"),
            pvc_name: format!("{}-etcd-claim", self.name),
            agg_kubeconfig_name: format!("{}-aggkubeconfig", self.name),
            service_name: self.name.clone(),
            server_name,
            name: self.name,
            namespace: self.namespace,
            host_context: self.host_context,
            kubeconfig: self.kubeconfig,
            topology,
            server_image: self.server_image,
            etcd_image: self.etcd_image,
            etcd_storage,
            enable_basic_auth: self.enable_basic_auth,
            enable_token_auth: self.enable_token_auth,
            service_type,
            advertise_address,
            node_port,
            arg_overrides,
            dry_run: self.dry_run,
            warnings,
        })
    }
}

impl DeploymentPlan {
    /// Whether the registry is registered with an aggregator
    pub fn is_aggregated(&self) -> bool {
        matches!(self.topology, Topology::Aggregated { .. })
    }

    /// Cross-cluster settings, when the aggregator is a different cluster
    pub fn cross_cluster(&self) -> Option<&CrossCluster> {
        match &self.topology {
            Topology::Aggregated { cross_cluster, .. } => cross_cluster.as_ref(),
            Topology::Standalone => None,
        }
    }

    /// Context the RBAC objects and APIService are created in
    pub fn aggregator_context(&self) -> Option<&str> {
        match &self.topology {
            Topology::Aggregated { aggregator_context, .. } => Some(aggregator_context),
            Topology::Standalone => None,
        }
    }
}

/// Parse `k=v,k2=v2` into a map.
///
/// Only the first `=` splits, keys and values are trimmed, and an empty input
/// yields no overrides.
pub fn parse_overrides(raw: &str) -> Result<BTreeMap<String, String>, CrinitError> {
    let mut overrides = BTreeMap::new();
    if raw.is_empty() {
        return Ok(overrides);
    }

    for arg in raw.split(',') {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(CrinitError::validation(format!("wrong format for override arg: {arg}")));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CrinitError::validation(format!(
                "wrong format for override arg: {arg}, arg name cannot be empty"
            )));
        }
        overrides.insert(key.to_string(), value.trim().to_string());
    }
    Ok(overrides)
}
