//! Cluster resource
//!
//! A `Cluster` records how to reach one remote Kubernetes cluster. The
//! registry API server owns storage and validation; crinit only lists these
//! objects to confirm the API is reachable through the aggregator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "clusterregistry.k8s.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Endpoints of the cluster's Kubernetes API server
    #[serde(default)]
    pub kubernetes_api_endpoints: KubernetesApiEndpoints,

    /// Public hints describing how to authenticate to the cluster
    #[serde(default)]
    pub auth_info: AuthInfo,
}

/// Endpoints for one and only one Kubernetes API server.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApiEndpoints {
    /// Addresses of the API server, selected by client CIDR
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_endpoints: Vec<ServerAddressByClientCidr>,

    /// Base64-encoded certificate authority bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

/// Server address to use for clients matching a CIDR.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ServerAddressByClientCidr {
    /// CIDR matched against the client IP
    #[serde(rename = "clientCIDR", default, skip_serializing_if = "String::is_empty")]
    pub client_cidr: String,

    /// Hostname, hostname:port, IP or IP:port
    #[serde(rename = "serverAddress", default, skip_serializing_if = "String::is_empty")]
    pub server_address: String,
}

/// Non-secret authentication hints.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    /// Implementation-specific user authentication details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ObjectReference>,

    /// Implementation-specific controller authentication details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ObjectReference>,
}

/// Reference to an object holding authentication details.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Observed conditions of the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,
}

/// One observed condition of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Condition type, e.g. [`CONDITION_OK`] or [`CONDITION_OFFLINE`]
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The cluster's API server is healthy and ready to receive requests.
pub const CONDITION_OK: &str = "Ok";

/// The cluster's API server is not reachable.
pub const CONDITION_OFFLINE: &str = "Offline";
