//! Cluster Registry API types
//!
//! Typed views of the `clusterregistry.k8s.io/v1alpha1` resources served by the
//! cluster registry API server. Only the fields the bootstrap tooling reads or
//! writes are modelled.

pub mod cluster;

pub use cluster::*;

/// API group served by the cluster registry.
pub const GROUP: &str = "clusterregistry.k8s.io";

/// API version served by the cluster registry.
pub const VERSION: &str = "v1alpha1";
