//! Cluster Client
//!
//! A narrow client abstraction over the Kubernetes API surface crinit needs to
//! bootstrap a cluster registry: creating the core, apps, RBAC and
//! aggregation objects, reading back services, secrets and service accounts,
//! listing nodes and pods, and listing registry `Cluster` objects through an
//! aggregator.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, ClusterClientTrait};
//! use kube::config::Kubeconfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kubeconfig = Kubeconfig::read()?;
//! let client = ClusterClient::from_kubeconfig(kubeconfig, "kind-host").await?;
//!
//! let nodes = client.list_nodes().await?;
//! println!("{} nodes reachable through {}", nodes.len(), client.context());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Typed create/get/list/delete** for every object kind the bootstrap flow touches
//! - **Error classification**: `NotFound` and `AlreadyExists` are surfaced as
//!   distinct variants so callers can branch without inspecting status codes
//! - **Health probing** of the registry's `/healthz` over mutual TLS
//! - **Mocks** behind the `test-util` feature for unit testing callers

pub mod client;
pub mod error;
pub mod health;
pub mod object;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::ClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
pub use health::{HealthCredentials, HealthProbe, HttpsHealthProbe};
pub use object::{ObjectKind, ObjectRef};
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockHealthProbe};
