//! # crinit
//!
//! Bootstraps a cluster registry API server into a Kubernetes cluster.
//!
//! The registry runs either standalone, with its own authentication, or
//! registered with the Kubernetes API aggregator of the same or another
//! cluster. A run validates its options into a [`options::DeploymentPlan`],
//! creates the remote objects in order through the
//! [`orchestrator::Orchestrator`], waits for the registry to serve, and adds
//! a context for it to the user's kubeconfig.

pub mod cli;
pub mod credentials;
pub mod error;
pub mod kubeconfig;
pub mod options;
pub mod orchestrator;
pub mod poller;
pub mod provisioner;

pub use error::CrinitError;
