//! Command line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::options::{
    DEFAULT_ETCD_IMAGE, DEFAULT_ETCD_PV_CAPACITY, DEFAULT_NAMESPACE, DEFAULT_SERVER_IMAGE, DeploymentOptions,
};

#[derive(Debug, Parser)]
#[command(name = "crinit", version, about = "Bootstrap a cluster registry into a Kubernetes cluster")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a cluster registry API server
    Init(InitArgs),
    /// Remove a cluster registry deployed by `init`
    Delete(DeleteArgs),
}

/// Flags shared by `init` and `delete`
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Name of the cluster registry
    pub name: String,

    /// Context of the cluster the registry runs in
    #[arg(long, env = "CRINIT_HOST_CLUSTER_CONTEXT")]
    pub host_cluster_context: String,

    /// Path to the kubeconfig to read contexts from and update
    #[arg(long, env = "CRINIT_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace the registry objects live in
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub cluster_registry_namespace: String,

    /// Context of the cluster running the aggregator; defaults to the host context
    #[arg(long)]
    pub aggregator_context: Option<String>,

    /// DNS name the aggregator uses to reach the registry when they run in
    /// different clusters
    #[arg(long)]
    pub canonical_name: Option<String>,

    /// Run a standalone API server instead of registering with an aggregator
    #[arg(long)]
    pub api_server_standalone: bool,

    /// Store etcd data on a persistent volume
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub etcd_persistent_storage: bool,

    /// Show what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Registry API server image
    #[arg(long, default_value = DEFAULT_SERVER_IMAGE)]
    pub image: String,

    /// etcd image
    #[arg(long, default_value = DEFAULT_ETCD_IMAGE)]
    pub etcd_image: String,

    /// Size of the etcd persistent volume
    #[arg(long, default_value = DEFAULT_ETCD_PV_CAPACITY)]
    pub etcd_pv_capacity: String,

    /// Storage class for the etcd persistent volume
    #[arg(long)]
    pub etcd_pv_storage_class: Option<String>,

    /// Extra API server flags, `key=value` pairs separated by commas
    #[arg(long, default_value = "")]
    pub apiserver_arg_overrides: String,

    /// How the API server is exposed: LoadBalancer or NodePort
    #[arg(long, default_value = "NodePort")]
    pub api_server_service_type: String,

    /// Allow a LoadBalancer service when the registry is aggregated
    #[arg(long)]
    pub allow_aggregated_load_balancer: bool,

    /// Address to advertise for the API server (NodePort only)
    #[arg(long)]
    pub api_server_advertise_address: Option<String>,

    /// Node port for the API server (NodePort only)
    #[arg(long)]
    pub api_server_port: Option<i64>,

    /// Generate a password and enable basic auth
    #[arg(long)]
    pub apiserver_enable_basic_auth: bool,

    /// Generate a bearer token and enable token auth
    #[arg(long)]
    pub apiserver_enable_token_auth: bool,

    /// Delete everything this run created if it fails
    #[arg(long)]
    pub rollback_on_failure: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Also delete the namespace, which may be shared with other workloads
    #[arg(long)]
    pub delete_namespace: bool,
}

impl CommonArgs {
    fn options(&self) -> DeploymentOptions {
        DeploymentOptions {
            name: self.name.clone(),
            host_context: self.host_cluster_context.clone(),
            aggregator_context: self.aggregator_context.clone(),
            namespace: self.cluster_registry_namespace.clone(),
            kubeconfig: self.kubeconfig.clone(),
            etcd_persistent_storage: self.etcd_persistent_storage,
            standalone: self.api_server_standalone,
            canonical_name: self.canonical_name.clone(),
            dry_run: self.dry_run,
            ..Default::default()
        }
    }
}

impl From<&InitArgs> for DeploymentOptions {
    fn from(args: &InitArgs) -> Self {
        DeploymentOptions {
            server_image: args.image.clone(),
            etcd_image: args.etcd_image.clone(),
            etcd_pv_capacity: args.etcd_pv_capacity.clone(),
            etcd_pv_storage_class: args.etcd_pv_storage_class.clone(),
            enable_basic_auth: args.apiserver_enable_basic_auth,
            enable_token_auth: args.apiserver_enable_token_auth,
            service_type: args.api_server_service_type.clone(),
            allow_load_balancer: args.allow_aggregated_load_balancer,
            advertise_address: args.api_server_advertise_address.clone(),
            port: args.api_server_port,
            arg_overrides: args.apiserver_arg_overrides.clone(),
            ..args.common.options()
        }
    }
}

impl From<&DeleteArgs> for DeploymentOptions {
    fn from(args: &DeleteArgs) -> Self {
        args.common.options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ServiceType, Topology};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("crinit").chain(args.iter().copied())).expect("valid args")
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_init_defaults() {
        let cli = parse(&["init", "foo", "--host-cluster-context", "host"]);
        let Command::Init(args) = cli.command else {
            panic!("expected init");
        };
        let plan = DeploymentOptions::from(&args).validate().expect("plan");

        assert_eq!(plan.namespace, "clusterregistry");
        assert_eq!(plan.server_image, "clusterregistry:dev");
        assert_eq!(plan.service_type, ServiceType::NodePort);
        assert!(plan.etcd_storage.is_some());
        assert!(plan.is_aggregated());
        assert!(!args.rollback_on_failure);
    }

    #[test]
    fn test_init_standalone_load_balancer() {
        let cli = parse(&[
            "init",
            "foo",
            "--host-cluster-context=host",
            "--api-server-standalone",
            "--api-server-service-type=LoadBalancer",
            "--etcd-persistent-storage=false",
            "--apiserver-arg-overrides=v=4,audit-log-path=-",
            "--dry-run",
        ]);
        let Command::Init(args) = cli.command else {
            panic!("expected init");
        };
        let plan = DeploymentOptions::from(&args).validate().expect("plan");

        assert_eq!(plan.topology, Topology::Standalone);
        assert_eq!(plan.service_type, ServiceType::LoadBalancer);
        assert!(plan.etcd_storage.is_none());
        assert!(plan.dry_run);
        assert_eq!(plan.arg_overrides.get("v").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_init_aggregated_load_balancer_needs_opt_in() {
        let base = ["init", "foo", "--host-cluster-context=host", "--api-server-service-type=LoadBalancer"];
        let Command::Init(args) = parse(&base).command else {
            panic!("expected init");
        };
        assert!(DeploymentOptions::from(&args).validate().is_err());

        let mut allowed = base.to_vec();
        allowed.push("--allow-aggregated-load-balancer");
        let Command::Init(args) = parse(&allowed).command else {
            panic!("expected init");
        };
        let plan = DeploymentOptions::from(&args).validate().expect("plan");
        assert!(plan.is_aggregated());
        assert_eq!(plan.service_type, ServiceType::LoadBalancer);
    }

    #[test]
    fn test_delete_flags() {
        let cli = parse(&[
            "delete",
            "foo",
            "--host-cluster-context=host",
            "--aggregator-context=agg",
            "--canonical-name=foo.example.com",
            "--delete-namespace",
        ]);
        let Command::Delete(args) = cli.command else {
            panic!("expected delete");
        };
        assert!(args.delete_namespace);
        let plan = DeploymentOptions::from(&args).validate().expect("plan");
        assert_eq!(plan.aggregator_context(), Some("agg"));
    }

    #[test]
    fn test_name_is_required() {
        assert!(Cli::try_parse_from(["crinit", "init", "--host-cluster-context=host"]).is_err());
    }
}
