//! API server deployment
//!
//! One replica running two containers: the registry API server and the etcd
//! it stores its objects in.

use std::collections::BTreeMap;

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::secret::{BASIC_AUTH_KEY, SERVER_CERT_KEY, SERVER_KEY_KEY, TOKEN_AUTH_KEY};
use super::{
    AGG_KUBECONFIG_MOUNT_PATH, APISERVER_SECURE_PORT, CA_CERT_KEY, CREDENTIALS_MOUNT_PATH,
    HTTPS_PORT_NAME, KUBECONFIG_SECRET_KEY, apiserver_pod_labels, arg_maps_to_arg_strings,
    object_meta,
};
use crate::error::CrinitError;

pub const SERVER_CONTAINER: &str = "clusterregistry";
pub const ETCD_CONTAINER: &str = "etcd";
pub const ETCD_VOLUME: &str = "etcddata";
pub const ETCD_MOUNT_PATH: &str = "/var/etcd";
pub const SERVER_BINARY: &str = "./clusterregistry";

/// Service account used by standalone registries
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// How the API server authenticates and authorizes requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Self-contained: client certs and optional static files only
    Standalone,
    /// Delegated to the aggregator it runs alongside, via `service_account`
    DelegatedInCluster { service_account: String },
    /// Delegated to a remote aggregator through a mounted kubeconfig secret
    DelegatedRemote { kubeconfig_secret: String },
}

/// Everything needed to build the deployment
#[derive(Debug, Clone)]
pub struct ApiServerSpec {
    pub namespace: String,
    pub name: String,
    pub server_image: String,
    pub etcd_image: String,
    pub credentials_secret: String,
    pub advertise_address: Option<String>,
    pub basic_auth_file: bool,
    pub token_auth_file: bool,
    pub arg_overrides: BTreeMap<String, String>,
    /// Claim backing etcd; `None` keeps etcd data in the container
    pub etcd_claim: Option<String>,
    pub auth: AuthMode,
}

impl ApiServerSpec {
    /// Default server flags, before overrides
    pub fn default_args(&self) -> BTreeMap<String, String> {
        let file = |key: &str| format!("{CREDENTIALS_MOUNT_PATH}/{key}");
        let mut args = BTreeMap::from([
            ("--bind-address".to_string(), "0.0.0.0".to_string()),
            ("--etcd-servers".to_string(), "http://localhost:2379".to_string()),
            ("--secure-port".to_string(), APISERVER_SECURE_PORT.to_string()),
            ("--client-ca-file".to_string(), file(CA_CERT_KEY)),
            ("--tls-cert-file".to_string(), file(SERVER_CERT_KEY)),
            ("--tls-private-key-file".to_string(), file(SERVER_KEY_KEY)),
        ]);
        if let Some(address) = &self.advertise_address {
            args.insert("--advertise-address".to_string(), address.clone());
        }
        if self.basic_auth_file {
            args.insert("--basic-auth-file".to_string(), file(BASIC_AUTH_KEY));
        }
        if self.token_auth_file {
            args.insert("--token-auth-file".to_string(), file(TOKEN_AUTH_KEY));
        }

        match &self.auth {
            AuthMode::Standalone => {}
            AuthMode::DelegatedInCluster { .. } => {
                args.insert("--use-delegated-auth".to_string(), "true".to_string());
            }
            AuthMode::DelegatedRemote { .. } => {
                let kubeconfig = format!("{AGG_KUBECONFIG_MOUNT_PATH}/{KUBECONFIG_SECRET_KEY}");
                args.insert("--use-delegated-auth".to_string(), "true".to_string());
                args.insert("--authentication-kubeconfig".to_string(), kubeconfig.clone());
                args.insert("--authorization-kubeconfig".to_string(), kubeconfig);
            }
        }
        args
    }

    /// Full server command line
    pub fn command(&self) -> Vec<String> {
        let mut command = vec![SERVER_BINARY.to_string()];
        command.extend(arg_maps_to_arg_strings(&self.default_args(), &self.arg_overrides));
        command
    }

    fn service_account_name(&self) -> Option<String> {
        match &self.auth {
            AuthMode::Standalone => Some(DEFAULT_SERVICE_ACCOUNT.to_string()),
            AuthMode::DelegatedInCluster { service_account } => Some(service_account.clone()),
            AuthMode::DelegatedRemote { .. } => None,
        }
    }
}

fn secret_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Build the API server deployment
pub fn build_deployment(spec: &ApiServerSpec) -> Deployment {
    let mut volumes = vec![secret_volume(&spec.credentials_secret)];
    let mut server_mounts = vec![read_only_mount(&spec.credentials_secret, CREDENTIALS_MOUNT_PATH)];
    if let AuthMode::DelegatedRemote { kubeconfig_secret } = &spec.auth {
        volumes.push(secret_volume(kubeconfig_secret));
        server_mounts.push(read_only_mount(kubeconfig_secret, AGG_KUBECONFIG_MOUNT_PATH));
    }

    let mut etcd_mounts = Vec::new();
    if let Some(claim) = &spec.etcd_claim {
        volumes.push(Volume {
            name: ETCD_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        etcd_mounts.push(VolumeMount {
            name: ETCD_VOLUME.to_string(),
            mount_path: ETCD_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    let server = Container {
        name: SERVER_CONTAINER.to_string(),
        image: Some(spec.server_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(spec.command()),
        ports: Some(vec![ContainerPort {
            name: Some(HTTPS_PORT_NAME.to_string()),
            container_port: APISERVER_SECURE_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(server_mounts),
        ..Default::default()
    };
    let etcd = Container {
        name: ETCD_CONTAINER.to_string(),
        image: Some(spec.etcd_image.clone()),
        command: Some(vec![
            "/usr/local/bin/etcd".to_string(),
            "--data-dir".to_string(),
            "/var/etcd/data".to_string(),
        ]),
        volume_mounts: (!etcd_mounts.is_empty()).then_some(etcd_mounts),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(Some(&spec.namespace), &spec.name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(apiserver_pod_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(spec.name.clone()),
                    labels: Some(apiserver_pod_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: spec.service_account_name(),
                    containers: vec![server, etcd],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the API server deployment
pub async fn create_deployment(
    client: &dyn ClusterClientTrait,
    spec: &ApiServerSpec,
    dry_run: bool,
) -> Result<Deployment, CrinitError> {
    let deployment = build_deployment(spec);
    if dry_run {
        return Ok(deployment);
    }

    client.create_deployment(&spec.namespace, &deployment).await.map_err(|e| {
        CrinitError::create(
            ObjectRef::namespaced(ObjectKind::Deployment, &spec.namespace, &spec.name),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(auth: AuthMode) -> ApiServerSpec {
        ApiServerSpec {
            namespace: "clusterregistry".to_string(),
            name: "foo-apiserver".to_string(),
            server_image: "clusterregistry:dev".to_string(),
            etcd_image: "etcd:3".to_string(),
            credentials_secret: "foo-apiserver-credentials".to_string(),
            advertise_address: Some("10.0.0.1".to_string()),
            basic_auth_file: false,
            token_auth_file: false,
            arg_overrides: BTreeMap::new(),
            etcd_claim: Some("foo-etcd-claim".to_string()),
            auth,
        }
    }

    fn pod_spec(deployment: &Deployment) -> &PodSpec {
        deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .expect("pod spec")
    }

    #[test]
    fn test_standalone_command_is_sorted() {
        let mut spec = spec(AuthMode::Standalone);
        spec.token_auth_file = true;
        spec.arg_overrides.insert("--secure-port".to_string(), "9443".to_string());

        assert_eq!(
            spec.command(),
            vec![
                "./clusterregistry",
                "--advertise-address=10.0.0.1",
                "--bind-address=0.0.0.0",
                "--client-ca-file=/etc/clusterregistry/apiserver/ca.crt",
                "--etcd-servers=http://localhost:2379",
                "--secure-port=9443",
                "--tls-cert-file=/etc/clusterregistry/apiserver/server.crt",
                "--tls-private-key-file=/etc/clusterregistry/apiserver/server.key",
                "--token-auth-file=/etc/clusterregistry/apiserver/token.csv",
            ]
        );
        let deployment = build_deployment(&spec);
        assert_eq!(pod_spec(&deployment).service_account_name.as_deref(), Some("default"));
    }

    #[test]
    fn test_etcd_volume_mounted_on_etcd_only() {
        let deployment = build_deployment(&spec(AuthMode::Standalone));
        let pod = pod_spec(&deployment);

        let server = &pod.containers[0];
        let etcd = &pod.containers[1];
        assert_eq!(server.name, "clusterregistry");
        assert_eq!(server.image_pull_policy.as_deref(), Some("Always"));
        let server_mounts = server.volume_mounts.as_ref().expect("server mounts");
        assert_eq!(server_mounts.len(), 1);
        assert_eq!(server_mounts[0].mount_path, "/etc/clusterregistry/apiserver");
        assert_eq!(server_mounts[0].read_only, Some(true));

        let etcd_mounts = etcd.volume_mounts.as_ref().expect("etcd mounts");
        assert_eq!(etcd_mounts[0].name, "etcddata");
        assert_eq!(etcd_mounts[0].mount_path, "/var/etcd");

        let claim = pod
            .volumes
            .as_ref()
            .and_then(|v| v.iter().find(|v| v.name == "etcddata"))
            .and_then(|v| v.persistent_volume_claim.as_ref())
            .expect("claim volume");
        assert_eq!(claim.claim_name, "foo-etcd-claim");
    }

    #[test]
    fn test_no_claim_means_no_etcd_volume() {
        let mut spec = spec(AuthMode::Standalone);
        spec.etcd_claim = None;
        let deployment = build_deployment(&spec);
        let pod = pod_spec(&deployment);

        assert!(pod.containers[1].volume_mounts.is_none());
        assert_eq!(pod.volumes.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_in_cluster_delegation_uses_service_account() {
        let spec = spec(AuthMode::DelegatedInCluster {
            service_account: "clusterregistry-k8s-io-apiserver".to_string(),
        });
        assert!(spec.command().contains(&"--use-delegated-auth=true".to_string()));

        let deployment = build_deployment(&spec);
        assert_eq!(
            pod_spec(&deployment).service_account_name.as_deref(),
            Some("clusterregistry-k8s-io-apiserver")
        );
    }

    #[test]
    fn test_remote_delegation_mounts_kubeconfig() {
        let spec = spec(AuthMode::DelegatedRemote {
            kubeconfig_secret: "foo-aggkubeconfig".to_string(),
        });
        let command = spec.command();
        assert!(command.contains(
            &"--authentication-kubeconfig=/etc/clusterregistry/aggkubeconfig/kubeconfig".to_string()
        ));
        assert!(command.contains(
            &"--authorization-kubeconfig=/etc/clusterregistry/aggkubeconfig/kubeconfig".to_string()
        ));

        let deployment = build_deployment(&spec);
        let pod = pod_spec(&deployment);
        assert!(pod.service_account_name.is_none());
        let mounts = pod.containers[0].volume_mounts.as_ref().expect("mounts");
        assert!(mounts
            .iter()
            .any(|m| m.name == "foo-aggkubeconfig" && m.mount_path == "/etc/clusterregistry/aggkubeconfig"));
    }
}
