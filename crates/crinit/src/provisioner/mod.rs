//! Remote object provisioning.
//!
//! One module per object kind. Every creator takes a `dry_run` flag: in dry
//! run the fully built object is returned and nothing is sent to the
//! cluster. Otherwise the object is created and the server's copy returned.
//! Create failures are wrapped with the kind and name of the object.

pub mod apiservice;
pub mod deployment;
pub mod external;
pub mod namespace;
pub mod rbac;
pub mod secret;
pub mod service;
pub mod storage;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Registry API group
pub const API_GROUP: &str = crds::GROUP;

/// Registry API version
pub const API_VERSION: &str = crds::VERSION;

/// Label put on every object the bootstrap creates
pub const COMPONENT_LABEL: (&str, &str) = ("app", "clusterregistry");

/// Extra label selecting the API server pods
pub const APISERVER_LABEL: (&str, &str) = ("module", "clusterregistry-apiserver");

/// Name of the API server's secure port
pub const HTTPS_PORT_NAME: &str = "https";

/// Port the API server listens on inside the pod
pub const APISERVER_SECURE_PORT: i32 = 8443;

/// Where the credentials secret is mounted in the API server container
pub const CREDENTIALS_MOUNT_PATH: &str = "/etc/clusterregistry/apiserver";

/// Where the aggregator kubeconfig secret is mounted (cross-cluster only)
pub const AGG_KUBECONFIG_MOUNT_PATH: &str = "/etc/clusterregistry/aggkubeconfig";

/// Secret key holding a kubeconfig
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Secret key holding a CA bundle
pub const CA_CERT_KEY: &str = "ca.crt";

/// `app=clusterregistry`
pub fn component_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(COMPONENT_LABEL.0.to_string(), COMPONENT_LABEL.1.to_string())])
}

/// Component labels plus `module=clusterregistry-apiserver`
pub fn apiserver_pod_labels() -> BTreeMap<String, String> {
    let mut labels = component_labels();
    labels.insert(APISERVER_LABEL.0.to_string(), APISERVER_LABEL.1.to_string());
    labels
}

/// Metadata with a name, an optional namespace and the component labels
pub(crate) fn object_meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(component_labels()),
        ..Default::default()
    }
}

/// Merge `overrides` over `defaults` and render each pair as `k=v`.
///
/// Keys are `--flag` names; the output is sorted by key.
pub fn arg_maps_to_arg_strings(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut merged = defaults.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_arg_maps_override_wins_and_sorted() {
        let defaults = map(&[("--secure-port", "8443"), ("--bind-address", "0.0.0.0")]);
        let overrides = map(&[("--secure-port", "9443"), ("--v", "4")]);

        let args = arg_maps_to_arg_strings(&defaults, &overrides);

        assert_eq!(args, vec!["--bind-address=0.0.0.0", "--secure-port=9443", "--v=4"]);
    }

    #[test]
    fn test_arg_maps_with_no_overrides() {
        let defaults = map(&[("--b", "2"), ("--a", "1")]);
        assert_eq!(
            arg_maps_to_arg_strings(&defaults, &BTreeMap::new()),
            vec!["--a=1", "--b=2"]
        );
        assert!(arg_maps_to_arg_strings(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_pod_labels_extend_component_labels() {
        let labels = apiserver_pod_labels();
        assert_eq!(labels.get("app").map(String::as_str), Some("clusterregistry"));
        assert_eq!(labels.get("module").map(String::as_str), Some("clusterregistry-apiserver"));
        assert_eq!(labels.len(), 2);
    }
}
