//! Kubeconfig handling
//!
//! Resolves which kubeconfig file to use, builds clients for its contexts,
//! and merges the registry's cluster, user and context entries into it.
//!
//! Entries are constructed through their serialized form so that the file
//! layout (`certificate-authority-data`, `users`, ...) is exactly what
//! `kubectl` reads.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cluster_client::ClusterClient;
use kube::config::{Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};
use serde::de::DeserializeOwned;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::credentials::{Credentials, count_pem_certificates};
use crate::error::CrinitError;

/// Name of the cluster, user and context in the aggregator kubeconfig
pub const AGGREGATOR_ENTRY_NAME: &str = "agg";

/// Suffix of the basic-auth user entry
const BASIC_AUTH_SUFFIX: &str = "-basic-auth";

/// Pick the kubeconfig file: `explicit`, else the first `KUBECONFIG` entry,
/// else `~/.kube/config`
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, CrinitError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(raw) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&raw).find(|p| !p.as_os_str().is_empty()) {
            return Ok(first);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".kube").join("config"))
        .ok_or_else(|| CrinitError::Kubeconfig("cannot determine home directory for ~/.kube/config".to_string()))
}

/// Load `path`; a missing file is an empty config
pub fn load(path: &Path) -> Result<Kubeconfig, CrinitError> {
    if !path.exists() {
        debug!(path = %path.display(), "Kubeconfig does not exist yet, starting empty");
        return Ok(Kubeconfig::default());
    }
    Kubeconfig::read_from(path).map_err(|e| CrinitError::Kubeconfig(format!("reading {}: {e}", path.display())))
}

/// Write `config` to `path` by renaming a temp file from the same directory
pub fn write_atomic(path: &Path, config: &Kubeconfig) -> Result<(), CrinitError> {
    let mut config = config.clone();
    config.api_version.get_or_insert_with(|| "v1".to_string());
    config.kind.get_or_insert_with(|| "Config".to_string());
    let yaml = serde_yaml::to_string(&config)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut file = NamedTempFile::new_in(&dir)?;
    file.write_all(yaml.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| CrinitError::Io(e.error))?;
    Ok(())
}

/// Build a client for `context` of the kubeconfig at `path`
pub async fn client_for_context(path: &Path, context: &str) -> Result<ClusterClient, CrinitError> {
    let config = Kubeconfig::read_from(path)
        .map_err(|e| CrinitError::Kubeconfig(format!("reading {}: {e}", path.display())))?;
    Ok(ClusterClient::from_kubeconfig(config, context).await?)
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, CrinitError> {
    serde_json::from_value(value).map_err(|e| CrinitError::Kubeconfig(format!("invalid kubeconfig entry: {e}")))
}

/// `https://` unless already present
fn https_url(endpoint: &str) -> String {
    if endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

/// Cluster, users and context for one registry
#[derive(Clone)]
pub struct KubeconfigEntry {
    pub name: String,
    cluster: NamedCluster,
    auth_infos: Vec<NamedAuthInfo>,
    context: NamedContext,
}

impl KubeconfigEntry {
    /// Entry for registry `name` served at `endpoint` (`host[:port]`)
    pub fn new(name: &str, endpoint: &str, credentials: &Credentials) -> Result<Self, CrinitError> {
        let cluster = from_json(json!({
            "name": name,
            "cluster": {
                "server": https_url(endpoint),
                "certificate-authority-data": BASE64.encode(&credentials.ca.cert_pem),
            },
        }))?;

        let mut user = json!({
            "client-certificate-data": BASE64.encode(&credentials.admin.cert_pem),
            "client-key-data": BASE64.encode(&credentials.admin.key_pem),
        });
        if let Some(token) = credentials.token() {
            user["token"] = json!(token);
        }
        let mut auth_infos = vec![from_json(json!({ "name": name, "user": user }))?];
        if let Some(password) = credentials.password() {
            auth_infos.push(from_json(json!({
                "name": format!("{name}{BASIC_AUTH_SUFFIX}"),
                "user": { "username": credentials.username, "password": password },
            }))?);
        }

        let context = from_json(json!({
            "name": name,
            "context": { "cluster": name, "user": name },
        }))?;

        Ok(Self {
            name: name.to_string(),
            cluster,
            auth_infos,
            context,
        })
    }
}

impl std::fmt::Debug for KubeconfigEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeconfigEntry").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Put `entry` into `config`, replacing same-named items in place
pub fn merge(config: &mut Kubeconfig, entry: &KubeconfigEntry) {
    match config.clusters.iter_mut().find(|c| c.name == entry.cluster.name) {
        Some(existing) => *existing = entry.cluster.clone(),
        None => config.clusters.push(entry.cluster.clone()),
    }
    for auth_info in &entry.auth_infos {
        match config.auth_infos.iter_mut().find(|a| a.name == auth_info.name) {
            Some(existing) => *existing = auth_info.clone(),
            None => config.auth_infos.push(auth_info.clone()),
        }
    }
    match config.contexts.iter_mut().find(|c| c.name == entry.context.name) {
        Some(existing) => *existing = entry.context.clone(),
        None => config.contexts.push(entry.context.clone()),
    }
}

/// Drop every entry that [`merge`] would have written for `name`.
///
/// Returns whether anything was removed.
pub fn remove_entries(config: &mut Kubeconfig, name: &str) -> bool {
    let basic_auth = format!("{name}{BASIC_AUTH_SUFFIX}");
    let before = config.clusters.len() + config.auth_infos.len() + config.contexts.len();

    config.clusters.retain(|c| c.name != name);
    config.auth_infos.retain(|a| a.name != name && a.name != basic_auth);
    config.contexts.retain(|c| c.name != name);
    if config.current_context.as_deref() == Some(name) {
        config.current_context = None;
    }

    before != config.clusters.len() + config.auth_infos.len() + config.contexts.len()
}

/// Merge `entry` into the kubeconfig at `path`. Nothing is written in dry run.
pub fn update_kubeconfig(path: &Path, entry: &KubeconfigEntry, dry_run: bool) -> Result<(), CrinitError> {
    if dry_run {
        return Ok(());
    }
    let mut config = load(path)?;
    merge(&mut config, entry);
    write_atomic(path, &config)?;
    debug!(path = %path.display(), name = %entry.name, "Updated kubeconfig");
    Ok(())
}

/// Kubeconfig letting the registry reach the aggregator at `endpoint` with a
/// service account token.
///
/// `ca_pem` must hold exactly one certificate.
pub fn build_aggregator_kubeconfig(endpoint: &str, token: &str, ca_pem: &[u8]) -> Result<Kubeconfig, CrinitError> {
    let certs = count_pem_certificates(ca_pem)?;
    if certs != 1 {
        return Err(CrinitError::Kubeconfig(format!("unexpected number of certs: {certs}")));
    }

    from_json(json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": AGGREGATOR_ENTRY_NAME,
            "cluster": {
                "server": https_url(endpoint),
                "certificate-authority-data": BASE64.encode(ca_pem),
            },
        }],
        "users": [{ "name": AGGREGATOR_ENTRY_NAME, "user": { "token": token } }],
        "contexts": [{
            "name": AGGREGATOR_ENTRY_NAME,
            "context": { "cluster": AGGREGATOR_ENTRY_NAME, "user": AGGREGATOR_ENTRY_NAME },
        }],
        "current-context": AGGREGATOR_ENTRY_NAME,
    }))
}
