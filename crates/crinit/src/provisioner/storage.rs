//! etcd persistent volume claim

use std::collections::BTreeMap;

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::object_meta;
use crate::error::CrinitError;
use crate::options::EtcdStorage;

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 10] = ["n", "u", "m", "", "k", "M", "G", "T", "P", "E"];

/// Parse a PV capacity such as `10Gi`, `500M` or `1e9`.
///
/// Follows the Kubernetes quantity grammar; negative capacities are rejected.
pub fn parse_quantity(raw: &str) -> Result<Quantity, CrinitError> {
    let value = raw.trim();
    if !is_quantity(value) {
        return Err(CrinitError::validation(format!(
            "invalid etcd-pv-capacity: {raw}, quantities must match the regular expression \
             '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$'"
        )));
    }
    if value.starts_with('-') {
        return Err(CrinitError::validation(format!(
            "invalid etcd-pv-capacity: {raw}, capacity cannot be negative"
        )));
    }
    Ok(Quantity(value.to_string()))
}

fn is_quantity(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    let digits = number.chars().filter(char::is_ascii_digit).count();
    let dots = number.len() - digits;
    if digits == 0 || dots > 1 {
        return false;
    }

    if BINARY_SUFFIXES.contains(&suffix) || DECIMAL_SUFFIXES.contains(&suffix) {
        return true;
    }
    // decimal exponent: e.g. 1e3, 2E-2
    match suffix.strip_prefix(['e', 'E']) {
        Some(exponent) => {
            let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            !exponent.is_empty() && exponent.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Build the ReadWriteOnce claim backing etcd
pub fn build_claim(namespace: &str, name: &str, storage: &EtcdStorage) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: object_meta(Some(namespace), name),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), storage.capacity.clone())])),
                ..Default::default()
            }),
            storage_class_name: storage.storage_class.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the etcd claim
pub async fn create_persistent_volume_claim(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    name: &str,
    storage: &EtcdStorage,
    dry_run: bool,
) -> Result<PersistentVolumeClaim, CrinitError> {
    let claim = build_claim(namespace, name, storage);
    if dry_run {
        return Ok(claim);
    }

    client.create_persistent_volume_claim(namespace, &claim).await.map_err(|e| {
        CrinitError::create(
            ObjectRef::namespaced(ObjectKind::PersistentVolumeClaim, namespace, name),
            e,
        )
    })
}
