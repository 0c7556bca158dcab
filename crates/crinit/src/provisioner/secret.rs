//! Credentials secret
//!
//! The API server reads its serving certificate, client CA and optional
//! static auth files from this secret, mounted as files.

use std::collections::BTreeMap;

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;

use super::{CA_CERT_KEY, object_meta};
use crate::credentials::{Credentials, auth_file_contents};
use crate::error::CrinitError;

pub const SERVER_CERT_KEY: &str = "server.crt";
pub const SERVER_KEY_KEY: &str = "server.key";
pub const BASIC_AUTH_KEY: &str = "basicauth.csv";
pub const TOKEN_AUTH_KEY: &str = "token.csv";

/// Secret data for `credentials`, in the file layout the API server expects
pub fn credentials_secret_data(credentials: &Credentials) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();
    let mut put = |key: &str, value: String| {
        data.insert(key.to_string(), ByteString(value.into_bytes()));
    };

    put(CA_CERT_KEY, credentials.ca.cert_pem.clone());
    put(SERVER_CERT_KEY, credentials.server.cert_pem.clone());
    put(SERVER_KEY_KEY, credentials.server.key_pem.clone());
    if let Some(password) = credentials.password() {
        put(BASIC_AUTH_KEY, auth_file_contents(&credentials.username, password));
    }
    if let Some(token) = credentials.token() {
        put(TOKEN_AUTH_KEY, auth_file_contents(&credentials.username, token));
    }
    data
}

/// Create a labelled opaque secret holding `data`
pub async fn create_secret(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    name: &str,
    data: BTreeMap<String, ByteString>,
    dry_run: bool,
) -> Result<Secret, CrinitError> {
    let secret = Secret {
        metadata: object_meta(Some(namespace), name),
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    };
    if dry_run {
        return Ok(secret);
    }

    client
        .create_secret(namespace, &secret)
        .await
        .map_err(|e| CrinitError::create(ObjectRef::namespaced(ObjectKind::Secret, namespace, name), e))
}
