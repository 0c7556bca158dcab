//! Aggregation layer registration

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::ByteString;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{APIService, APIServiceSpec, ServiceReference};

use super::{API_GROUP, API_VERSION, object_meta};
use crate::error::CrinitError;

pub const GROUP_PRIORITY_MINIMUM: i32 = 10000;
pub const VERSION_PRIORITY: i32 = 20;

/// `<version>.<group>`
pub fn api_service_name() -> String {
    format!("{API_VERSION}.{API_GROUP}")
}

/// Registration routing the registry group to service `namespace/service_name`
pub fn build_api_service(namespace: &str, service_name: &str, ca_pem: &str) -> APIService {
    APIService {
        metadata: object_meta(None, &api_service_name()),
        spec: Some(APIServiceSpec {
            group: Some(API_GROUP.to_string()),
            version: Some(API_VERSION.to_string()),
            service: Some(ServiceReference {
                namespace: Some(namespace.to_string()),
                name: Some(service_name.to_string()),
                ..Default::default()
            }),
            ca_bundle: Some(ByteString(ca_pem.as_bytes().to_vec())),
            group_priority_minimum: GROUP_PRIORITY_MINIMUM,
            version_priority: VERSION_PRIORITY,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub async fn create_api_service(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    service_name: &str,
    ca_pem: &str,
    dry_run: bool,
) -> Result<APIService, CrinitError> {
    let api_service = build_api_service(namespace, service_name, ca_pem);
    if dry_run {
        return Ok(api_service);
    }
    client
        .create_api_service(&api_service)
        .await
        .map_err(|e| CrinitError::create(ObjectRef::cluster_scoped(ObjectKind::ApiService, api_service_name()), e))
}
