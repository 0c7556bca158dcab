//! Integration tests for the cluster client
//!
//! These tests require a reachable Kubernetes cluster.
//! Set CRINIT_TEST_CONTEXT to a kubeconfig context to run.

use cluster_client::{ClusterClient, ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::config::Kubeconfig;

async fn client() -> ClusterClient {
    let context = std::env::var("CRINIT_TEST_CONTEXT")
        .expect("CRINIT_TEST_CONTEXT environment variable must be set");
    let kubeconfig = Kubeconfig::read().expect("Failed to read kubeconfig");

    ClusterClient::from_kubeconfig(kubeconfig, &context)
        .await
        .expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_client_creation() {
    let client = client().await;
    assert!(client.server_url().starts_with("https://"));

    let nodes = client.list_nodes().await.expect("Failed to list nodes");
    println!("Found {} nodes via {}", nodes.len(), client.context());
}

#[tokio::test]
#[ignore]
async fn test_get_missing_secret_is_not_found() {
    let client = client().await;

    let err = client
        .get_secret("default", "crinit-integration-does-not-exist")
        .await
        .expect_err("secret should not exist");
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
#[ignore]
async fn test_create_conflict_and_delete_secret() {
    let client = client().await;
    let name = format!("crinit-it-{}", uuid::Uuid::new_v4().simple());
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        ..Default::default()
    };

    client.create_secret("default", &secret).await.expect("Failed to create secret");

    let err = client
        .create_secret("default", &secret)
        .await
        .expect_err("second create should conflict");
    assert!(err.is_already_exists(), "unexpected error: {err}");

    client
        .delete_object(&ObjectRef::namespaced(ObjectKind::Secret, "default", name))
        .await
        .expect("Failed to delete secret");
}
