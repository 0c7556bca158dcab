//! Registry service creation and address resolution

use std::io::Write;
use std::net::IpAddr;

use cluster_client::{ClusterClientTrait, ObjectKind, ObjectRef};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use super::{HTTPS_PORT_NAME, apiserver_pod_labels, object_meta};
use crate::error::CrinitError;
use crate::options::ServiceType;
use crate::poller::{PollSettings, wait_for_load_balancer_address};

/// Port the service exposes
pub const SERVICE_PORT: i32 = 443;

/// Where the registry can be reached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub ips: Vec<String>,
    pub hostnames: Vec<String>,
    /// Allocated node port; only set for NodePort services
    pub node_port: Option<i32>,
}

impl ServiceEndpoint {
    /// `host[:nodePort]` for the first IP, else the first hostname
    pub fn endpoint(&self) -> Option<String> {
        let host = self.ips.first().or_else(|| self.hostnames.first())?;
        Some(match self.node_port {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        })
    }

    /// Endpoint list printed once the registry is up
    pub fn summary(&self) -> String {
        if self.node_port.is_some() {
            let first = self.endpoint().unwrap_or_default();
            if self.ips.len() > 1 {
                return format!("{first}, ...");
            }
            return first;
        }
        self.ips
            .iter()
            .chain(self.hostnames.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// What to create and how to find its address afterwards
#[derive(Debug, Clone)]
pub struct ServiceRequest<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub service_type: ServiceType,
    /// Explicit node port, NodePort only
    pub node_port: Option<i32>,
    pub advertise_address: Option<IpAddr>,
}

/// Build the registry service
pub fn build_service(request: &ServiceRequest<'_>) -> Service {
    let node_port = match request.service_type {
        ServiceType::NodePort => request.node_port,
        ServiceType::LoadBalancer => None,
    };
    Service {
        metadata: object_meta(Some(request.namespace), request.name),
        spec: Some(ServiceSpec {
            type_: Some(request.service_type.as_str().to_string()),
            selector: Some(apiserver_pod_labels()),
            ports: Some(vec![ServicePort {
                name: Some(HTTPS_PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::String(HTTPS_PORT_NAME.to_string())),
                node_port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the registry service and resolve where it can be reached.
///
/// LoadBalancer services wait for an ingress address. NodePort services use
/// the advertise address if given, else the node addresses. In dry run no
/// address is looked up.
pub async fn create_service(
    client: &dyn ClusterClientTrait,
    out: &mut dyn Write,
    request: &ServiceRequest<'_>,
    load_balancer_poll: PollSettings,
    dry_run: bool,
) -> Result<(Service, ServiceEndpoint), CrinitError> {
    let service = build_service(request);
    let advertised: Vec<String> = request.advertise_address.iter().map(IpAddr::to_string).collect();

    if dry_run {
        let endpoint = ServiceEndpoint {
            ips: advertised,
            hostnames: Vec::new(),
            node_port: match request.service_type {
                ServiceType::NodePort => request.node_port,
                ServiceType::LoadBalancer => None,
            },
        };
        return Ok((service, endpoint));
    }

    let created = client.create_service(request.namespace, &service).await.map_err(|e| {
        CrinitError::create(
            ObjectRef::namespaced(ObjectKind::Service, request.namespace, request.name),
            e,
        )
    })?;
    debug!(service = %request.name, service_type = %request.service_type, "Created registry service");

    let endpoint = match request.service_type {
        ServiceType::LoadBalancer => {
            let (ips, hostnames) =
                wait_for_load_balancer_address(client, out, request.namespace, request.name, load_balancer_poll)
                    .await?;
            ServiceEndpoint {
                ips,
                hostnames,
                node_port: None,
            }
        }
        ServiceType::NodePort => {
            let ips = if advertised.is_empty() {
                get_cluster_node_ips(client).await?
            } else {
                advertised
            };
            ServiceEndpoint {
                ips,
                hostnames: Vec::new(),
                node_port: allocated_node_port(&created),
            }
        }
    };
    Ok((created, endpoint))
}

/// One address per node, preferring ExternalIP over InternalIP, in node order
pub async fn get_cluster_node_ips(client: &dyn ClusterClientTrait) -> Result<Vec<String>, CrinitError> {
    let nodes = client.list_nodes().await?;
    let ips = nodes
        .iter()
        .filter_map(|node| {
            let addresses = node.status.as_ref()?.addresses.as_ref()?;
            let of_type = |wanted: &str| {
                addresses
                    .iter()
                    .find(|a| a.type_ == wanted)
                    .map(|a| a.address.clone())
            };
            of_type("ExternalIP").or_else(|| of_type("InternalIP"))
        })
        .collect();
    Ok(ips)
}

fn allocated_node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.name.as_deref() == Some(HTTPS_PORT_NAME))
        .and_then(|p| p.node_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockClusterClient;
    use k8s_openapi::api::core::v1::LoadBalancerIngress;
    use std::time::Duration;

    fn request(service_type: ServiceType) -> ServiceRequest<'static> {
        ServiceRequest {
            namespace: "clusterregistry",
            name: "foo",
            service_type,
            node_port: None,
            advertise_address: None,
        }
    }

    #[test]
    fn test_build_service_port_layout() {
        let mut req = request(ServiceType::NodePort);
        req.node_port = Some(32111);
        let service = build_service(&req);
        let spec = service.spec.expect("spec");
        let port = &spec.ports.expect("ports")[0];

        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(port.name.as_deref(), Some("https"));
        assert_eq!(port.port, 443);
        assert_eq!(port.target_port, Some(IntOrString::String("https".to_string())));
        assert_eq!(port.node_port, Some(32111));
        assert_eq!(spec.selector, Some(apiserver_pod_labels()));
    }

    #[tokio::test]
    async fn test_node_ips_prefer_external_one_per_node() {
        let client = MockClusterClient::new("host");
        client.add_node("a", &[("InternalIP", "10.0.0.1"), ("ExternalIP", "35.1.1.1")]);
        client.add_node("b", &[("Hostname", "b"), ("InternalIP", "10.0.0.2")]);
        client.add_node("c", &[("Hostname", "c")]);
        client.add_node("d", &[("ExternalIP", "35.1.1.4"), ("ExternalIP", "35.1.1.5")]);

        let ips = get_cluster_node_ips(&client).await.expect("ips");
        assert_eq!(ips, vec!["35.1.1.1", "10.0.0.2", "35.1.1.4"]);
    }

    #[tokio::test]
    async fn test_node_port_uses_allocated_port() {
        let client = MockClusterClient::new("host");
        client.add_node("a", &[("InternalIP", "10.0.0.1")]);
        let mut out: Vec<u8> = Vec::new();

        let (_, endpoint) = create_service(
            &client,
            &mut out,
            &request(ServiceType::NodePort),
            PollSettings::load_balancer(),
            false,
        )
        .await
        .expect("service");

        assert_eq!(endpoint.endpoint().as_deref(), Some("10.0.0.1:30000"));
        assert_eq!(endpoint.summary(), "10.0.0.1:30000");
    }

    #[tokio::test]
    async fn test_advertise_address_skips_node_lookup() {
        let client = MockClusterClient::new("host");
        let mut req = request(ServiceType::NodePort);
        req.node_port = Some(31000);
        req.advertise_address = Some("192.0.2.7".parse().expect("ip"));
        let mut out: Vec<u8> = Vec::new();

        let (_, endpoint) = create_service(&client, &mut out, &req, PollSettings::load_balancer(), false)
            .await
            .expect("service");

        assert_eq!(endpoint.ips, vec!["192.0.2.7"]);
        assert_eq!(endpoint.node_port, Some(31000));
        assert!(!client.calls().iter().any(|c| c.starts_with("list_nodes")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_balancer_waits_for_ingress() {
        let client = MockClusterClient::new("host");
        client.set_load_balancer_ingress(
            vec![
                LoadBalancerIngress {
                    ip: Some("150.0.0.1".to_string()),
                    ..Default::default()
                },
                LoadBalancerIngress {
                    hostname: Some("foo".to_string()),
                    ..Default::default()
                },
            ],
            0,
        );
        let settings = PollSettings {
            interval: Duration::from_secs(5),
            deadline: None,
        };
        let mut out: Vec<u8> = Vec::new();

        let (_, endpoint) = create_service(&client, &mut out, &request(ServiceType::LoadBalancer), settings, false)
            .await
            .expect("service");

        assert_eq!(endpoint.ips, vec!["150.0.0.1"]);
        assert_eq!(endpoint.hostnames, vec!["foo"]);
        assert_eq!(endpoint.endpoint().as_deref(), Some("150.0.0.1"));
        assert_eq!(endpoint.summary(), "150.0.0.1, foo");
    }

    #[tokio::test]
    async fn test_dry_run_resolves_nothing_remotely() {
        let client = MockClusterClient::new("host");
        let mut out: Vec<u8> = Vec::new();

        let (service, endpoint) = create_service(
            &client,
            &mut out,
            &request(ServiceType::NodePort),
            PollSettings::load_balancer(),
            true,
        )
        .await
        .expect("dry run");

        assert_eq!(service.metadata.name.as_deref(), Some("foo"));
        assert_eq!(service.metadata.namespace.as_deref(), Some("clusterregistry"));
        assert!(endpoint.ips.is_empty());
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_summary_elides_extra_node_ips() {
        let endpoint = ServiceEndpoint {
            ips: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            hostnames: Vec::new(),
            node_port: Some(30443),
        };
        assert_eq!(endpoint.summary(), "10.0.0.1:30443, ...");

        let hostname_only = ServiceEndpoint {
            ips: Vec::new(),
            hostnames: vec!["lb.example.com".to_string()],
            node_port: None,
        };
        assert_eq!(hostname_only.endpoint().as_deref(), Some("lb.example.com"));
    }
}
