//! Readiness polling.
//!
//! Each wait runs an attempt every `interval` until it reports ready or the
//! optional deadline passes. Attempt errors only mean "not ready yet"; the
//! last one is surfaced if the deadline is hit. Every attempt writes a `.`
//! to the progress writer.

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use cluster_client::{ClusterClientTrait, ClusterError, HealthProbe};
use k8s_openapi::api::core::v1::Secret;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CrinitError;

/// Secret type the token controller gives service account token secrets
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Interval and optional deadline of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` polls forever
    pub deadline: Option<Duration>,
}

impl PollSettings {
    /// Load balancer address: every 5s, no deadline
    pub const fn load_balancer() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: None,
        }
    }

    /// Pods running: every 2s, no deadline
    pub const fn pods() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: None,
        }
    }

    /// Health endpoint: every 2s, no deadline
    pub const fn health() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: None,
        }
    }

    /// Registry visible through the aggregator: every 2s for 1 minute
    pub const fn aggregator() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Some(Duration::from_secs(60)),
        }
    }

    /// Service account token secret: every second for 30 seconds
    pub const fn service_account_token() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Some(Duration::from_secs(30)),
        }
    }
}

/// Settings for every wait of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub load_balancer: PollSettings,
    pub pods: PollSettings,
    pub health: PollSettings,
    pub aggregator: PollSettings,
    pub service_account_token: PollSettings,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            load_balancer: PollSettings::load_balancer(),
            pods: PollSettings::pods(),
            health: PollSettings::health(),
            aggregator: PollSettings::aggregator(),
            service_account_token: PollSettings::service_account_token(),
        }
    }
}

/// Run `attempt` until it yields a value or the deadline passes.
///
/// `Ok(None)` means not ready; `Err` is remembered as the last error.
pub async fn poll_until<T, F, Fut>(
    out: &mut dyn Write,
    what: &str,
    settings: PollSettings,
    mut attempt: F,
) -> Result<T, CrinitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ClusterError>>,
{
    let start = Instant::now();
    let mut attempts = 0_u32;

    loop {
        write!(out, ".")?;
        out.flush()?;
        attempts += 1;

        let last_error = match attempt().await {
            Ok(Some(value)) => {
                debug!(what, attempts, "Wait finished");
                return Ok(value);
            }
            Ok(None) => None,
            Err(e) => {
                debug!(what, attempts, error = %e, "Attempt failed, retrying");
                Some(e)
            }
        };

        if let Some(deadline) = settings.deadline {
            if start.elapsed() + settings.interval > deadline {
                return Err(match last_error {
                    Some(source) => CrinitError::Poll {
                        what: what.to_string(),
                        source,
                    },
                    None => CrinitError::Timeout {
                        what: what.to_string(),
                        after: deadline,
                    },
                });
            }
        }
        tokio::time::sleep(settings.interval).await;
    }
}

/// Wait for a LoadBalancer service to get an ingress address.
///
/// Returns the ingress IPs and hostnames, each in ingress order.
pub async fn wait_for_load_balancer_address(
    client: &dyn ClusterClientTrait,
    out: &mut dyn Write,
    namespace: &str,
    name: &str,
    settings: PollSettings,
) -> Result<(Vec<String>, Vec<String>), CrinitError> {
    poll_until(out, "load balancer address", settings, || async {
        let service = client.get_service(namespace, name).await?;
        let ingress = service
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default();

        let ips: Vec<String> = ingress.iter().filter_map(|i| i.ip.clone()).collect();
        let hostnames: Vec<String> = ingress.iter().filter_map(|i| i.hostname.clone()).collect();
        if ips.is_empty() && hostnames.is_empty() {
            return Ok(None);
        }
        Ok(Some((ips, hostnames)))
    })
    .await
}

/// Wait until every name prefix in `prefixes` has a pod in phase `Running`
pub async fn wait_for_pods(
    client: &dyn ClusterClientTrait,
    out: &mut dyn Write,
    namespace: &str,
    prefixes: &[String],
    settings: PollSettings,
) -> Result<(), CrinitError> {
    poll_until(out, "registry pods", settings, || async {
        let pods = client.list_pods(namespace).await?;
        let all_running = prefixes.iter().all(|prefix| {
            pods.iter().any(|pod| {
                let name_matches = pod.metadata.name.as_deref().is_some_and(|n| n.starts_with(prefix.as_str()));
                let running = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Running");
                name_matches && running
            })
        });
        Ok(all_running.then_some(()))
    })
    .await
}

/// Wait until the health endpoint answers `ok` (case-insensitive)
pub async fn wait_for_healthy(
    probe: &dyn HealthProbe,
    out: &mut dyn Write,
    settings: PollSettings,
) -> Result<(), CrinitError> {
    poll_until(out, "registry health", settings, || async {
        let body = probe.healthz().await?;
        Ok(body.eq_ignore_ascii_case("ok").then_some(()))
    })
    .await
}

/// Wait until `Cluster` objects can be listed through the aggregator
pub async fn wait_for_aggregator(
    client: &dyn ClusterClientTrait,
    out: &mut dyn Write,
    settings: PollSettings,
) -> Result<(), CrinitError> {
    poll_until(out, "cluster registry API via the aggregator", settings, || async {
        let clusters = client.list_clusters().await?;
        debug!(count = clusters.len(), "Listed clusters through the aggregator");
        Ok(Some(()))
    })
    .await
}

/// Wait for the token secret of service account `account` to exist
pub async fn wait_for_service_account_token(
    client: &dyn ClusterClientTrait,
    out: &mut dyn Write,
    namespace: &str,
    account: &str,
    settings: PollSettings,
) -> Result<Secret, CrinitError> {
    poll_until(out, "service account token secret", settings, || async {
        let account = client.get_service_account(namespace, account).await?;
        for reference in account.secrets.unwrap_or_default() {
            let Some(name) = reference.name else {
                continue;
            };
            let secret = client.get_secret(namespace, &name).await?;
            if secret.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN_TYPE) {
                debug!(secret = %name, "Using service account token secret");
                return Ok(Some(secret));
            }
        }
        Ok(None)
    })
    .await
}
