use crate::config::DiscoveryConfig;
use crate::registry::{Instance, Registry, WatchEvent, WatchEventKind};
use crate::sync::ServiceSubscription;
use crate::{Result, SyncError};
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    hosts: Vec<Instance>,
}

/// Watches services through the Nacos open API by polling the instance list
/// and forwarding every change.
#[derive(Clone)]
pub struct NacosRegistry {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    poll_interval: Duration,
    max_backoff: Duration,
    max_failures: u32,
}

impl NacosRegistry {
    pub fn new(discovery: &DiscoveryConfig) -> Result<NacosRegistry> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(SyncError::Registry)?;

        let context_path = discovery.context_path.trim_end_matches('/');
        let base_url = format!("http://{}:{}{}", discovery.ip, discovery.port, context_path);

        Ok(NacosRegistry {
            client,
            base_url,
            namespace: discovery.namespace.clone(),
            poll_interval: Duration::from_millis(discovery.poll_interval_ms.max(1)),
            max_backoff: Duration::from_millis(discovery.max_backoff_ms.max(discovery.poll_interval_ms)),
            max_failures: discovery.max_consecutive_failures,
        })
    }

    pub async fn fetch_instances(&self, subscription: &ServiceSubscription) -> Result<Vec<Instance>> {
        let url = format!("{}/v1/ns/instance/list", self.base_url);
        let res = self.client.get(&url)
            .query(&[
                ("serviceName", subscription.identity.service.as_str()),
                ("groupName", subscription.identity.group.as_str()),
                ("namespaceId", self.namespace.as_str()),
                ("healthyOnly", "false"),
            ])
            .send()
            .await
            .map_err(SyncError::Registry)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return SyncError::RegistryStatus(status.as_u16(), body).into();
        }

        let mut list: InstanceList = res.json().await.map_err(SyncError::Registry)?;
        list.hosts.sort_by(|a, b| (a.ip.as_str(), a.port).cmp(&(b.ip.as_str(), b.port)));

        Ok(list.hosts)
    }

    async fn watch(self, subscription: ServiceSubscription, events: mpsc::Sender<WatchEvent>) {
        let name = subscription.name.clone();
        let mut last: Option<Vec<Instance>> = None;
        let mut failures = 0;

        loop {
            let kind = match self.fetch_instances(&subscription).await {
                Ok(instances) => {
                    failures = 0;

                    if last.as_ref() == Some(&instances) {
                        None
                    } else {
                        debug!("Instance list of {} changed ({} instances)", subscription.identity, instances.len());
                        last = Some(instances.clone());
                        Some(WatchEventKind::Instances(instances))
                    }
                }

                Err(e) => {
                    failures += 1;

                    if self.max_failures > 0 && failures >= self.max_failures {
                        error!("Giving up on {} after {} consecutive failures: {}", subscription.identity, failures, e);
                        let lost = WatchEventKind::ConnectionLost(format!("{}: {}", subscription.identity, e));
                        let _ = events.send(WatchEvent { service: name, kind: lost }).await;
                        return;
                    }

                    warn!("Polling {} failed ({} in a row): {}", subscription.identity, failures, e);
                    Some(WatchEventKind::TransportError(e.to_string()))
                }
            };

            if let Some(kind) = kind {
                if events.send(WatchEvent { service: name.clone(), kind }).await.is_err() {
                    info!("Event queue closed, stopping watch for {}", subscription.identity);
                    return;
                }
            }

            let delay = if failures > 0 {
                calculate_backoff(failures, self.poll_interval.as_millis() as u64, self.max_backoff.as_millis() as u64)
            } else {
                self.next_delay()
            };
            tokio::time::sleep(delay).await;
        }
    }

    fn next_delay(&self) -> Duration {
        let base = self.poll_interval.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 10);
        Duration::from_millis(base + jitter)
    }
}

/// Delay before the next poll after `attempt` consecutive failures: doubles
/// from `base_ms` up to `max_ms`, plus up to 10% random jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
    let capped = exp.min(max_ms);
    let jitter = if capped >= 10 {
        rand::thread_rng().gen_range(0..capped / 10)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

impl Registry for NacosRegistry {
    fn subscribe(&self, subscription: &ServiceSubscription, events: mpsc::Sender<WatchEvent>) -> Result<()> {
        info!("Subscribing to {} for {}", subscription.identity, subscription.name);
        tokio::spawn(self.clone().watch(subscription.clone(), events));
        Ok(())
    }
}
