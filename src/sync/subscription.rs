use crate::config::DiscoveryConfig;
use crate::registry::ServiceIdentity;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceSubscription {
    // Logical name, also the service segment of the identity
    pub name: String,
    pub identity: ServiceIdentity,
    pub server_name: String,
    pub port: u16,
    pub upstream: String,
}

impl ServiceSubscription {
    /// Name of the rendered file, derived only from the upstream name.
    pub fn file_name(&self) -> String {
        format!("{}.conf", self.upstream)
    }
}

/// Lookup of subscriptions by logical name, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionMap {
    by_name: BTreeMap<String, ServiceSubscription>,
}

impl SubscriptionMap {
    pub fn from_discovery(discovery: &DiscoveryConfig) -> SubscriptionMap {
        discovery.subscribe_services.iter()
            .map(|svc| {
                let group = svc.group_name.clone().unwrap_or_else(|| discovery.group_name.clone());

                ServiceSubscription {
                    name: svc.service_name.clone(),
                    identity: ServiceIdentity::new(group, svc.service_name.clone()),
                    server_name: svc.nginx_server_name.clone(),
                    port: svc.nginx_port,
                    upstream: svc.nginx_upstream_name.clone(),
                }
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSubscription> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceSubscription> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}

impl FromIterator<ServiceSubscription> for SubscriptionMap {
    fn from_iter<I: IntoIterator<Item = ServiceSubscription>>(iter: I) -> Self {
        SubscriptionMap {
            by_name: iter.into_iter().map(|sub| (sub.name.clone(), sub)).collect(),
        }
    }
}
