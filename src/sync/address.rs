use crate::registry::{Instance, ServiceIdentity};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceAddress {
    pub ip: String,
    pub port: u16,
    // 0 means drained, rendered as `down`
    pub weight: u32,
}

impl ServiceAddress {
    pub fn from_instance(instance: &Instance) -> ServiceAddress {
        ServiceAddress {
            ip: instance.ip.clone(),
            port: instance.port,
            weight: nginx_weight(instance.weight),
        }
    }
}

// nginx only accepts positive integer weights; a zero weight drains the instance
fn nginx_weight(weight: f64) -> u32 {
    if !weight.is_finite() || weight <= 0.0 {
        0
    } else {
        weight.round().clamp(1.0, u32::MAX as f64) as u32
    }
}

/// Logical service name -> eligible addresses.
pub type ServiceAddressMap = BTreeMap<String, Vec<ServiceAddress>>;

/// Groups the eligible instances of one event by logical service.
///
/// Every service that appears in `instances` gets an entry, even when none of
/// its instances pass the health and enabled checks. Services that do not
/// appear are left out.
pub fn resolve_addresses(instances: &[Instance]) -> Result<ServiceAddressMap> {
    let mut addresses = ServiceAddressMap::new();

    for instance in instances {
        let identity = ServiceIdentity::parse(&instance.service_name)?;
        let entry = addresses.entry(identity.service).or_insert_with(Vec::new);

        if instance.is_eligible() {
            entry.push(ServiceAddress::from_instance(instance));
        }
    }

    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncError;

    fn instance(ip: &str, healthy: bool, enabled: bool, identity: &str) -> Instance {
        Instance {
            ip: ip.to_owned(),
            port: 8080,
            weight: 1.0,
            healthy,
            enabled,
            service_name: identity.to_owned(),
        }
    }

    #[test]
    fn keeps_only_healthy_and_enabled() {
        let instances = vec![
            instance("10.0.0.1", true, true, "G@@svc1"),
            instance("10.0.0.2", false, true, "G@@svc1"),
            instance("10.0.0.3", true, false, "G@@svc1"),
            instance("10.0.0.4", false, false, "G@@svc1"),
        ];

        let resolved = resolve_addresses(&instances).unwrap();
        let ips: Vec<&str> = resolved["svc1"].iter().map(|a| a.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1"]);
    }

    #[test]
    fn groups_by_logical_service() {
        let instances = vec![
            instance("10.0.0.1", true, true, "G@@svc1"),
            instance("10.0.0.2", true, true, "G@@svc2"),
            instance("10.0.0.3", true, true, "G@@svc1"),
        ];

        let resolved = resolve_addresses(&instances).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["svc1"].len(), 2);
        assert_eq!(resolved["svc2"].len(), 1);
    }

    #[test]
    fn unhealthy_only_service_resolves_to_empty_set() {
        let resolved = resolve_addresses(&[instance("10.0.0.1", false, true, "G@@svc1")]).unwrap();
        assert_eq!(resolved.get("svc1"), Some(&Vec::new()));
    }

    #[test]
    fn empty_event_touches_nothing() {
        assert!(resolve_addresses(&[]).unwrap().is_empty());
    }

    #[test]
    fn malformed_identity_is_an_error() {
        let err = resolve_addresses(&[instance("10.0.0.1", true, true, "svc1")]).unwrap_err();
        assert!(matches!(err, SyncError::MalformedIdentity(_)));
    }

    #[test]
    fn weights_round_and_zero_drains() {
        assert_eq!(nginx_weight(0.0), 0);
        assert_eq!(nginx_weight(-1.0), 0);
        assert_eq!(nginx_weight(0.4), 1);
        assert_eq!(nginx_weight(2.6), 3);
        assert_eq!(nginx_weight(f64::NAN), 0);
    }
}
