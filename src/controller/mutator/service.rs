//! # Service Mutators

use super::Chain;
use k8s_openapi::api::core::v1::Service;

pub fn ports(desired: &Service, existing: &mut Service) -> bool {
    let wanted = desired.spec.as_ref().and_then(|s| s.ports.as_ref());
    if existing.spec.as_ref().and_then(|s| s.ports.as_ref()) == wanted {
        return false;
    }
    existing.spec.get_or_insert_with(Default::default).ports = wanted.cloned();
    true
}

/// Pod selector. The selector is the single routing decision of the Service,
/// so it is replaced rather than merged.
pub fn selector(desired: &Service, existing: &mut Service) -> bool {
    let wanted = desired.spec.as_ref().and_then(|s| s.selector.as_ref());
    if existing.spec.as_ref().and_then(|s| s.selector.as_ref()) == wanted {
        return false;
    }
    existing.spec.get_or_insert_with(Default::default).selector = wanted.cloned();
    true
}

#[must_use]
pub fn chain() -> Chain<Service> {
    Chain::new()
        .with(ports)
        .with(selector)
        .with(super::metadata::owner_reference::<Service>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mutator::Mutator;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use std::collections::BTreeMap;

    fn service(selector: &[(&str, &str)], ports: &[i32]) -> Service {
        Service {
            spec: Some(ServiceSpec {
                selector: Some(
                    selector
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ports: Some(
                    ports
                        .iter()
                        .map(|p| ServicePort {
                            port: *p,
                            ..Default::default()
                        })
                        .collect(),
                ),
                cluster_ip: Some("10.0.0.12".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_selector_and_ports_replaced() {
        let desired = service(&[("deployment", "apicast-a")], &[8080, 8090]);
        let mut existing = service(&[("deployment", "apicast-a"), ("rht.comp_ver", "2.11")], &[8080]);

        assert!(chain().mutate(&desired, &mut existing));
        let spec = existing.spec.as_ref().unwrap();
        assert_eq!(spec.selector, desired.spec.as_ref().unwrap().selector);
        assert_eq!(spec.ports.as_ref().unwrap().len(), 2);
        assert!(!chain().mutate(&desired, &mut existing));
    }

    #[test]
    fn test_cluster_ip_is_not_owned() {
        let desired = service(&[("deployment", "apicast-a")], &[8080]);
        let mut existing = desired.clone();
        existing.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.99".to_string());

        assert!(!chain().mutate(&desired, &mut existing));
        assert_eq!(
            existing.spec.as_ref().unwrap().cluster_ip.as_deref(),
            Some("10.0.0.99")
        );
    }
}
