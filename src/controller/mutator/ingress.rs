//! # Ingress Mutator

use super::replace_if_differs;
use k8s_openapi::api::networking::v1::Ingress;

/// Class, rules and TLS of the gateway Ingress.
///
/// Rules are only replaced when the exposed host is missing from the live
/// object, so extra rules added next to it are left in place.
pub fn ingress(desired: &Ingress, existing: &mut Ingress) -> bool {
    let Some(wanted) = desired.spec.as_ref() else {
        return false;
    };
    let current = existing.spec.get_or_insert_with(Default::default);
    let mut changed = replace_if_differs(&wanted.ingress_class_name, &mut current.ingress_class_name);

    let exposed_host = wanted
        .rules
        .as_ref()
        .and_then(|rules| rules.first())
        .and_then(|rule| rule.host.as_deref());
    let host_present = current
        .rules
        .as_ref()
        .is_some_and(|rules| rules.iter().any(|rule| rule.host.as_deref() == exposed_host));
    if !host_present {
        current.rules.clone_from(&wanted.rules);
        changed = true;
    }

    changed |= replace_if_differs(&wanted.tls, &mut current.tls);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec, IngressTLS};

    fn ingress_with_hosts(hosts: &[&str], tls: bool) -> Ingress {
        Ingress {
            spec: Some(IngressSpec {
                rules: Some(
                    hosts
                        .iter()
                        .map(|h| IngressRule {
                            host: Some((*h).to_string()),
                            http: None,
                        })
                        .collect(),
                ),
                tls: tls.then(|| {
                    vec![IngressTLS {
                        hosts: Some(vec![hosts[0].to_string()]),
                        secret_name: Some("tls".to_string()),
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_host_already_present_keeps_rules() {
        let desired = ingress_with_hosts(&["gw.example.com"], false);
        let mut existing = ingress_with_hosts(&["other.example.com", "gw.example.com"], false);
        assert!(!ingress(&desired, &mut existing));
        assert_eq!(existing.spec.unwrap().rules.unwrap().len(), 2);
    }

    #[test]
    fn test_host_change_replaces_rules() {
        let desired = ingress_with_hosts(&["new.example.com"], false);
        let mut existing = ingress_with_hosts(&["old.example.com"], false);
        assert!(ingress(&desired, &mut existing));
        assert!(!ingress(&desired, &mut existing));
    }

    #[test]
    fn test_tls_change_is_applied() {
        let desired = ingress_with_hosts(&["gw.example.com"], true);
        let mut existing = ingress_with_hosts(&["gw.example.com"], false);
        assert!(ingress(&desired, &mut existing));
        assert!(existing.spec.unwrap().tls.is_some());
    }
}
