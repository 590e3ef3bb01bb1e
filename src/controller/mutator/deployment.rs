//! # Deployment Mutators
//!
//! One function per owned field group of the gateway Deployment. Container
//! level mutators address the first container only; [`containers`] makes sure
//! there is exactly one before the others look at it.

use super::{replace_if_differs, Chain};
use crate::controller::secret_tracker::is_tracked_annotation;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

fn pod_spec_mut(deployment: &mut Deployment) -> Option<&mut PodSpec> {
    deployment.spec.as_mut()?.template.spec.as_mut()
}

fn container(deployment: &Deployment) -> Option<&Container> {
    pod_spec(deployment)?.containers.first()
}

fn container_mut(deployment: &mut Deployment) -> Option<&mut Container> {
    pod_spec_mut(deployment)?.containers.first_mut()
}

/// Apply `field` to the first container of both objects
fn with_containers<F>(desired: &Deployment, existing: &mut Deployment, field: F) -> bool
where
    F: FnOnce(&Container, &mut Container) -> bool,
{
    match (container(desired), container_mut(existing)) {
        (Some(desired), Some(existing)) => field(desired, existing),
        _ => false,
    }
}

/// Apply `field` to the pod spec of both objects
fn with_pod_specs<F>(desired: &Deployment, existing: &mut Deployment, field: F) -> bool
where
    F: FnOnce(&PodSpec, &mut PodSpec) -> bool,
{
    match (pod_spec(desired), pod_spec_mut(existing)) {
        (Some(desired), Some(existing)) => field(desired, existing),
        _ => false,
    }
}

/// The gateway pod runs exactly one container. Anything else is replaced.
pub fn containers(desired: &Deployment, existing: &mut Deployment) -> bool {
    let Some(desired_spec) = pod_spec(desired) else {
        return false;
    };
    if pod_spec(existing).is_some_and(|spec| spec.containers.len() == 1) {
        return false;
    }
    let Some(existing_deployment_spec) = existing.spec.as_mut() else {
        return false;
    };
    let existing_spec = existing_deployment_spec
        .template
        .spec
        .get_or_insert_with(PodSpec::default);
    existing_spec.containers.clone_from(&desired_spec.containers);
    true
}

/// Replica count. Left out of the chain while an autoscaler owns the field.
pub fn replicas(desired: &Deployment, existing: &mut Deployment) -> bool {
    let desired_replicas = desired.spec.as_ref().and_then(|s| s.replicas);
    match existing.spec.as_mut() {
        Some(spec) => replace_if_differs(&desired_replicas, &mut spec.replicas),
        None => false,
    }
}

pub fn image(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_containers(desired, existing, |d, e| replace_if_differs(&d.image, &mut e.image))
}

pub fn service_account(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_pod_specs(desired, existing, |d, e| {
        replace_if_differs(&d.service_account_name, &mut e.service_account_name)
    })
}

/// Environment list, replaced as a whole when its length differs or any
/// desired variable is missing or different
pub fn env(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_containers(desired, existing, |d, e| {
        let wanted = d.env.clone().unwrap_or_default();
        let current = e.env.as_deref().unwrap_or_default();
        let in_sync = current.len() == wanted.len()
            && wanted.iter().all(|var| {
                current
                    .iter()
                    .find(|candidate| candidate.name == var.name)
                    .is_some_and(|candidate| candidate == var)
            });
        if in_sync {
            return false;
        }
        e.env = Some(wanted);
        true
    })
}

/// Container resources, compared by quantity value rather than spelling
pub fn resources(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_containers(desired, existing, |d, e| {
        let wanted = d.resources.clone().unwrap_or_default();
        let current = e.resources.clone().unwrap_or_default();
        if resources_equal(&current, &wanted) {
            return false;
        }
        e.resources = Some(wanted);
        true
    })
}

/// Pod template annotations, merged key by key.
///
/// Foreign annotations survive. Secret tracking annotations no longer wanted
/// are removed so an unreferenced secret stops influencing rollouts.
pub fn pod_template_annotations(desired: &Deployment, existing: &mut Deployment) -> bool {
    let wanted = desired
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();
    let Some(spec) = existing.spec.as_mut() else {
        return false;
    };
    let current = spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();

    let mut merged = current.clone();
    merged.retain(|key, _| !is_tracked_annotation(key) || wanted.contains_key(key));
    merge_map(&wanted, &mut merged);
    if merged == current {
        return false;
    }
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations = Some(merged);
    true
}

/// Pod template labels, merged key by key
pub fn pod_template_labels(desired: &Deployment, existing: &mut Deployment) -> bool {
    let wanted = desired
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    let Some(spec) = existing.spec.as_mut() else {
        return false;
    };
    let mut labels = spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    if !merge_map(&wanted, &mut labels) {
        return false;
    }
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .labels = Some(labels);
    true
}

pub fn volumes(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_pod_specs(desired, existing, |d, e| replace_if_differs(&d.volumes, &mut e.volumes))
}

pub fn volume_mounts(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_containers(desired, existing, |d, e| {
        replace_if_differs(&d.volume_mounts, &mut e.volume_mounts)
    })
}

pub fn ports(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_containers(desired, existing, |d, e| replace_if_differs(&d.ports, &mut e.ports))
}

pub fn affinity(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_pod_specs(desired, existing, |d, e| replace_if_differs(&d.affinity, &mut e.affinity))
}

pub fn tolerations(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_pod_specs(desired, existing, |d, e| {
        replace_if_differs(&d.tolerations, &mut e.tolerations)
    })
}

pub fn topology_spread_constraints(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_pod_specs(desired, existing, |d, e| {
        replace_if_differs(
            &d.topology_spread_constraints,
            &mut e.topology_spread_constraints,
        )
    })
}

pub fn priority_class_name(desired: &Deployment, existing: &mut Deployment) -> bool {
    with_pod_specs(desired, existing, |d, e| {
        replace_if_differs(&d.priority_class_name, &mut e.priority_class_name)
    })
}

/// Full Deployment chain. `replicas` is excluded while `hpa_enabled`, which
/// cedes the field to the autoscaler.
#[must_use]
pub fn chain(hpa_enabled: bool) -> Chain<Deployment> {
    Chain::new()
        .with(containers)
        .with_if(!hpa_enabled, replicas)
        .with(image)
        .with(service_account)
        .with(env)
        .with(resources)
        .with(pod_template_annotations)
        .with(pod_template_labels)
        .with(volumes)
        .with(volume_mounts)
        .with(ports)
        .with(affinity)
        .with(tolerations)
        .with(topology_spread_constraints)
        .with(priority_class_name)
        .with(super::metadata::owner_reference::<Deployment>)
}

fn merge_map(wanted: &BTreeMap<String, String>, current: &mut BTreeMap<String, String>) -> bool {
    let mut changed = false;
    for (key, value) in wanted {
        if current.get(key) != Some(value) {
            current.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

fn resources_equal(a: &ResourceRequirements, b: &ResourceRequirements) -> bool {
    quantities_equal(a.limits.as_ref(), b.limits.as_ref())
        && quantities_equal(a.requests.as_ref(), b.requests.as_ref())
}

fn quantities_equal(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let a = a.unwrap_or(&empty);
    let b = b.unwrap_or(&empty);
    a.keys().chain(b.keys()).all(|key| match (a.get(key), b.get(key)) {
        (Some(x), Some(y)) => match (quantity_millis(&x.0), quantity_millis(&y.0)) {
            (Some(left), Some(right)) => left == right,
            _ => x == y,
        },
        _ => false,
    })
}

/// Value of a resource quantity in thousandths of its base unit.
/// `None` for spellings this parser does not know.
fn quantity_millis(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let multiplier: i128 = match suffix {
        "m" => return scaled(number, 1),
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        _ => return None,
    };
    scaled(number, multiplier.checked_mul(1_000)?)
}

/// `number * factor`, where `number` may carry a decimal fraction
fn scaled(number: &str, factor: i128) -> Option<i128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let whole: i128 = if whole.is_empty() || whole == "-" || whole == "+" {
        0
    } else {
        whole.parse().ok()?
    };
    let mut result = whole.checked_mul(factor)?;
    if !fraction.is_empty() {
        let digits = u32::try_from(fraction.len()).ok()?;
        let numerator: i128 = fraction.parse().ok()?;
        let denominator = 10_i128.checked_pow(digits)?;
        let part = numerator.checked_mul(factor)? / denominator;
        result = if number.starts_with('-') {
            result - part
        } else {
            result + part
        };
    }
    Some(result)
}
