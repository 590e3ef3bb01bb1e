//! # Autoscaler and Disruption Budget Mutators
//!
//! Both objects are fully owned by the controller, so their whole spec is
//! compared and replaced.

use super::replace_if_differs;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;

pub fn hpa_spec(desired: &HorizontalPodAutoscaler, existing: &mut HorizontalPodAutoscaler) -> bool {
    replace_if_differs(&desired.spec, &mut existing.spec)
}

pub fn pdb_spec(desired: &PodDisruptionBudget, existing: &mut PodDisruptionBudget) -> bool {
    replace_if_differs(&desired.spec, &mut existing.spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::policy::v1::PodDisruptionBudgetSpec;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    #[test]
    fn test_pdb_spec_replaced() {
        let desired = PodDisruptionBudget {
            spec: Some(PodDisruptionBudgetSpec {
                max_unavailable: Some(IntOrString::Int(1)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut existing = PodDisruptionBudget::default();
        assert!(pdb_spec(&desired, &mut existing));
        assert!(!pdb_spec(&desired, &mut existing));
    }
}
