//! # Status
//!
//! `Ready` and `Warning` conditions derived from the live gateway Deployment.

use crate::constants::{READY_CONDITION, WARNING_CONDITION};
use crate::controller::migration::is_available;
use crate::crd::{APIcast, APIcastStatus, Condition};
use k8s_openapi::api::apps::v1::Deployment;

pub const READY_MESSAGE: &str = "APIcast is ready";
pub const NOT_READY_REASON: &str = "DeploymentNotReady";
pub const NOT_READY_MESSAGE: &str = "Available condition not found";
// Spelling is part of the published status contract
pub const RECONCILIATION_ERROR_REASON: &str = "ReconcilliationError";
pub const HPA_WARNING_REASON: &str = "HPA";
pub const HPA_WARNING_MESSAGE: &str =
    "HorizontalPodAutoscaling (Hpa) enabled overrides values applied to replicas";

/// Status for a pass that reached the Deployment
#[must_use]
pub fn observed_status(cr: &APIcast, deployment: Option<&Deployment>) -> APIcastStatus {
    let ready = match deployment {
        Some(d) if is_available(d) => {
            Condition::new(READY_CONDITION, true, None, Some(READY_MESSAGE))
        }
        _ => Condition::new(
            READY_CONDITION,
            false,
            Some(NOT_READY_REASON),
            Some(NOT_READY_MESSAGE),
        ),
    };
    let mut conditions = vec![ready];
    if cr.spec.hpa {
        conditions.push(Condition::new(
            WARNING_CONDITION,
            true,
            Some(HPA_WARNING_REASON),
            Some(HPA_WARNING_MESSAGE),
        ));
    }

    let image = deployment
        .and_then(|d| d.spec.as_ref())
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone());

    carry_transition_times(
        APIcastStatus {
            image,
            observed_generation: cr.metadata.generation,
            conditions,
        },
        cr.status.as_ref(),
    )
}

/// Status for a pass that failed on the CR content
#[must_use]
pub fn failed_status(cr: &APIcast, message: &str) -> APIcastStatus {
    let previous = cr.status.clone().unwrap_or_default();
    let mut conditions: Vec<Condition> = previous
        .conditions
        .iter()
        .filter(|c| c.r#type != READY_CONDITION)
        .cloned()
        .collect();
    conditions.insert(
        0,
        Condition::new(
            READY_CONDITION,
            false,
            Some(RECONCILIATION_ERROR_REASON),
            Some(message),
        ),
    );
    carry_transition_times(
        APIcastStatus {
            image: previous.image,
            observed_generation: cr.metadata.generation,
            conditions,
        },
        cr.status.as_ref(),
    )
}

/// Keep a condition's transition time while its status holds, stamp now
/// when it flips or first appears
fn carry_transition_times(
    mut status: APIcastStatus,
    previous: Option<&APIcastStatus>,
) -> APIcastStatus {
    let now = chrono::Utc::now().to_rfc3339();
    for condition in &mut status.conditions {
        let kept = previous
            .and_then(|p| p.condition(&condition.r#type))
            .filter(|p| p.status == condition.status)
            .and_then(|p| p.last_transition_time.clone());
        condition.last_transition_time = Some(kept.unwrap_or_else(|| now.clone()));
    }
    status
}

/// Whether writing `desired` would change anything
#[must_use]
pub fn status_changed(cr: &APIcast, desired: &APIcastStatus) -> bool {
    cr.status.as_ref() != Some(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::APIcastSpec;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn gateway(hpa: bool) -> APIcast {
        let mut cr = APIcast::new(
            "gw",
            APIcastSpec {
                hpa,
                ..Default::default()
            },
        );
        cr.metadata.generation = Some(4);
        cr
    }

    fn deployment(available: bool) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                template: k8s_openapi::api::core::v1::PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            image: Some("apicast:1".to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                conditions: Some(vec![DeploymentCondition {
                    type_: "Available".to_string(),
                    status: if available { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_available_deployment_is_ready() {
        let status = observed_status(&gateway(false), Some(&deployment(true)));
        assert!(status.is_ready());
        assert_eq!(status.image.as_deref(), Some("apicast:1"));
        assert_eq!(status.observed_generation, Some(4));
        assert!(status.condition(WARNING_CONDITION).is_none());
    }

    #[test]
    fn test_unavailable_deployment_is_not_ready() {
        let status = observed_status(&gateway(false), Some(&deployment(false)));
        let ready = status.condition(READY_CONDITION).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason.as_deref(), Some(NOT_READY_REASON));
    }

    #[test]
    fn test_hpa_adds_warning() {
        let status = observed_status(&gateway(true), None);
        let warning = status.condition(WARNING_CONDITION).unwrap();
        assert_eq!(warning.reason.as_deref(), Some(HPA_WARNING_REASON));
    }

    #[test]
    fn test_unchanged_status_is_not_rewritten() {
        let mut cr = gateway(false);
        let first = observed_status(&cr, Some(&deployment(true)));
        cr.status = Some(first);
        let second = observed_status(&cr, Some(&deployment(true)));
        assert!(!status_changed(&cr, &second));
    }

    #[test]
    fn test_failed_status_keeps_other_conditions() {
        let mut cr = gateway(true);
        cr.status = Some(observed_status(&cr, Some(&deployment(true))));
        let status = failed_status(&cr, "spec.httpsPort: reserved");

        let ready = status.condition(READY_CONDITION).unwrap();
        assert_eq!(ready.reason.as_deref(), Some(RECONCILIATION_ERROR_REASON));
        assert!(status.condition(WARNING_CONDITION).is_some());
        assert_eq!(status.image.as_deref(), Some("apicast:1"));
    }
}
