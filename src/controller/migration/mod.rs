//! # Selector Migration
//!
//! Replaces a gateway Deployment whose immutable selector still carries the
//! legacy versioned label, without dropping traffic.
//!
//! The state is re-derived from the cluster on every pass. Nothing is
//! recorded between passes, so a controller restart at any point simply
//! resumes from whatever objects exist:
//!
//! ```text
//! legacy, no temp ──create temp──▶ legacy + temp ──temp Available──▶ delete legacy
//!                                                                        │
//!  settled ◀──delete temp── current + temp Available ◀──create current───┘
//! ```
//!
//! While the legacy Deployment exists the Service selector is relaxed to the
//! single `deployment` key, which every generation of pods carries. The
//! Service therefore always selects at least one running workload.

use crate::constants::{
    DEPLOYMENT_SELECTOR_LABEL, LEGACY_SELECTOR_LABEL, TEMP_DEPLOYMENT_LABEL, TEMP_DEPLOYMENT_NAME,
};
use crate::controller::convergence::ClusterStore;
use crate::controller::error::ConvergeError;
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Migration state derived from the live Deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// No gateway Deployment and no temporary one
    Idle,
    /// The legacy Deployment was deleted but its replacement was never created
    Interrupted,
    /// The selector is current and no temporary Deployment exists
    Settled,
    /// Legacy selector, migration not started
    LegacyWithoutTemp,
    /// Legacy selector, temporary Deployment still rolling out
    LegacyTempPending,
    /// Legacy selector, temporary Deployment serving
    LegacyTempAvailable,
    /// Current selector, replacement still rolling out next to the temporary Deployment
    CurrentTempPending,
    /// Current selector serving, temporary Deployment left to remove
    CurrentTempAvailable,
}

/// What one pass does for a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    Noop,
    CreateDeployment,
    CreateTemp,
    WaitForTemp,
    DeleteLegacy,
    WaitForDeployment,
    DeleteTemp,
}

impl MigrationStep {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStep::Noop => "noop",
            MigrationStep::CreateDeployment => "create-deployment",
            MigrationStep::CreateTemp => "create-temp",
            MigrationStep::WaitForTemp => "wait-for-temp",
            MigrationStep::DeleteLegacy => "delete-legacy",
            MigrationStep::WaitForDeployment => "wait-for-deployment",
            MigrationStep::DeleteTemp => "delete-temp",
        }
    }

    /// Every step except the no-op asks for another pass
    #[must_use]
    pub fn requeues(&self) -> bool {
        !matches!(self, MigrationStep::Noop)
    }
}

/// Derive the state from the live gateway and temporary Deployments
#[must_use]
pub fn observe(deployment: Option<&Deployment>, temp: Option<&Deployment>) -> MigrationState {
    let Some(deployment) = deployment else {
        return if temp.is_some() {
            MigrationState::Interrupted
        } else {
            MigrationState::Idle
        };
    };

    // A Deployment without a label selector cannot be migrated; leave it alone
    let Some(selector) = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.as_ref())
    else {
        return MigrationState::Settled;
    };

    match (selector.contains_key(LEGACY_SELECTOR_LABEL), temp) {
        (false, None) => MigrationState::Settled,
        (false, Some(_)) if is_available(deployment) => MigrationState::CurrentTempAvailable,
        (false, Some(_)) => MigrationState::CurrentTempPending,
        (true, None) => MigrationState::LegacyWithoutTemp,
        (true, Some(temp)) if is_available(temp) => MigrationState::LegacyTempAvailable,
        (true, Some(_)) => MigrationState::LegacyTempPending,
    }
}

/// Transition table
#[must_use]
pub fn plan(state: MigrationState) -> MigrationStep {
    match state {
        MigrationState::Idle | MigrationState::Settled => MigrationStep::Noop,
        MigrationState::Interrupted => MigrationStep::CreateDeployment,
        MigrationState::LegacyWithoutTemp => MigrationStep::CreateTemp,
        MigrationState::LegacyTempPending => MigrationStep::WaitForTemp,
        MigrationState::LegacyTempAvailable => MigrationStep::DeleteLegacy,
        MigrationState::CurrentTempPending => MigrationStep::WaitForDeployment,
        MigrationState::CurrentTempAvailable => MigrationStep::DeleteTemp,
    }
}

/// Whether the Deployment reports `Available=True`
#[must_use]
pub fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

/// Clone of the legacy Deployment under the reserved name, with the
/// temporary label added to its selector and pod labels
#[must_use]
pub fn new_temp_deployment(legacy: &Deployment, owner: &OwnerReference) -> Deployment {
    let mut temp = legacy.clone();
    temp.metadata.name = Some(TEMP_DEPLOYMENT_NAME.to_string());
    temp.metadata.resource_version = None;
    temp.metadata.uid = None;
    temp.metadata.creation_timestamp = None;
    temp.metadata.generation = None;
    temp.metadata.managed_fields = None;
    temp.metadata.owner_references = Some(vec![owner.clone()]);
    temp.status = None;

    if let Some(spec) = temp.spec.as_mut() {
        spec.selector
            .match_labels
            .get_or_insert_with(BTreeMap::new)
            .insert(TEMP_DEPLOYMENT_LABEL.to_string(), "true".to_string());
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(TEMP_DEPLOYMENT_LABEL.to_string(), "true".to_string());
    }
    temp
}

/// Narrow a selector to the `deployment` key. Returns false when there is
/// nothing to narrow.
pub fn relax_service_selector(service: &mut Service) -> bool {
    let Some(selector) = service.spec.as_mut().and_then(|s| s.selector.as_mut()) else {
        return false;
    };
    let Some(deployment) = selector.get(DEPLOYMENT_SELECTOR_LABEL).cloned() else {
        return false;
    };
    if selector.len() <= 1 {
        return false;
    }
    *selector = BTreeMap::from([(DEPLOYMENT_SELECTOR_LABEL.to_string(), deployment)]);
    true
}

/// Inputs of one migration pass
#[derive(Debug, Clone, Copy)]
pub struct SelectorMigration<'a> {
    pub namespace: &'a str,
    /// Desired gateway Deployment, created verbatim after an interrupted pass
    pub desired: &'a Deployment,
    pub service_name: &'a str,
    pub owner: &'a OwnerReference,
    pub requeue_after: Duration,
}

impl SelectorMigration<'_> {
    /// Run one pass. `Some(delay)` means the caller must stop and requeue.
    pub async fn run<S: ClusterStore>(&self, store: &S) -> Result<Option<Duration>, ConvergeError> {
        let name = self.desired.metadata.name.clone().ok_or_else(|| {
            ConvergeError::Malformed("desired Deployment has no name".to_string())
        })?;
        let span = tracing::span!(
            tracing::Level::INFO,
            "controller.migration",
            resource.name = name.as_str(),
            resource.namespace = self.namespace
        );

        async {
            let deployment = store.get::<Deployment>(self.namespace, &name).await?;
            let temp = store
                .get::<Deployment>(self.namespace, TEMP_DEPLOYMENT_NAME)
                .await?;
            let state = observe(deployment.as_ref(), temp.as_ref());
            let step = plan(state);
            debug!(?state, step = step.as_str(), "Selector migration state");

            if matches!(
                state,
                MigrationState::LegacyWithoutTemp
                    | MigrationState::LegacyTempPending
                    | MigrationState::LegacyTempAvailable
            ) {
                self.relax_service(store).await?;
            }

            match step {
                MigrationStep::Noop => return Ok(None),
                MigrationStep::CreateDeployment => {
                    store.create(self.namespace, self.desired).await?;
                    info!("Recreated Deployment {} with the current selector", name);
                }
                MigrationStep::CreateTemp => {
                    if let Some(legacy) = &deployment {
                        store
                            .create(self.namespace, &new_temp_deployment(legacy, self.owner))
                            .await?;
                        info!("Created temporary Deployment {}", TEMP_DEPLOYMENT_NAME);
                    }
                }
                MigrationStep::WaitForTemp => {
                    info!("Waiting for Deployment {} to become available", TEMP_DEPLOYMENT_NAME);
                }
                MigrationStep::DeleteLegacy => {
                    delete_ignoring_absent(store, self.namespace, &name).await?;
                    info!("Deleted Deployment {} with the legacy selector", name);
                }
                MigrationStep::WaitForDeployment => {
                    info!("Waiting for Deployment {} to become available", name);
                }
                MigrationStep::DeleteTemp => {
                    delete_ignoring_absent(store, self.namespace, TEMP_DEPLOYMENT_NAME).await?;
                    info!("Deleted temporary Deployment {}", TEMP_DEPLOYMENT_NAME);
                }
            }

            metrics::increment_migration_steps(step.as_str());
            Ok::<_, ConvergeError>(Some(self.requeue_after))
        }
        .instrument(span)
        .await
    }

    async fn relax_service<S: ClusterStore>(&self, store: &S) -> Result<(), ConvergeError> {
        let Some(mut service) = store
            .get::<Service>(self.namespace, self.service_name)
            .await?
        else {
            return Ok(());
        };
        let has_key = service
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .is_some_and(|s| s.contains_key(DEPLOYMENT_SELECTOR_LABEL));
        if !has_key {
            warn!(
                "Service {} has no '{}' selector key, leaving it unchanged",
                self.service_name, DEPLOYMENT_SELECTOR_LABEL
            );
            return Ok(());
        }
        if relax_service_selector(&mut service) {
            store.update(self.namespace, &service).await?;
            info!("Relaxed selector of Service {}", self.service_name);
        }
        Ok(())
    }
}

async fn delete_ignoring_absent<S: ClusterStore>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<(), ConvergeError> {
    match store.delete::<Deployment>(namespace, name).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    fn deployment(selector: &[(&str, &str)], available: bool) -> Deployment {
        let labels: BTreeMap<String, String> = selector
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Deployment {
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(labels),
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

    fn legacy(available: bool) -> Deployment {
        deployment(&[("deployment", "apicast-gw"), ("rht.comp_ver", "2.11")], available)
    }

    fn current(available: bool) -> Deployment {
        deployment(&[("deployment", "apicast-gw")], available)
    }

    mod observe_tests {
        use super::*;

        #[test]
        fn test_absent_states() {
            assert_eq!(observe(None, None), MigrationState::Idle);
            assert_eq!(observe(None, Some(&current(true))), MigrationState::Interrupted);
        }

        #[test]
        fn test_legacy_states() {
            assert_eq!(observe(Some(&legacy(true)), None), MigrationState::LegacyWithoutTemp);
            assert_eq!(
                observe(Some(&legacy(true)), Some(&legacy(false))),
                MigrationState::LegacyTempPending
            );
            assert_eq!(
                observe(Some(&legacy(true)), Some(&legacy(true))),
                MigrationState::LegacyTempAvailable
            );
        }

        #[test]
        fn test_current_states() {
            assert_eq!(observe(Some(&current(false)), None), MigrationState::Settled);
            assert_eq!(
                observe(Some(&current(false)), Some(&legacy(true))),
                MigrationState::CurrentTempPending
            );
            assert_eq!(
                observe(Some(&current(true)), Some(&legacy(true))),
                MigrationState::CurrentTempAvailable
            );
        }

        #[test]
        fn test_missing_selector_is_settled() {
            assert_eq!(observe(Some(&Deployment::default()), None), MigrationState::Settled);
        }

        #[test]
        fn test_only_settled_states_are_noops() {
            assert!(!plan(MigrationState::Idle).requeues());
            assert!(!plan(MigrationState::Settled).requeues());
            assert_eq!(plan(MigrationState::Interrupted), MigrationStep::CreateDeployment);
            assert_eq!(plan(MigrationState::LegacyTempAvailable), MigrationStep::DeleteLegacy);
            assert_eq!(plan(MigrationState::CurrentTempAvailable), MigrationStep::DeleteTemp);
        }
    }

    mod temp_tests {
        use super::*;

        #[test]
        fn test_temp_gets_reserved_name_and_label() {
            let mut source = legacy(true);
            source.metadata.name = Some("apicast-gw".to_string());
            source.metadata.resource_version = Some("12".to_string());
            let owner = OwnerReference {
                uid: "cr-uid".to_string(),
                ..Default::default()
            };

            let temp = new_temp_deployment(&source, &owner);
            let spec = temp.spec.unwrap();

            assert_eq!(temp.metadata.name.as_deref(), Some(TEMP_DEPLOYMENT_NAME));
            assert!(temp.metadata.resource_version.is_none());
            assert!(temp.status.is_none());
            assert_eq!(temp.metadata.owner_references.unwrap()[0].uid, "cr-uid");
            assert_eq!(spec.selector.match_labels.unwrap()[TEMP_DEPLOYMENT_LABEL], "true");
            assert_eq!(
                spec.template.metadata.unwrap().labels.unwrap()[TEMP_DEPLOYMENT_LABEL],
                "true"
            );
        }

        #[test]
        fn test_relax_keeps_deployment_key_only() {
            let mut service = Service {
                spec: Some(ServiceSpec {
                    selector: Some(BTreeMap::from([
                        ("deployment".to_string(), "apicast-gw".to_string()),
                        ("rht.comp_ver".to_string(), "2.11".to_string()),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            };

            assert!(relax_service_selector(&mut service));
            assert!(!relax_service_selector(&mut service));
            let selector = service.spec.unwrap().selector.unwrap();
            assert_eq!(selector.len(), 1);
            assert_eq!(selector["deployment"], "apicast-gw");
        }

        #[test]
        fn test_relax_without_deployment_key_is_skipped() {
            let mut service = Service {
                spec: Some(ServiceSpec {
                    selector: Some(BTreeMap::from([
                        ("app".to_string(), "x".to_string()),
                        ("tier".to_string(), "y".to_string()),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            };
            assert!(!relax_service_selector(&mut service));
        }
    }
}
