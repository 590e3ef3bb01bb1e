//! # Reconcile
//!
//! One pass over an `APIcast`:
//!
//! 1. validate the spec
//! 2. resolve options and referenced secrets
//! 3. label the CR with the UIDs of the secrets it references
//! 4. stamp the controller version on the CR
//! 5. run the selector migration
//! 6. converge Deployment, Service, Ingress, HPA, PDB and the hash record
//! 7. publish status
//!
//! Conflicts anywhere become a prompt requeue. Everything else goes to the
//! error policy.

use super::status::{failed_status, observed_status, status_changed};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use crate::config::ControllerConfig;
use crate::constants::{HASHED_SECRET_NAME, OPERATOR_VERSION, OPERATOR_VERSION_ANNOTATION};
use crate::controller::convergence::{converge, ClusterStore, ConvergeOutcome, Desired, KubeStore};
use crate::controller::error::ConvergeError;
use crate::controller::migration::SelectorMigration;
use crate::controller::mutator::{autoscaling, deployment, ingress, metadata, secret, service, Chain};
use crate::controller::options::{GatewayOptions, OptionsProvider};
use crate::controller::resources::ResourceBuilder;
use crate::controller::secret_tracker::{
    changed_annotation_count, compute_watched_annotations, hashed_secret_data,
    replace_secret_labels,
};
use crate::crd::{describe_field_errors, APIcast};
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Controller entry point
pub async fn reconcile(
    cr: Arc<APIcast>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let store = KubeStore::new(ctx.client.clone(), ctx.cancel.child_token());
    let action = reconcile_with_store(&cr, &store, &ctx.config).await?;
    ctx.reset_backoff(&format!(
        "{}/{}",
        cr.namespace().unwrap_or_default(),
        cr.name_any()
    ));
    Ok(action)
}

/// Reconcile against any [`ClusterStore`]
pub async fn reconcile_with_store<S: ClusterStore>(
    cr: &APIcast,
    store: &S,
    config: &ControllerConfig,
) -> Result<Action, ReconcilerError> {
    let name = cr.name_any();
    let namespace = cr.namespace().unwrap_or_default();
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.generation = cr.metadata.generation.unwrap_or(0)
    );

    async {
        metrics::increment_reconciliations();
        let started = Instant::now();
        let result = run(cr, store, config).await;
        metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());

        match result {
            Err(error) => match error.conflict() {
                Some(ConvergeError::Conflict { kind, name: object, .. }) => {
                    warn!("Conflict writing {} {} for {}, requeueing", kind, object, name);
                    metrics::increment_conflicts(kind);
                    Ok(requeue(TriggerSource::Conflict, config.conflict_requeue_duration()))
                }
                _ => Err(error),
            },
            ok => ok,
        }
    }
    .instrument(span)
    .await
}

fn requeue(source: TriggerSource, after: std::time::Duration) -> Action {
    metrics::increment_requeues_total(source.as_str());
    Action::requeue(after)
}

async fn run<S: ClusterStore>(
    cr: &APIcast,
    store: &S,
    config: &ControllerConfig,
) -> Result<Action, ReconcilerError> {
    let field_errors = cr.validate();
    if !field_errors.is_empty() {
        let message = describe_field_errors(&field_errors);
        report_failure(cr, store, &message).await?;
        return Err(ReconcilerError::InvalidSpec(message));
    }

    let options = match OptionsProvider::gateway_options(cr, store).await {
        Ok(options) => options,
        Err(e) if e.is_user_error() => {
            report_failure(cr, store, &e.to_string()).await?;
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if label_secret_references(cr, store, &options).await? {
        return Ok(requeue(
            TriggerSource::SecretLabels,
            config.conflict_requeue_duration(),
        ));
    }

    if stamp_operator_version(cr, store, &options.namespace).await? {
        return Ok(requeue(
            TriggerSource::OperatorVersion,
            config.conflict_requeue_duration(),
        ));
    }

    let builder = ResourceBuilder::new(&options);
    let ns = options.namespace.as_str();
    let existing = store.get::<Deployment>(ns, &options.deployment_name).await?;
    let hashed_secret = store.get::<Secret>(ns, HASHED_SECRET_NAME).await?;
    let watched = options.watched_secrets();
    let annotations =
        compute_watched_annotations(&watched, existing.as_ref(), hashed_secret.as_ref());
    let desired_deployment = builder.deployment(&annotations);

    let migration = SelectorMigration {
        namespace: ns,
        desired: &desired_deployment,
        service_name: &options.service_name,
        owner: &options.owner,
        requeue_after: config.migration_requeue_duration(),
    };
    if let Some(after) = migration.run(store).await? {
        return Ok(requeue(TriggerSource::Migration, after));
    }

    let restarts = changed_annotation_count(&annotations, existing.as_ref());
    let outcome = converge(
        store,
        Desired::present(desired_deployment),
        &deployment::chain(options.hpa),
    )
    .await?;
    if outcome == ConvergeOutcome::Updated && restarts > 0 {
        info!(
            "Watched secret content changed, rolling Deployment {}",
            options.deployment_name
        );
        metrics::increment_restart_annotation_changes(restarts);
    }

    converge(store, Desired::present(builder.service()), &service::chain()).await?;
    converge(
        store,
        Desired::when(options.exposed_host.is_some(), builder.ingress()),
        &Chain::new()
            .with(ingress::ingress)
            .with(metadata::owner_reference::<Ingress>),
    )
    .await?;
    converge(
        store,
        Desired::when(options.hpa, builder.horizontal_pod_autoscaler()),
        &Chain::new()
            .with(autoscaling::hpa_spec)
            .with(metadata::owner_reference::<HorizontalPodAutoscaler>),
    )
    .await?;
    converge(
        store,
        Desired::when(
            options.pod_disruption_budget.is_some(),
            builder.pod_disruption_budget(),
        ),
        &Chain::new()
            .with(autoscaling::pdb_spec)
            .with(metadata::owner_reference::<PodDisruptionBudget>),
    )
    .await?;
    // After the Deployment, so the record matches what the annotations were compared against
    converge(
        store,
        Desired::present(builder.hashed_secret(hashed_secret_data(&watched))),
        &Chain::new().with(secret::string_data),
    )
    .await?;

    let live = store.get::<Deployment>(ns, &options.deployment_name).await?;
    let status = observed_status(cr, live.as_ref());
    if status_changed(cr, &status) {
        let value = serde_json::to_value(&status).map_err(ConvergeError::from)?;
        store.patch_status::<APIcast>(ns, &options.name, value).await?;
        debug!("Status of {} updated", options.name);
    }

    Ok(Action::await_change())
}

/// Rewrite the CR's secret labels. Returns true when the CR was updated.
async fn label_secret_references<S: ClusterStore>(
    cr: &APIcast,
    store: &S,
    options: &GatewayOptions,
) -> Result<bool, ReconcilerError> {
    let mut labels = cr.labels().clone();
    if !replace_secret_labels(&mut labels, &options.secret_uids()) {
        return Ok(false);
    }
    let mut updated = cr.clone();
    updated.metadata.labels = Some(labels);
    store.update(&options.namespace, &updated).await?;
    info!("Updated secret references of {}", options.name);
    Ok(true)
}

/// Record the running controller version on the CR. Returns true when the
/// CR was updated.
async fn stamp_operator_version<S: ClusterStore>(
    cr: &APIcast,
    store: &S,
    namespace: &str,
) -> Result<bool, ReconcilerError> {
    let recorded = cr.annotations().get(OPERATOR_VERSION_ANNOTATION);
    if recorded.map(String::as_str) == Some(OPERATOR_VERSION) {
        return Ok(false);
    }
    info!(
        "Recording controller version {} on {} (was {})",
        OPERATOR_VERSION,
        cr.name_any(),
        recorded.map_or("unset", String::as_str)
    );
    let mut updated = cr.clone();
    updated
        .annotations_mut()
        .insert(OPERATOR_VERSION_ANNOTATION.to_string(), OPERATOR_VERSION.to_string());
    store.update(namespace, &updated).await?;
    Ok(true)
}

async fn report_failure<S: ClusterStore>(
    cr: &APIcast,
    store: &S,
    message: &str,
) -> Result<(), ReconcilerError> {
    warn!("APIcast {} is invalid: {}", cr.name_any(), message);
    let status = failed_status(cr, message);
    if !status_changed(cr, &status) {
        return Ok(());
    }
    let Some(namespace) = cr.namespace() else {
        return Ok(());
    };
    let value = serde_json::to_value(&status).map_err(ConvergeError::from)?;
    store
        .patch_status::<APIcast>(&namespace, &cr.name_any(), value)
        .await?;
    Ok(())
}
