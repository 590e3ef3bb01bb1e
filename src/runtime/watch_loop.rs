//! # Watch Loop
//!
//! Runs the kube-runtime controller for `APIcast` resources.
//!
//! Besides the CRs themselves, the controller watches the objects it owns
//! (Deployment, Service, Ingress, HPA, PDB) and Secrets. A Secret event is
//! mapped back to every CR labelled with that secret's UID.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{crs_for_secret, reconcile, Reconciler, ReconcilerError};
use crate::crd::APIcast;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::{Client, Resource};
use kube_runtime::{controller::Action, watcher, Controller};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller until a shutdown signal arrives, restarting the watch
/// whenever its stream ends
pub async fn run_watch_loop(
    client: Client,
    apicasts: Api<APIcast>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: ControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    let shutdown_state = Arc::clone(&server_state);
    let shutdown_reconciler = Arc::clone(&reconciler);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
        shutdown_reconciler.cancel.cancel();
        info!("Marked server as not ready, cancelling in-flight reconciliations");
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        let backoff = Arc::clone(&backoff_duration_ms);
        let stream_config = config.clone();
        let controller = Controller::new(
            apicasts.clone(),
            watcher::Config::default().any_semantic(),
        );
        let cr_store = controller.store();

        controller
            .owns(owned_api::<Deployment>(&client, &config), watcher::Config::default())
            .owns(owned_api::<Service>(&client, &config), watcher::Config::default())
            .owns(owned_api::<Ingress>(&client, &config), watcher::Config::default())
            .owns(
                owned_api::<HorizontalPodAutoscaler>(&client, &config),
                watcher::Config::default(),
            )
            .owns(
                owned_api::<PodDisruptionBudget>(&client, &config),
                watcher::Config::default(),
            )
            .watches(
                owned_api::<Secret>(&client, &config),
                watcher::Config::default(),
                move |secret| crs_for_secret(&secret, cr_store.state()),
            )
            .shutdown_on_signal()
            .run(
                reconcile_with_span,
                handle_reconciliation_error,
                Arc::clone(&reconciler),
            )
            .filter_map(move |event| {
                let backoff = Arc::clone(&backoff);
                let config = stream_config.clone();
                async move {
                    match &event {
                        Ok((object, _)) => {
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!(resource.name = %object.name, "watch.event.success");
                            Some(event)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await
                            .map(|()| event)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Api for an owned kind, scoped like the CR watch
fn owned_api<K>(client: &Client, config: &ControllerConfig) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    match config.namespace_scope() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

async fn reconcile_with_span(
    obj: Arc<APIcast>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.metadata.name.clone().unwrap_or_else(|| "unknown".to_string());
    let namespace = obj
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.version = obj.metadata.resource_version.as_deref().unwrap_or("unknown"),
        resource.generation = obj.metadata.generation.unwrap_or(0),
        event.r#type = "watch_triggered"
    );
    reconcile(obj, ctx).instrument(span).await
}
