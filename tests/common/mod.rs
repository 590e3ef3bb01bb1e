//! Common test utilities for the integration tests
//!
//! Fixtures seed an in-memory cluster with `APIcast` CRs and their secrets,
//! and [`settle`] drives the reconciler until it stops requeueing.

#![allow(dead_code)]

use apicast_controller::config::ControllerConfig;
use apicast_controller::constants::{ADMIN_PORTAL_URL_KEY, WATCHED_BY_LABEL, WATCHED_BY_VALUE};
use apicast_controller::controller::convergence::MemoryStore;
use apicast_controller::controller::reconciler::{reconcile_with_store, ReconcilerError};
use apicast_controller::crd::{APIcast, APIcastSpec, SecretRef};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "gateways";
pub const CR_NAME: &str = "gw";
pub const DEPLOYMENT_NAME: &str = "apicast-gw";
pub const PORTAL_SECRET: &str = "portal-endpoint";
pub const PORTAL_URL: &str = "https://token@3scale-admin.example.com";

/// Upper bound of passes [`settle`] runs before giving up
pub const MAX_PASSES: usize = 12;

pub fn config() -> ControllerConfig {
    ControllerConfig::default()
}

/// Spec referencing the admin portal secret and nothing else
pub fn portal_spec() -> APIcastSpec {
    APIcastSpec {
        admin_portal_credentials_ref: Some(SecretRef::new(PORTAL_SECRET)),
        ..Default::default()
    }
}

/// Store an `APIcast` CR. The store assigns its UID.
pub fn seed_gateway(store: &MemoryStore, spec: APIcastSpec) -> APIcast {
    let mut cr = APIcast::new(CR_NAME, spec);
    cr.metadata.namespace = Some(NAMESPACE.to_string());
    store.seed(cr).unwrap()
}

/// Latest stored copy of the CR
pub fn current_gateway(store: &MemoryStore) -> APIcast {
    store.peek::<APIcast>(NAMESPACE, CR_NAME).unwrap()
}

/// Change the stored CR's spec the way `kubectl edit` would
pub fn edit_gateway<F: FnOnce(&mut APIcastSpec)>(store: &MemoryStore, edit: F) -> APIcast {
    let mut cr = current_gateway(store);
    edit(&mut cr.spec);
    store.seed(cr).unwrap()
}

pub fn secret(name: &str, pairs: &[(&str, &str)], watched: bool) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: watched.then(|| {
                BTreeMap::from([(WATCHED_BY_LABEL.to_string(), WATCHED_BY_VALUE.to_string())])
            }),
            ..Default::default()
        },
        data: Some(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Store the admin portal secret with the watched-by label
pub fn seed_portal_secret(store: &MemoryStore) -> Secret {
    store
        .seed(secret(PORTAL_SECRET, &[(ADMIN_PORTAL_URL_KEY, PORTAL_URL)], true))
        .unwrap()
}

/// Rewrite the stored portal secret. Content is replaced only when `url`
/// is given, the resource version moves either way.
pub fn touch_portal_secret(store: &MemoryStore, url: Option<&str>) -> Secret {
    let mut secret = store.peek::<Secret>(NAMESPACE, PORTAL_SECRET).unwrap();
    if let Some(url) = url {
        secret.data = Some(BTreeMap::from([(
            ADMIN_PORTAL_URL_KEY.to_string(),
            ByteString(url.as_bytes().to_vec()),
        )]));
    }
    secret
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert("touched".to_string(), "yes".to_string());
    store.seed(secret).unwrap()
}

/// One reconcile pass against the latest stored CR
pub async fn pass(store: &MemoryStore) -> Result<Action, ReconcilerError> {
    reconcile_with_store(&current_gateway(store), store, &config()).await
}

/// Reconcile until a pass stops requeueing. Returns the number of passes.
pub async fn settle(store: &MemoryStore) -> usize {
    for n in 1..=MAX_PASSES {
        let action = pass(store).await.unwrap();
        if action == Action::await_change() {
            return n;
        }
    }
    panic!("reconciler still requeueing after {MAX_PASSES} passes");
}

pub fn deployment(store: &MemoryStore, name: &str) -> Option<Deployment> {
    store.peek::<Deployment>(NAMESPACE, name)
}

/// Mark a stored Deployment as Available, as its controller would
pub fn make_available(store: &MemoryStore, name: &str) {
    let Some(mut deployment) = deployment(store, name) else {
        return;
    };
    deployment.status = Some(DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    store.seed(deployment).unwrap();
}

pub fn pod_template_annotation(deployment: &Deployment, key: &str) -> Option<String> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.as_ref())
        .and_then(|a| a.get(key).cloned())
}
