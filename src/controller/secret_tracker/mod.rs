//! # Secret Change Tracker
//!
//! Decides when a change to a referenced secret must roll the gateway pods.
//!
//! Each watched secret contributes one pod template annotation carrying its
//! `resourceVersion`. A new resource version is only adopted when the
//! secret's content hash differs from the hash recorded in the shared
//! `hashed-secret-data` Secret, so a write that leaves the content alone
//! (a label change, a replayed apply) never restarts the workload.
//!
//! A secret takes part only when it carries the
//! `apicast.apps.3scale.net/watched-by` label.

use crate::constants::{
    ADMIN_PORTAL_SECRET_ANNOTATION, CA_CERT_SECRET_ANNOTATION, CUSTOM_ENV_SECRET_ANNOTATION_PREFIX,
    CUSTOM_POLICY_SECRET_ANNOTATION_PREFIX, GATEWAY_CONFIGURATION_SECRET_ANNOTATION,
    HTTPS_CERT_SECRET_ANNOTATION, OPENTELEMETRY_SECRET_ANNOTATION, OPENTRACING_SECRET_ANNOTATION,
    SECRET_LABEL_PREFIX, SECRET_LABEL_VALUE, WATCHED_BY_LABEL,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Why the gateway references a secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretRole {
    AdminPortal,
    GatewayConfiguration,
    HttpsCertificate,
    CaCertificate,
    OpenTracing,
    OpenTelemetry,
    CustomEnvironment,
    CustomPolicy,
}

impl SecretRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretRole::AdminPortal => "admin-portal",
            SecretRole::GatewayConfiguration => "gateway-configuration",
            SecretRole::HttpsCertificate => "https-certificate",
            SecretRole::CaCertificate => "ca-certificate",
            SecretRole::OpenTracing => "opentracing",
            SecretRole::OpenTelemetry => "opentelemetry",
            SecretRole::CustomEnvironment => "custom-environment",
            SecretRole::CustomPolicy => "custom-policy",
        }
    }
}

/// A secret referenced by the gateway, as read during this reconcile pass
#[derive(Debug, Clone)]
pub struct WatchedSecret {
    pub role: SecretRole,
    pub secret: Secret,
}

impl WatchedSecret {
    #[must_use]
    pub fn new(role: SecretRole, secret: Secret) -> Self {
        Self { role, secret }
    }

    pub fn name(&self) -> &str {
        self.secret.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> &str {
        self.secret
            .metadata
            .resource_version
            .as_deref()
            .unwrap_or_default()
    }

    /// Whether the secret opted into change-triggered restarts
    pub fn is_watched(&self) -> bool {
        is_watched(&self.secret)
    }

    /// Pod template annotation key recording this secret's resource version.
    /// Per-item roles carry the secret name as suffix.
    pub fn annotation_key(&self) -> String {
        match self.role {
            SecretRole::AdminPortal => ADMIN_PORTAL_SECRET_ANNOTATION.to_string(),
            SecretRole::GatewayConfiguration => GATEWAY_CONFIGURATION_SECRET_ANNOTATION.to_string(),
            SecretRole::HttpsCertificate => HTTPS_CERT_SECRET_ANNOTATION.to_string(),
            SecretRole::CaCertificate => CA_CERT_SECRET_ANNOTATION.to_string(),
            SecretRole::OpenTracing => OPENTRACING_SECRET_ANNOTATION.to_string(),
            SecretRole::OpenTelemetry => OPENTELEMETRY_SECRET_ANNOTATION.to_string(),
            SecretRole::CustomEnvironment => {
                format!("{CUSTOM_ENV_SECRET_ANNOTATION_PREFIX}{}", self.name())
            }
            SecretRole::CustomPolicy => {
                format!("{CUSTOM_POLICY_SECRET_ANNOTATION_PREFIX}{}", self.name())
            }
        }
    }

    pub fn content_hash(&self) -> String {
        hash_secret_data(self.secret.data.as_ref().unwrap_or(&BTreeMap::new()))
    }
}

/// Whether `secret` carries the watched-by label. Only the key matters.
pub fn is_watched(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(WATCHED_BY_LABEL))
}

/// Whether a pod template annotation key is one this module writes
pub fn is_tracked_annotation(key: &str) -> bool {
    [
        ADMIN_PORTAL_SECRET_ANNOTATION,
        GATEWAY_CONFIGURATION_SECRET_ANNOTATION,
        HTTPS_CERT_SECRET_ANNOTATION,
        CA_CERT_SECRET_ANNOTATION,
        OPENTRACING_SECRET_ANNOTATION,
        OPENTELEMETRY_SECRET_ANNOTATION,
    ]
    .contains(&key)
        || key.starts_with(CUSTOM_ENV_SECRET_ANNOTATION_PREFIX)
        || key.starts_with(CUSTOM_POLICY_SECRET_ANNOTATION_PREFIX)
}

/// SHA-256 over every key followed by its value, keys in ascending order,
/// hex encoded
pub fn hash_secret_data(data: &BTreeMap<String, ByteString>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update(&value.0);
    }
    format!("{:x}", hasher.finalize())
}

/// Annotation map the Deployment pod template should carry.
///
/// Without a live Deployment or a hash record there is nothing to compare
/// against and every watched secret's current resource version is used.
/// Otherwise, per key:
///
/// - a key the live template lacks takes the current resource version
/// - a differing resource version is adopted only when the content hash
///   moved away from the recorded one
/// - anything else keeps the live value
pub fn compute_watched_annotations(
    watched: &[WatchedSecret],
    existing: Option<&Deployment>,
    hashed_secret: Option<&Secret>,
) -> BTreeMap<String, String> {
    let candidates: Vec<&WatchedSecret> = watched.iter().filter(|w| w.is_watched()).collect();
    let unchecked: BTreeMap<String, String> = candidates
        .iter()
        .map(|w| (w.annotation_key(), w.resource_version().to_string()))
        .collect();

    let (Some(deployment), Some(hashed_secret)) = (existing, hashed_secret) else {
        return unchecked;
    };

    let live = pod_template_annotations(deployment);
    let recorded = recorded_hashes(hashed_secret);

    candidates
        .iter()
        .map(|w| {
            let key = w.annotation_key();
            let current = w.resource_version();
            let value = match live.get(&key).map(String::as_str) {
                None | Some("") => current.to_string(),
                Some(previous) if previous != current => {
                    if recorded.get(w.name()) == Some(&w.content_hash()) {
                        debug!(
                            secret = w.name(),
                            role = w.role.as_str(),
                            "secret content unchanged, keeping resource version {}",
                            previous
                        );
                        previous.to_string()
                    } else {
                        debug!(
                            secret = w.name(),
                            role = w.role.as_str(),
                            "secret content changed, adopting resource version {}",
                            current
                        );
                        current.to_string()
                    }
                }
                Some(previous) => previous.to_string(),
            };
            (key, value)
        })
        .collect()
}

/// Content of the hash record: watched secret name to content hash
pub fn hashed_secret_data(watched: &[WatchedSecret]) -> BTreeMap<String, String> {
    watched
        .iter()
        .filter(|w| w.is_watched())
        .map(|w| (w.name().to_string(), w.content_hash()))
        .collect()
}

/// Hashes stored in the hash record, keyed by source secret name
pub fn recorded_hashes(hashed_secret: &Secret) -> BTreeMap<String, String> {
    let mut recorded: BTreeMap<String, String> = hashed_secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    if let Some(string_data) = &hashed_secret.string_data {
        recorded.extend(string_data.clone());
    }
    recorded
}

/// Number of annotations whose value differs from the live template.
/// A non-zero count means the next Deployment write rolls the pods.
pub fn changed_annotation_count(
    desired: &BTreeMap<String, String>,
    existing: Option<&Deployment>,
) -> usize {
    let Some(deployment) = existing else {
        return 0;
    };
    let live = pod_template_annotations(deployment);
    desired
        .iter()
        .filter(|(key, value)| live.get(*key) != Some(*value))
        .count()
}

fn pod_template_annotations(deployment: &Deployment) -> BTreeMap<String, String> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default()
}

/// Label key recording that a CR references the secret with `uid`
pub fn secret_label_key(uid: &str) -> String {
    format!("{SECRET_LABEL_PREFIX}{uid}")
}

/// Rewrite the `secret.apicast.apps.3scale.net/<uid>` labels so they name
/// exactly `uids`. Other labels are untouched. Returns whether anything
/// changed.
pub fn replace_secret_labels(
    labels: &mut BTreeMap<String, String>,
    uids: &BTreeSet<String>,
) -> bool {
    let wanted: BTreeMap<String, String> = uids
        .iter()
        .map(|uid| (secret_label_key(uid), SECRET_LABEL_VALUE.to_string()))
        .collect();
    let before = labels.len();
    labels.retain(|key, _| !key.starts_with(SECRET_LABEL_PREFIX) || wanted.contains_key(key));
    let mut changed = labels.len() != before;
    for (key, value) in wanted {
        if labels.get(&key) != Some(&value) {
            labels.insert(key, value);
            changed = true;
        }
    }
    changed
}
