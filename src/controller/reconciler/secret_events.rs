//! # Secret Events
//!
//! Maps a Secret change to the gateways that reference it. A CR references a
//! secret when it carries the `secret.apicast.apps.3scale.net/<uid>` label
//! written by the reconciler.

use crate::controller::secret_tracker::secret_label_key;
use crate::crd::APIcast;
use k8s_openapi::api::core::v1::Secret;
use kube_runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::sync::Arc;

/// CRs in the secret's namespace that reference it
pub fn crs_for_secret<I>(secret: &Secret, crs: I) -> Vec<ObjectRef<APIcast>>
where
    I: IntoIterator<Item = Arc<APIcast>>,
{
    let (Some(uid), Some(namespace)) = (secret.metadata.uid.as_deref(), secret.namespace()) else {
        return Vec::new();
    };
    let label = secret_label_key(uid);
    crs.into_iter()
        .filter(|cr| cr.namespace().as_deref() == Some(namespace.as_str()))
        .filter(|cr| cr.labels().contains_key(&label))
        .map(|cr| ObjectRef::from_obj(cr.as_ref()))
        .collect()
}
