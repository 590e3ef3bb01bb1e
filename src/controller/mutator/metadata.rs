//! # Metadata Mutators

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

/// Make sure the live object carries the desired controller owner reference.
///
/// Other owner references, for example from garbage-collection tooling, are
/// left alone.
pub fn owner_reference<K: Resource>(desired: &K, existing: &mut K) -> bool {
    let Some(wanted) = controller_reference(desired) else {
        return false;
    };
    let present = existing
        .meta()
        .owner_references
        .iter()
        .flatten()
        .any(|r| r.uid == wanted.uid);
    if present {
        return false;
    }
    let references = existing.meta_mut().owner_references.get_or_insert_with(Vec::new);
    references.retain(|r| r.controller != Some(true));
    references.push(wanted);
    true
}

fn controller_reference<K: Resource>(obj: &K) -> Option<OwnerReference> {
    obj.meta()
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
        .cloned()
}
