//! # Convergence
//!
//! The get / create / delete / mutate decision applied to one object.
//!
//! ## Contract
//!
//! | live object | deletion marker | action                               |
//! |-------------|-----------------|--------------------------------------|
//! | absent      | set             | nothing                              |
//! | absent      | unset           | create the desired object verbatim   |
//! | present     | set             | delete the live object               |
//! | present     | unset           | run the mutator chain, update if any |
//!
//! At most one write is issued per call. A delete racing with another
//! deleter counts as success. Every other error, conflicts included, is
//! returned to the caller untouched.

mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::{kind_of, ClusterStore, KubeStore, ManagedResource};

use crate::controller::error::ConvergeError;
use crate::controller::mutator::Mutator;
use crate::observability::metrics;
use tracing::{debug, info, Instrument};

/// A desired object plus its deletion marker
#[derive(Debug, Clone)]
pub struct Desired<K> {
    pub object: K,
    pub delete: bool,
}

impl<K> Desired<K> {
    /// The object should exist and match `object`
    pub fn present(object: K) -> Self {
        Self {
            object,
            delete: false,
        }
    }

    /// The object identified by `object` should not exist
    pub fn absent(object: K) -> Self {
        Self {
            object,
            delete: true,
        }
    }

    /// Deletion marker set when `present` is false
    pub fn when(present: bool, object: K) -> Self {
        Self {
            object,
            delete: !present,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeOutcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

impl ConvergeOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergeOutcome::Created => "created",
            ConvergeOutcome::Updated => "updated",
            ConvergeOutcome::Deleted => "deleted",
            ConvergeOutcome::Unchanged => "unchanged",
        }
    }

    /// Whether a write reached the cluster
    #[must_use]
    pub fn wrote(&self) -> bool {
        !matches!(self, ConvergeOutcome::Unchanged)
    }
}

/// Drive one object toward its desired state
pub async fn converge<K, S>(
    store: &S,
    desired: Desired<K>,
    mutator: &dyn Mutator<K>,
) -> Result<ConvergeOutcome, ConvergeError>
where
    K: ManagedResource,
    S: ClusterStore,
{
    let kind = kind_of::<K>();
    let meta = desired.object.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ConvergeError::Malformed(format!("desired {kind} has no name")))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| ConvergeError::Malformed(format!("desired {kind} {name} has no namespace")))?;

    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.converge",
        kind = kind.as_str(),
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        delete = desired.delete
    );

    let outcome = async {
        let Some(mut existing) = store.get::<K>(&namespace, &name).await? else {
            if desired.delete {
                return Ok(ConvergeOutcome::Unchanged);
            }
            store.create(&namespace, &desired.object).await?;
            info!("Created {} {}", kind, name);
            return Ok(ConvergeOutcome::Created);
        };

        if desired.delete {
            return match store.delete::<K>(&namespace, &name).await {
                Ok(()) => {
                    info!("Deleted {} {}", kind, name);
                    Ok(ConvergeOutcome::Deleted)
                }
                Err(e) if e.is_not_found() => {
                    debug!("{} {} already deleted", kind, name);
                    Ok(ConvergeOutcome::Unchanged)
                }
                Err(e) => Err(e),
            };
        }

        if !mutator.mutate(&desired.object, &mut existing) {
            debug!("{} {} is up to date", kind, name);
            return Ok(ConvergeOutcome::Unchanged);
        }

        store.update(&namespace, &existing).await?;
        info!("Updated {} {}", kind, name);
        Ok::<_, ConvergeError>(ConvergeOutcome::Updated)
    }
    .instrument(span)
    .await?;

    metrics::increment_converge_actions(&kind, outcome.as_str());
    Ok(outcome)
}
