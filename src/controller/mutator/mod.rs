//! # Mutators
//!
//! Field-level compare-and-copy functions that decide whether a live object
//! needs a write.
//!
//! A mutator only touches the field group it owns. Lists are replaced
//! wholesale when they differ, maps are merged key by key and scalars are
//! overwritten. Applying the same mutator twice in a row must report no
//! change the second time.
//!
//! ```rust
//! use apicast_controller::controller::mutator::{Chain, Mutator};
//! use k8s_openapi::api::core::v1::Service;
//!
//! let chain = Chain::new()
//!     .with(apicast_controller::controller::mutator::service::ports)
//!     .with(apicast_controller::controller::mutator::service::selector);
//! let desired = Service::default();
//! let mut existing = Service::default();
//! assert!(!chain.mutate(&desired, &mut existing));
//! ```

pub mod autoscaling;
pub mod deployment;
pub mod ingress;
pub mod metadata;
pub mod secret;
pub mod service;

/// Compare `desired` against `existing`, copy what differs into `existing`
/// and report whether anything was copied
pub trait Mutator<K>: Send + Sync {
    fn mutate(&self, desired: &K, existing: &mut K) -> bool;
}

impl<K, F> Mutator<K> for F
where
    F: Fn(&K, &mut K) -> bool + Send + Sync,
{
    fn mutate(&self, desired: &K, existing: &mut K) -> bool {
        self(desired, existing)
    }
}

/// Ordered list of mutators run as one
///
/// Every member runs even after one reported a change, so a single
/// read/write cycle repairs every field.
pub struct Chain<K> {
    mutators: Vec<Box<dyn Mutator<K>>>,
}

impl<K> std::fmt::Debug for Chain<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.mutators.len())
            .finish()
    }
}

impl<K> Default for Chain<K> {
    fn default() -> Self {
        Self {
            mutators: Vec::new(),
        }
    }
}

impl<K> Chain<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<M>(mut self, mutator: M) -> Self
    where
        M: Mutator<K> + 'static,
    {
        self.mutators.push(Box::new(mutator));
        self
    }

    /// Append `mutator` only when `include` holds
    #[must_use]
    pub fn with_if<M>(self, include: bool, mutator: M) -> Self
    where
        M: Mutator<K> + 'static,
    {
        if include {
            self.with(mutator)
        } else {
            self
        }
    }

    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }
}

impl<K> Mutator<K> for Chain<K> {
    fn mutate(&self, desired: &K, existing: &mut K) -> bool {
        self.mutators
            .iter()
            .fold(false, |changed, m| m.mutate(desired, existing) || changed)
    }
}

/// Mutator that never asks for an update: objects are created, then left alone
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOnly;

impl<K> Mutator<K> for CreateOnly {
    fn mutate(&self, _desired: &K, _existing: &mut K) -> bool {
        false
    }
}

#[must_use]
pub fn create_only() -> CreateOnly {
    CreateOnly
}

/// Replace `existing` with `desired` when they differ
pub(crate) fn replace_if_differs<T: PartialEq + Clone>(desired: &T, existing: &mut T) -> bool {
    if desired == existing {
        return false;
    }
    existing.clone_from(desired);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Pair {
        left: u32,
        right: u32,
    }

    fn left(desired: &Pair, existing: &mut Pair) -> bool {
        replace_if_differs(&desired.left, &mut existing.left)
    }

    fn right(desired: &Pair, existing: &mut Pair) -> bool {
        replace_if_differs(&desired.right, &mut existing.right)
    }

    mod chain_tests {
        use super::*;

        #[test]
        fn test_chain_runs_every_mutator() {
            let chain = Chain::new().with(left).with(right);
            let desired = Pair { left: 1, right: 2 };
            let mut existing = Pair::default();

            assert!(chain.mutate(&desired, &mut existing));
            assert_eq!(existing, desired);
        }

        #[test]
        fn test_chain_is_idempotent() {
            let chain = Chain::new().with(left).with(right);
            let desired = Pair { left: 1, right: 2 };
            let mut existing = Pair::default();

            chain.mutate(&desired, &mut existing);
            let snapshot = existing.clone();
            assert!(!chain.mutate(&desired, &mut existing));
            assert_eq!(existing, snapshot);
        }

        #[test]
        fn test_no_short_circuit_after_change() {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let chain = Chain::new()
                .with(left)
                .with(move |_: &Pair, _: &mut Pair| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    false
                });

            chain.mutate(&Pair { left: 7, right: 0 }, &mut Pair::default());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_with_if_excludes_mutator() {
            let chain = Chain::new().with(left).with_if(false, right);
            assert_eq!(chain.len(), 1);

            let mut existing = Pair::default();
            chain.mutate(&Pair { left: 1, right: 2 }, &mut existing);
            assert_eq!(existing.right, 0);
        }

        #[test]
        fn test_create_only_never_changes() {
            let mut existing = Pair::default();
            assert!(!create_only().mutate(&Pair { left: 1, right: 1 }, &mut existing));
            assert_eq!(existing, Pair::default());
        }
    }
}
