//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use apicast_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Convergence and mutators
pub use crate::controller::convergence::{
    converge, ClusterStore, ConvergeOutcome, Desired, KubeStore, MemoryStore,
};
pub use crate::controller::error::ConvergeError;
pub use crate::controller::mutator::{Chain, Mutator};

// Reconciler types
pub use crate::controller::reconciler::{
    reconcile, reconcile_with_store, BackoffState, Reconciler, ReconcilerError, TriggerSource,
};

pub use crate::config::ControllerConfig;
