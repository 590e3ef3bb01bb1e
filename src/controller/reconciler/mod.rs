//! # Reconciler
//!
//! Drives one `APIcast` toward its desired gateway objects.
//!
//! - `reconcile` - the per-pass driver
//! - `status` - Ready/Warning conditions
//! - `secret_events` - Secret change to CR mapping
//! - `types` - context, errors and backoff state

mod reconcile;
pub mod secret_events;
pub mod status;
mod types;

pub use reconcile::{reconcile, reconcile_with_store};
pub use secret_events::crs_for_secret;
pub use types::{BackoffState, Reconciler, ReconcilerError, TriggerSource};
