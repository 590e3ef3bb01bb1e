//! # Controller
//!
//! Core controller modules for the APIcast controller.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `convergence`: get/create/delete/mutate decision per object
//! - `error`: error taxonomy shared by the layers below the driver
//! - `migration`: blue-green Deployment selector migration
//! - `mutator`: field-level compare-and-copy functions
//! - `options`: CR spec plus referenced secrets, resolved and defaulted
//! - `reconciler`: top-level reconcile driver
//! - `resources`: desired gateway objects
//! - `secret_tracker`: restart annotations driven by secret content

pub mod backoff;
pub mod convergence;
pub mod error;
pub mod migration;
pub mod mutator;
pub mod options;
pub mod reconciler;
pub mod resources;
pub mod secret_tracker;
