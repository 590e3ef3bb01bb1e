//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization` - crypto provider, logging, metrics, probe server, client
//! - `watch_loop` - the kube-runtime controller and its restart loop
//! - `error_policy` - backoff for failed reconciliations and watch errors

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
