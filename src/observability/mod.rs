//! # Observability
//!
//! Prometheus metrics for the controller. Structured logging is configured
//! once at startup in [`crate::runtime::initialization`].

pub mod metrics;

pub use metrics::*;
