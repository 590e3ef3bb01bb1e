//! APIcast Controller Library
//!
//! Converges APIcast gateway workloads (Deployment, Service, Ingress, HPA,
//! PodDisruptionBudget) from an `APIcast` custom resource.
//!
//! ## Quick Start
//!
//! ```rust
//! use apicast_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific
//! imports, use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
