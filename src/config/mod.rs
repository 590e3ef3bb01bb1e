//! # Configuration
//!
//! Controller-level settings loaded from environment variables.
//!
//! Environment variables are populated from a ConfigMap using `envFrom` in the
//! controller Deployment. Changing them requires a pod restart.

mod controller;

pub use controller::ControllerConfig;
