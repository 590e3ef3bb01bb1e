//! # Custom Resource Definitions
//!
//! The `APIcast` custom resource (`apps.3scale.net/v1alpha1`).
//!
//! ## Module Structure
//!
//! - `spec.rs` - CRD specification
//! - `status.rs` - Status and condition types
//! - `validation.rs` - Spec checks the schema cannot express

mod spec;
mod status;
mod validation;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

pub use spec::{
    APIcast, APIcastSpec, CustomEnvironment, CustomPolicy, ExposedHost, OpenTelemetry,
    OpenTracing, PodDisruptionBudgetSpec, SecretRef,
};
pub use status::{APIcastStatus, Condition};
pub use validation::{describe as describe_field_errors, FieldError};

impl APIcast {
    /// Controller owner reference pointing at this CR. `None` until the CR
    /// has been persisted and carries a UID.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.controller_owner_ref(&())
    }

    pub fn open_tracing_enabled(&self) -> bool {
        self.spec
            .open_tracing
            .as_ref()
            .and_then(|t| t.enabled)
            .unwrap_or(false)
    }

    pub fn open_telemetry_enabled(&self) -> bool {
        self.spec
            .open_telemetry
            .as_ref()
            .and_then(|t| t.enabled)
            .unwrap_or(false)
    }

    /// Whether a PodDisruptionBudget should exist for the gateway
    pub fn pod_disruption_budget_enabled(&self) -> bool {
        self.spec
            .pod_disruption_budget
            .as_ref()
            .is_some_and(|pdb| pdb.enabled)
    }
}
