//! Structural checks on an [`APIcast`] spec that the OpenAPI schema cannot
//! express.

use super::APIcast;
use crate::constants::DEFAULT_HTTP_PORT;
use std::collections::HashSet;
use std::fmt;

/// One invalid field, addressed by its JSON path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Join field errors into one human readable line
pub fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl APIcast {
    /// Check the spec, returning every problem found
    pub fn validate(&self) -> Vec<FieldError> {
        let spec = &self.spec;
        let mut errors = Vec::new();

        if spec.https_port == Some(DEFAULT_HTTP_PORT) {
            errors.push(FieldError::new(
                "spec.httpsPort",
                "HTTPS port conflicts with HTTP port",
            ));
        }

        for (idx, policy) in spec.custom_policies.iter().enumerate() {
            match &policy.secret_ref {
                None => errors.push(FieldError::new(
                    format!("spec.customPolicies[{idx}]"),
                    "custom policy secret is mandatory",
                )),
                Some(secret_ref) if secret_ref.name.is_empty() => errors.push(FieldError::new(
                    format!("spec.customPolicies[{idx}]"),
                    "custom policy secret name is empty",
                )),
                Some(_) => {}
            }
        }

        let mut seen = HashSet::new();
        if let Some(idx) = spec
            .custom_policies
            .iter()
            .position(|p| !seen.insert((p.name.as_str(), p.version.as_str())))
        {
            errors.push(FieldError::new(
                format!("spec.customPolicies[{idx}]"),
                "custom policy name and version tuple is duplicated",
            ));
        }

        for (idx, env) in spec.custom_environments.iter().enumerate() {
            match &env.secret_ref {
                None => errors.push(FieldError::new(
                    format!("spec.customEnvironments[{idx}]"),
                    "custom environment secret is mandatory",
                )),
                Some(secret_ref) if secret_ref.name.is_empty() => errors.push(FieldError::new(
                    format!("spec.customEnvironments[{idx}]"),
                    "custom environment secret name is empty",
                )),
                Some(_) => {}
            }
        }

        if self.open_tracing_enabled() {
            let empty = spec
                .open_tracing
                .as_ref()
                .and_then(|t| t.tracing_config_secret_ref.as_ref())
                .is_some_and(|r| r.name.is_empty());
            if empty {
                errors.push(FieldError::new(
                    "spec.openTracing.tracingConfigSecretRef",
                    "custom tracing library secret name is empty",
                ));
            }
        }

        if self.open_telemetry_enabled() {
            let empty = spec
                .open_telemetry
                .as_ref()
                .and_then(|t| t.tracing_config_secret_ref.as_ref())
                .is_some_and(|r| r.name.is_empty());
            if empty {
                errors.push(FieldError::new(
                    "spec.openTelemetry.tracingConfigSecretRef",
                    "tracing config secret name is empty",
                ));
            }
        }

        errors
    }
}
