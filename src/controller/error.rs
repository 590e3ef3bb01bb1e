//! # Errors
//!
//! Error taxonomy shared by the convergence primitive, the selector migration
//! and the reconcile driver.
//!
//! Conflicts and not-found races are kept as distinct variants so callers
//! decide the retry policy: the driver turns a conflict into a prompt requeue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The addressed object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Optimistic concurrency conflict (HTTP 409)
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Desired state cannot be built from the observed input
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Any other API server failure, surfaced unmodified
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The reconcile pass was cancelled while I/O was in flight
    #[error("operation cancelled")]
    Cancelled,
}

impl ConvergeError {
    /// Classify an API error for the object `kind`/`name`.
    ///
    /// 404 and 409 responses become [`ConvergeError::NotFound`] and
    /// [`ConvergeError::Conflict`]. Everything else is wrapped as is.
    pub fn from_kube(kind: &str, name: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: ae.message,
            },
            other => Self::Kube(other),
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
