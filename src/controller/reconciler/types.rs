//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::error::ConvergeError;
use crate::controller::options::OptionsError;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The CR spec failed validation
    #[error("invalid APIcast spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Converge(#[from] ConvergeError),
}

impl ReconcilerError {
    /// Optimistic concurrency conflict, wherever it was raised
    #[must_use]
    pub fn conflict(&self) -> Option<&ConvergeError> {
        match self {
            ReconcilerError::Converge(e) | ReconcilerError::Options(OptionsError::Store(e))
                if e.is_conflict() =>
            {
                Some(e)
            }
            _ => None,
        }
    }

    /// Errors caused by the CR content rather than by the cluster
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        match self {
            ReconcilerError::InvalidSpec(_) => true,
            ReconcilerError::Options(e) => e.is_user_error(),
            ReconcilerError::Converge(_) => false,
        }
    }
}

/// Why a reconciliation was requeued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Selector migration step in flight
    Migration,
    /// Optimistic concurrency conflict
    Conflict,
    /// CR secret labels were rewritten
    SecretLabels,
    /// Controller version annotation was written
    OperatorVersion,
    /// Fibonacci backoff after a failure
    ErrorBackoff,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Migration => "migration",
            TriggerSource::Conflict => "conflict",
            TriggerSource::SecretLabels => "secret-labels",
            TriggerSource::OperatorVersion => "operator-version",
            TriggerSource::ErrorBackoff => "error-backoff",
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconcile context
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: ControllerConfig,
    // Keyed by namespace/name, owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    /// Parent of every per-pass token. Cancelled on shutdown.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            client,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Forget the failure history of `key` after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }
}
