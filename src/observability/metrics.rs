//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `apicast_controller_reconciliations_total` - Total number of reconciliations
//! - `apicast_controller_reconciliation_errors_total` - Total number of reconciliation errors
//! - `apicast_controller_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `apicast_controller_converge_actions_total` - Converge outcomes by object kind
//! - `apicast_controller_conflicts_total` - Optimistic concurrency conflicts by object kind
//! - `apicast_controller_migration_steps_total` - Selector migration steps taken
//! - `apicast_controller_restart_annotation_changes_total` - Pod template annotations that changed because a watched secret changed
//! - `apicast_controller_requeues_total` - Requeues by reason

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "apicast_controller_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "apicast_controller_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "apicast_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CONVERGE_ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "apicast_controller_converge_actions_total",
            "Total number of converge outcomes by object kind",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create CONVERGE_ACTIONS_TOTAL metric - this should never happen")
});

static CONFLICTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "apicast_controller_conflicts_total",
            "Total number of optimistic concurrency conflicts by object kind",
        ),
        &["kind"],
    )
    .expect("Failed to create CONFLICTS_TOTAL metric - this should never happen")
});

static MIGRATION_STEPS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "apicast_controller_migration_steps_total",
            "Total number of selector migration steps taken",
        ),
        &["step"],
    )
    .expect("Failed to create MIGRATION_STEPS_TOTAL metric - this should never happen")
});

static RESTART_ANNOTATION_CHANGES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "apicast_controller_restart_annotation_changes_total",
        "Total number of pod template annotations changed by a watched secret",
    )
    .expect("Failed to create RESTART_ANNOTATION_CHANGES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "apicast_controller_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CONVERGE_ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MIGRATION_STEPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESTART_ANNOTATION_CHANGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_converge_actions(kind: &str, outcome: &str) {
    CONVERGE_ACTIONS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn increment_conflicts(kind: &str) {
    CONFLICTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_migration_steps(step: &str) {
    MIGRATION_STEPS_TOTAL.with_label_values(&[step]).inc();
}

pub fn increment_restart_annotation_changes(count: usize) {
    RESTART_ANNOTATION_CHANGES_TOTAL.inc_by(count as u64);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        assert_eq!(RECONCILIATIONS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        assert_eq!(RECONCILIATION_ERRORS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        let before = RECONCILIATION_DURATION.get_sample_count();
        observe_reconciliation_duration(0.2);
        assert_eq!(RECONCILIATION_DURATION.get_sample_count(), before + 1);
    }

    #[test]
    fn test_converge_actions_are_labelled() {
        let counter = CONVERGE_ACTIONS_TOTAL.with_label_values(&["Service", "updated"]);
        let before = counter.get();
        increment_converge_actions("Service", "updated");
        assert_eq!(counter.get(), before + 1u64);
    }

    #[test]
    fn test_restart_annotation_changes_add_count() {
        let before = RESTART_ANNOTATION_CHANGES_TOTAL.get();
        increment_restart_annotation_changes(3);
        assert_eq!(RESTART_ANNOTATION_CHANGES_TOTAL.get(), before + 3u64);
    }

    #[test]
    fn test_increment_requeues_total() {
        let counter = REQUEUES_TOTAL.with_label_values(&["migration"]);
        let before = counter.get();
        increment_requeues_total("migration");
        assert_eq!(counter.get(), before + 1u64);
    }
}
