//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `arca_reconciliations_total{kind}` - Handled watch events and periodic items
//! - `arca_reconciliation_errors_total{kind}` - Failed reconciliations
//! - `arca_filtered_events_total{kind}` - Events dropped by discovery admission
//! - `arca_remote_operations_total{entity,operation,result}` - Tetrate API calls
//! - `arca_remote_operation_duration_seconds{entity,operation}` - Tetrate API latency
//! - `arca_remote_conflicts_total{entity}` - Optimistic concurrency conflicts
//! - `arca_periodic_pass_duration_seconds` - Duration of periodic passes
//! - `arca_service_exposures_total{status}` - Service exposure outcomes

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("arca_reconciliations_total", "Total number of reconciliations"),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "arca_reconciliation_errors_total",
            "Total number of reconciliation errors",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static FILTERED_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "arca_filtered_events_total",
            "Total number of events dropped because no configuration selects the object",
        ),
        &["kind"],
    )
    .expect("Failed to create FILTERED_EVENTS_TOTAL metric - this should never happen")
});

static REMOTE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "arca_remote_operations_total",
            "Total number of Tetrate API operations",
        ),
        &["entity", "operation", "result"],
    )
    .expect("Failed to create REMOTE_OPERATIONS_TOTAL metric - this should never happen")
});

static REMOTE_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "arca_remote_operation_duration_seconds",
            "Duration of Tetrate API operations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["entity", "operation"],
    )
    .expect("Failed to create REMOTE_OPERATION_DURATION metric - this should never happen")
});

static REMOTE_CONFLICTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "arca_remote_conflicts_total",
            "Total number of optimistic concurrency conflicts from the Tetrate API",
        ),
        &["entity"],
    )
    .expect("Failed to create REMOTE_CONFLICTS_TOTAL metric - this should never happen")
});

static PERIODIC_PASS_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "arca_periodic_pass_duration_seconds",
            "Duration of periodic reconciliation passes in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
    )
    .expect("Failed to create PERIODIC_PASS_DURATION metric - this should never happen")
});

static SERVICE_EXPOSURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "arca_service_exposures_total",
            "Total number of service exposure outcomes",
        ),
        &["status"],
    )
    .expect("Failed to create SERVICE_EXPOSURES_TOTAL metric - this should never happen")
});

/// Register every controller metric with [`REGISTRY`]
///
/// # Errors
/// Fails if a metric was already registered
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FILTERED_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REMOTE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REMOTE_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REMOTE_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PERIODIC_PASS_DURATION.clone()))?;
    REGISTRY.register(Box::new(SERVICE_EXPOSURES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_filtered_events(kind: &str) {
    FILTERED_EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record one Tetrate API call
///
/// `result` is `success`, `conflict` or `error`.
pub fn record_remote_operation(entity: &str, operation: &str, result: &str, duration: f64) {
    REMOTE_OPERATIONS_TOTAL
        .with_label_values(&[entity, operation, result])
        .inc();
    REMOTE_OPERATION_DURATION
        .with_label_values(&[entity, operation])
        .observe(duration);
}

pub fn increment_conflicts(entity: &str) {
    REMOTE_CONFLICTS_TOTAL.with_label_values(&[entity]).inc();
}

pub fn observe_pass_duration(duration: f64) {
    PERIODIC_PASS_DURATION.observe(duration);
}

/// Record a service exposure outcome (`exposed` or `error`)
pub fn record_exposure(status: &str) {
    SERVICE_EXPOSURES_TOTAL.with_label_values(&[status]).inc();
}
