//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Executor (operation results, durations, pauses)
//! - Scheduler (active and pending gauges)
//! - Memory monitoring (pressure events)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Executor Metrics
// =============================================================================

/// Finished operations by kind and result.
pub static OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("clipq_operations_total", "Total finished edit operations"),
        &["kind", "result"], // result: "completed", or an error kind
    )
    .unwrap()
});

/// Wall-clock duration of successful operations.
pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "clipq_operation_duration_seconds",
            "Duration of successful edit operations",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["kind"],
    )
    .unwrap()
});

/// Runs stopped early and handed back to the queue.
pub static OPERATIONS_PAUSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "clipq_operations_paused_total",
            "Operations stopped early and re-queued",
        ),
        &["reason"], // "paused", "memory_pressure"
    )
    .unwrap()
});

// =============================================================================
// Scheduler Metrics
// =============================================================================

pub static SCHEDULER_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("clipq_scheduler_active", "Operations currently running").unwrap()
});

pub static SCHEDULER_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("clipq_scheduler_pending", "Operations waiting in the queue").unwrap()
});

// =============================================================================
// Memory Metrics
// =============================================================================

/// Times the memory ceiling was found exceeded.
pub static MEMORY_PRESSURE_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "clipq_memory_pressure_events_total",
        "Memory ceiling exceeded events",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Executor
        Box::new(OPERATIONS_TOTAL.clone()),
        Box::new(OPERATION_DURATION.clone()),
        Box::new(OPERATIONS_PAUSED.clone()),
        // Scheduler
        Box::new(SCHEDULER_ACTIVE.clone()),
        Box::new(SCHEDULER_PENDING.clone()),
        // Memory
        Box::new(MEMORY_PRESSURE_EVENTS.clone()),
    ]
}
