//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Variant dispatch (attempts, retries, terminal outcomes)
//! - Batch runs (outcomes, aborts)
//! - The external generation service

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Dispatcher Metrics
// =============================================================================

/// Generation attempts by result.
pub static GENERATION_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "nexus_generation_attempts_total",
            "Total generation attempts",
        ),
        &["result"], // "success", "transport", "timeout", "rejected", "rate_limited", "not_accepted"
    )
    .unwrap()
});

/// Retry waits scheduled after a failed attempt.
pub static RETRY_WAITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nexus_retry_waits_total",
        "Total retry cool-downs scheduled after failed attempts",
    )
    .unwrap()
});

/// Status writes that needed another try.
pub static STATUS_WRITE_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nexus_status_write_retries_total",
        "Total status store writes retried after an error",
    )
    .unwrap()
});

/// Variants reaching a terminal status.
pub static VARIANTS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "nexus_variants_finished_total",
            "Total variants reaching a terminal status",
        ),
        &["status"], // "completed", "failed"
    )
    .unwrap()
});

// =============================================================================
// Batch Metrics
// =============================================================================

/// Batch runs by outcome.
pub static BATCHES_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nexus_batches_finished_total", "Total batch runs finished"),
        &["outcome"], // "finished", "aborted", "cancelled"
    )
    .unwrap()
});

/// Batch runs currently in progress.
pub static ACTIVE_BATCHES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("nexus_active_batches", "Batch runs currently in progress").unwrap()
});

/// Batch duration in seconds.
pub static BATCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("nexus_batch_duration_seconds", "Duration of batch runs")
            .buckets(vec![10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 21600.0]),
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// Generation call duration.
pub static GENERATION_CALL_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "nexus_generation_call_duration_seconds",
            "Duration of generation service calls",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Dispatcher
        Box::new(GENERATION_ATTEMPTS.clone()),
        Box::new(RETRY_WAITS.clone()),
        Box::new(STATUS_WRITE_RETRIES.clone()),
        Box::new(VARIANTS_FINISHED.clone()),
        // Batches
        Box::new(BATCHES_FINISHED.clone()),
        Box::new(ACTIVE_BATCHES.clone()),
        Box::new(BATCH_DURATION.clone()),
        // External services
        Box::new(GENERATION_CALL_DURATION.clone()),
    ]
}
