//! Operational metrics with Prometheus
//!
//! Exposes the engine's key signals for monitoring and alerting.
//!
//! NOTE: bank_id is intentionally kept out of metric labels to prevent
//! high-cardinality explosion.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    /// Recall request duration in seconds
    pub static ref RECALL_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "engram_recall_duration_seconds",
            "End-to-end recall request duration"
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0])
    ).unwrap();

    /// Total recall requests by outcome
    pub static ref RECALL_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("engram_recall_total", "Total recall requests"),
        &["result"]
    ).unwrap();

    /// Per-strategy error counter
    pub static ref STRATEGY_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "engram_strategy_errors_total",
            "Retrieval strategy failures degraded to empty results"
        ),
        &["strategy"]
    ).unwrap();

    /// Results returned per recall request
    pub static ref RECALL_RESULTS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "engram_recall_results",
            "Number of results returned per request"
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0])
    ).unwrap();

    /// Current cross-encoder inference queue depth
    pub static ref CROSS_ENCODER_QUEUE_DEPTH: IntGauge = IntGauge::new(
        "engram_cross_encoder_queue_depth",
        "In-flight and waiting cross-encoder inferences"
    ).unwrap();

    /// Cross-encoder queue wait time in seconds
    pub static ref CROSS_ENCODER_WAIT: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "engram_cross_encoder_wait_seconds",
            "Time spent waiting for an inference slot"
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5])
    ).unwrap();
}

/// Register all metrics with the global registry.
///
/// Call once at startup. Duplicate registration errors are ignored so
/// embedded test harnesses can call this repeatedly.
pub fn register_metrics() {
    let _ = METRICS_REGISTRY.register(Box::new(RECALL_DURATION.clone()));
    let _ = METRICS_REGISTRY.register(Box::new(RECALL_TOTAL.clone()));
    let _ = METRICS_REGISTRY.register(Box::new(STRATEGY_ERRORS.clone()));
    let _ = METRICS_REGISTRY.register(Box::new(RECALL_RESULTS.clone()));
    let _ = METRICS_REGISTRY.register(Box::new(CROSS_ENCODER_QUEUE_DEPTH.clone()));
    let _ = METRICS_REGISTRY.register(Box::new(CROSS_ENCODER_WAIT.clone()));
}
