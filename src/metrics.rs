//! Prometheus metrics for the gate.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup before constructing the
//! controller or cache. The helper functions (`inc_prediction`,
//! `set_queue_depth`, …) are no-ops if `init_metrics` was never called, so
//! the gate is always safe to run — observability simply degrades
//! gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `gate_predictions_total` | Counter | `category` |
//! | `gate_prediction_failures_total` | Counter | `category` |
//! | `gate_throttled_total` | Counter | `reason` |
//! | `gate_cache_lookups_total` | Counter | `result` |
//! | `gate_cache_evictions_total` | Counter | — |
//! | `gate_queue_depth` | Gauge | — |
//! | `gate_cpu_usage_percent` | Gauge | — |
//! | `gate_cpu_threshold_percent` | Gauge | — |
//! | `gate_prediction_duration_seconds` | Histogram | — |

use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Gauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

/// All Prometheus metrics for the gate, bundled so they can be stored in a
/// single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Registry that owns all metric descriptors.
    pub registry: Registry,
    /// Successful predictions per category.
    pub predictions_total: CounterVec,
    /// Failed predictions per category.
    pub prediction_failures: CounterVec,
    /// Rejected/expired requests by reason.
    pub throttled_total: CounterVec,
    /// Cache lookups by result (`hit` / `miss`).
    pub cache_lookups: CounterVec,
    /// Capacity-triggered LRU evictions.
    pub cache_evictions: IntCounter,
    /// Current admission queue depth.
    pub queue_depth: IntGauge,
    /// Smoothed system CPU usage, percent.
    pub cpu_usage: Gauge,
    /// Current adaptive throttling threshold, percent.
    pub cpu_threshold: Gauge,
    /// Prediction latency histogram.
    pub prediction_duration: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialise all metrics and register them with a private registry.
///
/// Must be called once at process startup before the gate components spawn
/// their background tasks. Calling it a second time is a no-op.
///
/// # Errors
///
/// Returns a [`prometheus::Error`] if metric construction or registration
/// fails (e.g., duplicate descriptor names).
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let predictions_total = CounterVec::new(
        Opts::new("gate_predictions_total", "Successful predictions"),
        &["category"],
    )?;
    registry.register(Box::new(predictions_total.clone()))?;

    let prediction_failures = CounterVec::new(
        Opts::new("gate_prediction_failures_total", "Failed predictions"),
        &["category"],
    )?;
    registry.register(Box::new(prediction_failures.clone()))?;

    let throttled_total = CounterVec::new(
        Opts::new(
            "gate_throttled_total",
            "Requests rejected or expired by the admission controller",
        ),
        &["reason"],
    )?;
    registry.register(Box::new(throttled_total.clone()))?;

    let cache_lookups = CounterVec::new(
        Opts::new("gate_cache_lookups_total", "Result cache lookups"),
        &["result"],
    )?;
    registry.register(Box::new(cache_lookups.clone()))?;

    let cache_evictions = IntCounter::new(
        "gate_cache_evictions_total",
        "Capacity-triggered LRU evictions",
    )?;
    registry.register(Box::new(cache_evictions.clone()))?;

    let queue_depth = IntGauge::new("gate_queue_depth", "Current admission queue depth")?;
    registry.register(Box::new(queue_depth.clone()))?;

    let cpu_usage = Gauge::new("gate_cpu_usage_percent", "Smoothed system CPU usage")?;
    registry.register(Box::new(cpu_usage.clone()))?;

    let cpu_threshold = Gauge::new(
        "gate_cpu_threshold_percent",
        "Current adaptive throttling threshold",
    )?;
    registry.register(Box::new(cpu_threshold.clone()))?;

    let prediction_duration = Histogram::with_opts(HistogramOpts::new(
        "gate_prediction_duration_seconds",
        "Prediction latency",
    ))?;
    registry.register(Box::new(prediction_duration.clone()))?;

    // If another thread raced us, the first one wins — both initializations
    // produce identical metric descriptors, so neither outcome is incorrect.
    let _ = METRICS.set(Metrics {
        registry,
        predictions_total,
        prediction_failures,
        throttled_total,
        cache_lookups,
        cache_evictions,
        queue_depth,
        cpu_usage,
        cpu_threshold,
        prediction_duration,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one successful prediction for a category. No-op before init.
pub fn inc_prediction(category: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.predictions_total.get_metric_with_label_values(&[category]) {
            c.inc();
        }
    }
}

/// Count one failed prediction for a category. No-op before init.
pub fn inc_prediction_failure(category: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .prediction_failures
            .get_metric_with_label_values(&[category])
        {
            c.inc();
        }
    }
}

/// Count one throttled request (`rate_limit`, `queue_full`, `queue_timeout`,
/// `shutdown`). No-op before init.
pub fn inc_throttled(reason: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.throttled_total.get_metric_with_label_values(&[reason]) {
            c.inc();
        }
    }
}

/// Count one cache lookup (`hit` or `miss`). No-op before init.
pub fn inc_cache_lookup(result: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_lookups.get_metric_with_label_values(&[result]) {
            c.inc();
        }
    }
}

/// Count one capacity-triggered cache eviction. No-op before init.
pub fn inc_cache_eviction() {
    if let Some(m) = metrics() {
        m.cache_evictions.inc();
    }
}

/// Set the admission queue depth gauge. No-op before init.
pub fn set_queue_depth(depth: i64) {
    if let Some(m) = metrics() {
        m.queue_depth.set(depth);
    }
}

/// Set the smoothed CPU usage gauge. No-op before init.
pub fn set_cpu_usage(percent: f64) {
    if let Some(m) = metrics() {
        m.cpu_usage.set(percent);
    }
}

/// Set the adaptive threshold gauge. No-op before init.
pub fn set_cpu_threshold(percent: f64) {
    if let Some(m) = metrics() {
        m.cpu_threshold.set(percent);
    }
}

/// Record one prediction latency observation. No-op before init.
pub fn observe_prediction_duration(d: Duration) {
    if let Some(m) = metrics() {
        m.prediction_duration.observe(d.as_secs_f64());
    }
}

/// Gather all registered metrics as raw metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails. Observability degrades gracefully rather than panicking.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
