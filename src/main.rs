//! Demo binary for prediction-gate.
//!
//! Builds a gate in front of the echo predictor and pushes a burst of
//! requests through it, printing metrics at the end.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter (default: info)

use prediction_gate::{
    init_tracing, metrics, AdmissionConfig, AdmissionController, CacheConfig, EchoPredictor,
    PredictionCategory, PredictionGate, Priority, ResultCache,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    info!("Starting prediction-gate demo");

    let cache = ResultCache::new(CacheConfig::default());
    let controller = AdmissionController::new(
        AdmissionConfig::default(),
        Arc::new(EchoPredictor::with_delay(25)),
    );
    let gate = PredictionGate::new(cache, controller);

    let demo_requests = vec![
        (PredictionCategory::Forecast, json!({"series": "revenue", "horizon": 30})),
        (PredictionCategory::Anomaly, json!({"series": "latency", "window": "1h"})),
        (PredictionCategory::Trend, json!({"series": "signups", "period": "weekly"})),
        (PredictionCategory::Recommendation, json!({"user": "u-1042", "limit": 5})),
        // Repeats — these should come back as cache hits.
        (PredictionCategory::Forecast, json!({"series": "revenue", "horizon": 30})),
        (PredictionCategory::Anomaly, json!({"series": "latency", "window": "1h"})),
    ];

    info!(count = demo_requests.len(), "Sending demo requests");

    for (category, payload) in demo_requests {
        match gate.request(category, payload, Priority::Medium).await {
            Ok(response) => info!(category = %category, ?response, "request served"),
            Err(e) => info!(category = %category, error = %e, "request failed"),
        }
    }

    let m = gate.metrics();
    let stats = gate.cache_stats();
    info!(
        processed = m.processed_count,
        throttled = m.throttled_count,
        avg_response_ms = m.avg_response_time_ms,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        hit_rate = stats.hit_rate,
        "demo complete"
    );

    gate.shutdown().await;
    Ok(())
}
