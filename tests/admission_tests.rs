//! Admission controller — integration tests with scripted CPU load.

use async_trait::async_trait;
use prediction_gate::admission::{AdmissionConfig, AdmissionController, CpuProbe};
use prediction_gate::{
    ComputationRequest, EchoPredictor, GateError, PredictionCategory, Predictor, Priority,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Helpers ──────────────────────────────────────────────────────────

/// Probe replaying a fixed script, then holding the last value.
struct ScriptedProbe {
    script: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedProbe {
    fn sequence(values: &[f64]) -> Self {
        Self {
            script: Mutex::new(values.iter().copied().collect()),
            last: Mutex::new(values.last().copied().unwrap_or(0.0)),
        }
    }

    fn constant(value: f64) -> Self {
        Self::sequence(&[value])
    }
}

impl CpuProbe for ScriptedProbe {
    fn sample(&self) -> f64 {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(v) => {
                *self.last.lock().unwrap() = v;
                v
            }
            None => *self.last.lock().unwrap(),
        }
    }
}

/// Predictor recording invocation order by the payload's `n` field.
struct RecordingPredictor {
    order: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl Predictor for RecordingPredictor {
    async fn predict(
        &self,
        _category: PredictionCategory,
        payload: &Value,
    ) -> Result<Value, GateError> {
        self.order
            .lock()
            .unwrap()
            .push(payload["n"].as_i64().unwrap_or(-1));
        Ok(json!({"ok": true}))
    }
}

fn fast_config() -> AdmissionConfig {
    AdmissionConfig {
        max_cpu_threshold: 80.0,
        sample_interval_ms: 10,
        queue_max_size: 8,
        adaptive_mode: false,
        drain_batch_size: 4,
        drain_tick_ms: 10,
        ..AdmissionConfig::default()
    }
}

fn request(n: i64) -> ComputationRequest {
    ComputationRequest::new(PredictionCategory::Forecast, json!({"n": n}), Priority::Medium)
}

async fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

// ── Throttling episode: queue at high load, drain on release ─────────

#[tokio::test]
async fn test_steady_85_percent_queues_then_60_percent_drains_in_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let predictor = Arc::new(RecordingPredictor {
        order: Arc::clone(&order),
    });
    // CPU steady at 85% against an 80% threshold, then dropping to 60%.
    let probe = Arc::new(ScriptedProbe::sequence(&[
        85.0, 85.0, 85.0, 85.0, 85.0, 85.0, 85.0, 85.0, 85.0, 85.0, 5.0, 5.0, 5.0,
    ]));
    let controller = AdmissionController::with_probe(fast_config(), predictor, probe);

    assert!(
        wait_until(1_000, || controller.get_metrics().throttling_active).await,
        "85% cpu must activate throttling against an 80% threshold"
    );

    let mut handles = Vec::new();
    for n in [1, 2, 3] {
        let c = controller.clone();
        handles.push(tokio::spawn(async move { c.submit(request(n)).await }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(controller.get_metrics().queue_length > 0, "requests must queue");

    for handle in handles {
        let result = handle.await.unwrap_or(Err(GateError::ShuttingDown));
        assert!(result.is_ok(), "queued request must drain: {result:?}");
    }

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3], "drain must be FIFO");
    let metrics = controller.get_metrics();
    assert_eq!(metrics.processed_count, 3);
    assert_eq!(metrics.queue_length, 0);
    assert!(!metrics.throttling_active);

    controller.shutdown().await;
}

// ── Queue bound ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_submitting_one_past_capacity_yields_queue_full() {
    let mut config = fast_config();
    config.queue_max_size = 3;
    let controller = AdmissionController::with_probe(
        config,
        Arc::new(EchoPredictor::with_delay(0)),
        Arc::new(ScriptedProbe::constant(95.0)),
    );

    assert!(wait_until(1_000, || controller.get_metrics().throttling_active).await);

    for n in 1..=3 {
        let c = controller.clone();
        tokio::spawn(async move { c.submit(request(n).with_timeout_ms(10_000)).await });
    }
    assert!(wait_until(1_000, || controller.get_metrics().queue_length == 3).await);

    assert_eq!(
        controller.submit(request(4)).await,
        Err(GateError::QueueFull)
    );

    controller.shutdown().await;
}

// ── Timeout independence ─────────────────────────────────────────────

#[tokio::test]
async fn test_short_timeout_expiry_leaves_other_request_pending() {
    let controller = AdmissionController::with_probe(
        fast_config(),
        Arc::new(EchoPredictor::with_delay(0)),
        Arc::new(ScriptedProbe::constant(95.0)),
    );

    assert!(wait_until(1_000, || controller.get_metrics().throttling_active).await);

    let c = controller.clone();
    let short = tokio::spawn(async move { c.submit(request(1).with_timeout_ms(40)).await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    let c = controller.clone();
    let long = tokio::spawn(async move { c.submit(request(2).with_timeout_ms(30_000)).await });

    assert_eq!(
        short.await.unwrap_or(Ok(Value::Null)),
        Err(GateError::QueueTimeout)
    );
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(
        controller.get_metrics().queue_length,
        1,
        "long-timeout request must remain queued"
    );
    assert!(!long.is_finished());

    controller.shutdown().await;
    assert_eq!(
        long.await.unwrap_or(Ok(Value::Null)),
        Err(GateError::ShuttingDown)
    );
}

// ── Rejection accounting ─────────────────────────────────────────────

#[tokio::test]
async fn test_throttled_count_accumulates_across_rejection_kinds() {
    let mut config = fast_config();
    config.queue_max_size = 1;
    config
        .per_category_rate_limits
        .insert(PredictionCategory::Anomaly, 0);
    let controller = AdmissionController::with_probe(
        config,
        Arc::new(EchoPredictor::with_delay(0)),
        Arc::new(ScriptedProbe::constant(95.0)),
    );

    // Rate-limit rejection (limit 0 blocks the category outright).
    let limited = ComputationRequest::new(
        PredictionCategory::Anomaly,
        json!({"n": 0}),
        Priority::Medium,
    );
    assert!(matches!(
        controller.submit(limited).await,
        Err(GateError::RateLimitExceeded { .. })
    ));

    assert!(wait_until(1_000, || controller.get_metrics().throttling_active).await);

    // Queue-timeout rejection.
    assert_eq!(
        controller.submit(request(1).with_timeout_ms(40)).await,
        Err(GateError::QueueTimeout)
    );

    // Queue-full rejection.
    let c = controller.clone();
    tokio::spawn(async move { c.submit(request(2).with_timeout_ms(10_000)).await });
    assert!(wait_until(1_000, || controller.get_metrics().queue_length == 1).await);
    assert_eq!(
        controller.submit(request(3)).await,
        Err(GateError::QueueFull)
    );

    assert_eq!(controller.get_metrics().throttled_count, 3);
    controller.shutdown().await;
}
