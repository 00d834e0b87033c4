//! Adaptive admission control.
//!
//! Gates concurrent access to an expensive compute resource using a
//! continuously recomputed CPU-load signal, with a bounded FIFO wait queue
//! and adaptive threshold sensitivity.
//!
//! ## States
//! - **Open**: smoothed CPU below threshold and queue empty — requests
//!   execute immediately.
//! - **Throttling**: smoothed CPU at/above threshold — requests wait in a
//!   bounded queue with per-request timeouts.
//! - **Draining**: throttling lifted with requests still queued — a drain
//!   task dispatches them in submission order, a bounded batch per tick.
//!
//! ## Usage
//!
//! ```no_run
//! use prediction_gate::{
//!     AdmissionConfig, AdmissionController, ComputationRequest, EchoPredictor,
//!     PredictionCategory, Priority,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//! # #[tokio::main]
//! # async fn main() {
//! let controller = AdmissionController::new(
//!     AdmissionConfig::default(),
//!     Arc::new(EchoPredictor::new()),
//! );
//!
//! let request = ComputationRequest::new(
//!     PredictionCategory::Forecast,
//!     json!({"series": "load"}),
//!     Priority::Medium,
//! );
//! match controller.submit(request).await {
//!     Ok(result) => println!("{result}"),
//!     Err(e) => eprintln!("rejected: {e}"),
//! }
//! controller.shutdown().await;
//! # }
//! ```

pub mod cpu;
pub mod rate_limit;

pub use cpu::{CpuProbe, CpuWindow, SysinfoProbe, CPU_WINDOW_SIZE};
pub use rate_limit::{FixedWindowPolicy, RatePolicy, RateUsage};

use crate::predictor::Predictor;
use crate::{metrics, ComputationRequest, GateError, PredictionCategory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue-pressure ratio above which a rising CPU trend lowers the threshold.
const HIGH_PRESSURE: f64 = 0.5;
/// Queue-pressure ratio below which a falling CPU trend raises the threshold.
const LOW_PRESSURE: f64 = 0.25;

/// Admission controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// CPU percent at/above which throttling activates. Starting point for
    /// adaptive tuning.
    pub max_cpu_threshold: f64,
    /// Floor the adaptive tuner will not lower the threshold below.
    pub min_cpu_threshold: f64,
    /// Ceiling the adaptive tuner will not raise the threshold above.
    pub max_threshold_ceiling: f64,
    /// CPU sampling cadence, in milliseconds.
    pub sample_interval_ms: u64,
    /// Per-category requests-per-minute allowances. Empty = permissive.
    pub per_category_rate_limits: HashMap<PredictionCategory, u32>,
    /// Maximum queued requests before `QueueFull` rejections.
    pub queue_max_size: usize,
    /// Whether the adaptive threshold tuner runs.
    pub adaptive_mode: bool,
    /// Adaptive tuning cadence, in milliseconds.
    pub adaptive_interval_ms: u64,
    /// Threshold decrease applied per adjustment (the larger step).
    pub step_down: f64,
    /// Threshold increase applied per adjustment (the smaller step).
    pub step_up: f64,
    /// Queued requests dispatched per drain tick.
    pub drain_batch_size: usize,
    /// Pause between drain batches, in milliseconds.
    pub drain_tick_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_cpu_threshold: 80.0,
            min_cpu_threshold: 60.0,
            max_threshold_ceiling: 90.0,
            sample_interval_ms: 1_000,
            per_category_rate_limits: HashMap::new(),
            queue_max_size: 100,
            adaptive_mode: true,
            adaptive_interval_ms: 30_000,
            step_down: 5.0,
            step_up: 2.0,
            drain_batch_size: 4,
            drain_tick_ms: 100,
        }
    }
}

/// Controller metrics snapshot.
///
/// Counters accumulate from construction and are never reset.
#[derive(Debug, Clone, Default)]
pub struct AdmissionMetrics {
    /// Smoothed (ring-buffer mean) CPU usage, percent.
    pub cpu_usage: f64,
    /// Whether throttling is currently active.
    pub throttling_active: bool,
    /// Requests currently waiting in the queue.
    pub queue_length: usize,
    /// Successfully completed computations.
    pub processed_count: u64,
    /// Rejected or expired requests (rate limit, queue full, timeout,
    /// shutdown purge).
    pub throttled_count: u64,
    /// Running average response time of successful computations, ms.
    pub avg_response_time_ms: f64,
    /// Number of adaptive threshold adjustments applied.
    pub threshold_adjustments: u64,
    /// Current (possibly adapted) throttling threshold, percent.
    pub current_max_threshold: f64,
}

/// A queued request and its pending completion handle.
struct QueuedRequest {
    request: ComputationRequest,
    tx: oneshot::Sender<Result<Value, GateError>>,
}

/// Mutable controller bookkeeping behind one short-section mutex.
struct ControllerState {
    cpu_usage: f64,
    threshold: f64,
    processed: u64,
    throttled: u64,
    avg_response_ms: f64,
    adjustments: u64,
}

struct Inner {
    config: AdmissionConfig,
    predictor: Arc<dyn Predictor>,
    policy: Arc<dyn RatePolicy>,
    probe: Arc<dyn CpuProbe>,
    window: CpuWindow,
    state: Mutex<ControllerState>,
    throttling: AtomicBool,
    draining: AtomicBool,
    shutting_down: AtomicBool,
    queue: AsyncMutex<VecDeque<QueuedRequest>>,
    queue_len: AtomicUsize,
}

/// CPU-pressure-based admission controller with a bounded FIFO wait queue.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

enum Admitted {
    Now(ComputationRequest),
    Full,
    Queued {
        rx: oneshot::Receiver<Result<Value, GateError>>,
        id: String,
        timeout_ms: u64,
    },
}

impl AdmissionController {
    /// Create a controller with the production `sysinfo` CPU probe and the
    /// fixed-window rate policy built from `config.per_category_rate_limits`.
    ///
    /// Must be called from within a tokio runtime: construction spawns the
    /// CPU sampler and (when `adaptive_mode`) the adaptive tuner.
    pub fn new(config: AdmissionConfig, predictor: Arc<dyn Predictor>) -> Self {
        Self::with_probe(config, predictor, Arc::new(SysinfoProbe::new()))
    }

    /// Create a controller with a custom CPU probe (tests inject scripted
    /// load curves here).
    pub fn with_probe(
        config: AdmissionConfig,
        predictor: Arc<dyn Predictor>,
        probe: Arc<dyn CpuProbe>,
    ) -> Self {
        let policy = Arc::new(FixedWindowPolicy::new(
            config.per_category_rate_limits.clone(),
        ));
        Self::with_probe_and_policy(config, predictor, probe, policy)
    }

    /// Create a controller with custom probe and rate policy.
    pub fn with_probe_and_policy(
        config: AdmissionConfig,
        predictor: Arc<dyn Predictor>,
        probe: Arc<dyn CpuProbe>,
        policy: Arc<dyn RatePolicy>,
    ) -> Self {
        let initial_threshold = config.max_cpu_threshold;
        let adaptive = config.adaptive_mode;

        let inner = Arc::new(Inner {
            config,
            predictor,
            policy,
            probe,
            window: CpuWindow::new(CPU_WINDOW_SIZE),
            state: Mutex::new(ControllerState {
                cpu_usage: 0.0,
                threshold: initial_threshold,
                processed: 0,
                throttled: 0,
                avg_response_ms: 0.0,
                adjustments: 0,
            }),
            throttling: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            queue: AsyncMutex::new(VecDeque::new()),
            queue_len: AtomicUsize::new(0),
        });

        metrics::set_cpu_threshold(initial_threshold);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Inner::run_sampler(Arc::clone(&inner))));
        if adaptive {
            tasks.push(tokio::spawn(Inner::run_adaptive(Arc::clone(&inner))));
        }

        Self {
            inner,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    /// Submit one computation request.
    ///
    /// Executes immediately when the controller is open and the queue is
    /// empty; otherwise waits in the bounded FIFO queue. Suspends the caller
    /// only while queued.
    ///
    /// # Errors
    ///
    /// - [`GateError::RateLimitExceeded`] — category allowance exhausted.
    /// - [`GateError::QueueFull`] — queue at capacity.
    /// - [`GateError::QueueTimeout`] — the request spent `timeout_ms` queued.
    /// - [`GateError::ShuttingDown`] — controller torn down.
    /// - [`GateError::Compute`] — collaborator failure, passed through.
    pub async fn submit(&self, request: ComputationRequest) -> Result<Value, GateError> {
        if !self.inner.policy.check(request.category) {
            self.inner.note_throttled(1);
            metrics::inc_throttled("rate_limit");
            return Err(GateError::RateLimitExceeded {
                category: request.category,
            });
        }

        if self.inner.shutting_down.load(Ordering::SeqCst) {
            metrics::inc_throttled("shutdown");
            return Err(GateError::ShuttingDown);
        }

        // The queue lock covers the whole decision: a drain task that
        // empties the queue concurrently cannot strand a late enqueue, and
        // a request admitted immediately cannot overtake queued ones.
        let admitted = {
            let mut queue = self.inner.queue.lock().await;
            // Re-checked under the lock: shutdown purges the queue while
            // holding it, so an enqueue after the purge must not happen.
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                metrics::inc_throttled("shutdown");
                return Err(GateError::ShuttingDown);
            }
            let throttling = self.inner.throttling.load(Ordering::SeqCst);

            if !throttling && queue.is_empty() {
                Admitted::Now(request)
            } else if queue.len() >= self.inner.config.queue_max_size {
                Admitted::Full
            } else {
                let (tx, rx) = oneshot::channel();
                let id = request.id.clone();
                let timeout_ms = request.timeout_ms;
                queue.push_back(QueuedRequest { request, tx });
                let depth = self.inner.queue_len.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::set_queue_depth(depth as i64);
                debug!(id = %id, queue_len = depth, "request enqueued");

                if !throttling && !self.inner.draining.load(Ordering::SeqCst) {
                    // Throttling lifted between the drain's exit and this
                    // enqueue — restart the drain so the entry is not
                    // stranded.
                    Inner::kick_drain(&self.inner);
                }

                Admitted::Queued { rx, id, timeout_ms }
            }
        };

        match admitted {
            Admitted::Now(request) => Inner::execute(&self.inner, &request).await,
            Admitted::Full => {
                self.inner.note_throttled(1);
                metrics::inc_throttled("queue_full");
                warn!("admission queue full, rejecting request");
                Err(GateError::QueueFull)
            }
            Admitted::Queued {
                mut rx,
                id,
                timeout_ms,
            } => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut rx).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(GateError::ShuttingDown),
                    Err(_elapsed) => {
                        let removed = {
                            let mut queue = self.inner.queue.lock().await;
                            let before = queue.len();
                            queue.retain(|q| q.request.id != id);
                            before != queue.len()
                        };
                        if removed {
                            let depth = self.inner.queue_len.fetch_sub(1, Ordering::SeqCst) - 1;
                            metrics::set_queue_depth(depth as i64);
                            self.inner.note_throttled(1);
                            metrics::inc_throttled("queue_timeout");
                            warn!(id = %id, timeout_ms = timeout_ms, "request timed out in queue");
                            Err(GateError::QueueTimeout)
                        } else {
                            // Already dispatched — the deadline governs
                            // queue residence only, so wait for the
                            // compute outcome.
                            match rx.await {
                                Ok(result) => result,
                                Err(_) => Err(GateError::ShuttingDown),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Metrics snapshot.
    pub fn get_metrics(&self) -> AdmissionMetrics {
        let (cpu_usage, threshold, processed, throttled, avg, adjustments) = self
            .inner
            .with_state(|s| {
                (
                    s.cpu_usage,
                    s.threshold,
                    s.processed,
                    s.throttled,
                    s.avg_response_ms,
                    s.adjustments,
                )
            })
            .unwrap_or((0.0, self.inner.config.max_cpu_threshold, 0, 0, 0.0, 0));

        AdmissionMetrics {
            cpu_usage,
            throttling_active: self.inner.throttling.load(Ordering::SeqCst),
            queue_length: self.inner.queue_len.load(Ordering::SeqCst),
            processed_count: processed,
            throttled_count: throttled,
            avg_response_time_ms: avg,
            threshold_adjustments: adjustments,
            current_max_threshold: threshold,
        }
    }

    /// Tear the controller down: cancel periodic tasks and fail every
    /// queued request with [`GateError::ShuttingDown`]. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.tasks.lock() {
            Ok(mut tasks) => {
                for handle in tasks.drain(..) {
                    handle.abort();
                }
            }
            Err(e) => warn!(error = %e, "tasks lock poisoned in shutdown"),
        }

        let purged = {
            let mut queue = self.inner.queue.lock().await;
            let purged = queue.len();
            while let Some(queued) = queue.pop_front() {
                let _ = queued.tx.send(Err(GateError::ShuttingDown));
                metrics::inc_throttled("shutdown");
            }
            purged
        };
        self.inner.queue_len.store(0, Ordering::SeqCst);
        metrics::set_queue_depth(0);
        self.inner.note_throttled(purged as u64);

        info!(purged = purged, "admission controller shut down");
    }
}

impl Inner {
    fn with_state<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> Option<R> {
        match self.state.lock() {
            Ok(mut guard) => Some(f(&mut guard)),
            Err(e) => {
                warn!(error = %e, "state lock poisoned");
                None
            }
        }
    }

    fn note_throttled(&self, n: u64) {
        if n > 0 {
            self.with_state(|s| s.throttled += n);
        }
    }

    /// Run one computation against the collaborator, recording latency on
    /// success. Compute failures pass through unchanged.
    async fn execute(inner: &Arc<Inner>, request: &ComputationRequest) -> Result<Value, GateError> {
        let started = Instant::now();
        let result = inner
            .predictor
            .predict(request.category, &request.payload)
            .await;

        match &result {
            Ok(_) => {
                let elapsed = started.elapsed();
                inner.with_state(|s| {
                    s.processed += 1;
                    let ms = elapsed.as_secs_f64() * 1_000.0;
                    s.avg_response_ms += (ms - s.avg_response_ms) / s.processed as f64;
                });
                metrics::inc_prediction(request.category.as_str());
                metrics::observe_prediction_duration(elapsed);
                debug!(
                    id = %request.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "prediction completed"
                );
            }
            Err(e) => {
                metrics::inc_prediction_failure(request.category.as_str());
                warn!(id = %request.id, error = %e, "prediction failed");
            }
        }

        result
    }

    /// Periodic CPU sampling with edge-triggered throttle transitions.
    async fn run_sampler(inner: Arc<Inner>) {
        let interval = Duration::from_millis(inner.config.sample_interval_ms.max(1));
        loop {
            tokio::time::sleep(interval).await;
            if inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            let sample = inner.probe.sample();
            let smoothed = inner.window.push(sample);
            let threshold = inner
                .with_state(|s| {
                    s.cpu_usage = smoothed;
                    s.threshold
                })
                .unwrap_or(inner.config.max_cpu_threshold);
            metrics::set_cpu_usage(smoothed);

            let was_throttling = inner.throttling.load(Ordering::SeqCst);
            if smoothed >= threshold && !was_throttling {
                inner.throttling.store(true, Ordering::SeqCst);
                info!(
                    cpu = smoothed,
                    threshold = threshold,
                    "throttling activated"
                );
            } else if smoothed < threshold && was_throttling {
                inner.throttling.store(false, Ordering::SeqCst);
                info!(
                    cpu = smoothed,
                    threshold = threshold,
                    "throttling deactivated"
                );
                Inner::kick_drain(&inner);
            }
        }
    }

    /// Periodic threshold tuning from CPU trend and queue pressure.
    ///
    /// The downward step is larger than the upward step — that asymmetry is
    /// the hysteresis that keeps the threshold from oscillating.
    async fn run_adaptive(inner: Arc<Inner>) {
        let interval = Duration::from_millis(inner.config.adaptive_interval_ms.max(1));
        loop {
            tokio::time::sleep(interval).await;
            if inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            let Some(trend) = inner.window.trend() else {
                continue;
            };
            let queue_len = inner.queue_len.load(Ordering::SeqCst);
            let pressure = if inner.config.queue_max_size == 0 {
                0.0
            } else {
                queue_len as f64 / inner.config.queue_max_size as f64
            };

            inner.with_state(|s| {
                if trend > 0.0 && pressure > HIGH_PRESSURE && s.threshold > inner.config.min_cpu_threshold
                {
                    s.threshold =
                        (s.threshold - inner.config.step_down).max(inner.config.min_cpu_threshold);
                    s.adjustments += 1;
                    info!(
                        threshold = s.threshold,
                        trend = trend,
                        pressure = pressure,
                        "lowered cpu threshold"
                    );
                } else if trend < 0.0
                    && pressure < LOW_PRESSURE
                    && s.threshold < inner.config.max_threshold_ceiling
                {
                    s.threshold =
                        (s.threshold + inner.config.step_up).min(inner.config.max_threshold_ceiling);
                    s.adjustments += 1;
                    info!(
                        threshold = s.threshold,
                        trend = trend,
                        pressure = pressure,
                        "raised cpu threshold"
                    );
                }
                metrics::set_cpu_threshold(s.threshold);
            });
        }
    }

    /// Start the drain task unless one is already running.
    ///
    /// The drain dispatches queued requests in submission order, a bounded
    /// batch per tick, and exits when the queue empties, throttling
    /// reactivates, or shutdown begins. Batch members execute sequentially
    /// so dispatch order is strictly FIFO.
    fn kick_drain(inner: &Arc<Inner>) {
        if inner.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            debug!("queue drain started");
            loop {
                if inner.shutting_down.load(Ordering::SeqCst)
                    || inner.throttling.load(Ordering::SeqCst)
                {
                    inner.draining.store(false, Ordering::SeqCst);
                    debug!("queue drain paused");
                    return;
                }

                let batch: Vec<QueuedRequest> = {
                    let mut queue = inner.queue.lock().await;
                    if queue.is_empty() {
                        // Cleared under the queue lock: a racing enqueue
                        // either sees the flag still set or finds the flag
                        // clear and kicks a fresh drain.
                        inner.draining.store(false, Ordering::SeqCst);
                        debug!("queue drained");
                        return;
                    }
                    let n = inner.config.drain_batch_size.max(1).min(queue.len());
                    queue.drain(..n).collect()
                };

                let depth = inner.queue_len.fetch_sub(batch.len(), Ordering::SeqCst) - batch.len();
                metrics::set_queue_depth(depth as i64);

                for queued in batch {
                    let result = Inner::execute(&inner, &queued.request).await;
                    let _ = queued.tx.send(result);
                }

                tokio::time::sleep(Duration::from_millis(inner.config.drain_tick_ms.max(1))).await;
            }
        });
    }
}
