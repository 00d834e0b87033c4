//! # prediction-gate
//!
//! Adaptive admission control and result caching in front of an expensive,
//! latency-variable computation (generating a predictive analysis).
//!
//! ## Architecture
//!
//! Two independent components composed by a thin orchestration layer:
//! ```text
//! request → ResultCache (hit? return) → AdmissionController → Predictor
//!                ↑                                              │
//!                └──────────── store on success ────────────────┘
//! ```
//!
//! The [`AdmissionController`] samples system CPU load, throttles when the
//! smoothed usage crosses an adaptive threshold, queues excess requests in a
//! bounded FIFO, and fails them safely on timeout. The [`ResultCache`]
//! memoizes results by a deterministic fingerprint of `(category, payload)`
//! with per-category TTLs and LRU eviction. [`PredictionGate`] wires both
//! together in front of a caller-supplied [`Predictor`].

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod admission;
pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod metrics;
pub mod orchestrator;
pub mod predictor;

// Re-exports for convenience
pub use admission::{AdmissionConfig, AdmissionController, AdmissionMetrics};
pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use orchestrator::{GateResponse, PredictionGate};
pub use predictor::{EchoPredictor, Predictor};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set (e.g. by
/// a previous call or a test harness).
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    }
}

/// Admission and computation errors.
///
/// All controller-originated variants are terminal — the gate never retries
/// on the caller's behalf. Compute failures surface unchanged through
/// [`GateError::Compute`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The request's category has exhausted its per-minute allowance.
    #[error("rate limit exceeded for category {category}")]
    RateLimitExceeded {
        /// Category whose allowance was exhausted.
        category: PredictionCategory,
    },

    /// The wait queue has reached its configured capacity.
    #[error("admission queue full")]
    QueueFull,

    /// The request spent its whole timeout waiting in the queue.
    #[error("timed out waiting in admission queue")]
    QueueTimeout,

    /// The controller is shutting down; queued and new requests fail fast.
    #[error("admission controller shutting down")]
    ShuttingDown,

    /// The compute collaborator failed. Opaque pass-through, never retried
    /// by this crate.
    #[error("computation failed: {0}")]
    Compute(String),
}

/// Category of predictive analysis a request asks for.
///
/// The category selects the cache TTL, the rate-limit allowance, and is the
/// prefix of every cache key and metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionCategory {
    /// Time-series forecast of a tracked quantity.
    Forecast,
    /// Outlier detection over recent observations.
    Anomaly,
    /// Direction and slope of a longer-horizon movement.
    Trend,
    /// Ranked suggestions derived from historical behaviour.
    Recommendation,
}

impl PredictionCategory {
    /// All categories, in declaration order.
    pub const ALL: [PredictionCategory; 4] = [
        PredictionCategory::Forecast,
        PredictionCategory::Anomaly,
        PredictionCategory::Trend,
        PredictionCategory::Recommendation,
    ];

    /// Stable lowercase name, used as cache-key prefix and metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionCategory::Forecast => "forecast",
            PredictionCategory::Anomaly => "anomaly",
            PredictionCategory::Trend => "trend",
            PredictionCategory::Recommendation => "recommendation",
        }
    }

    /// Parse a category from its name. Returns `None` for unrecognised
    /// strings.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "forecast" => Some(PredictionCategory::Forecast),
            "anomaly" => Some(PredictionCategory::Anomaly),
            "trend" => Some(PredictionCategory::Trend),
            "recommendation" => Some(PredictionCategory::Recommendation),
            _ => None,
        }
    }
}

impl std::fmt::Display for PredictionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request priority levels.
///
/// Priority is carried on every request and available to rate-limit policy;
/// the baseline queue does not reorder by it (dispatch stays FIFO).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lowest priority — background / batch work.
    Low = 0,
    /// Standard priority for most requests.
    #[default]
    Medium = 1,
    /// Elevated priority.
    High = 2,
    /// Highest priority.
    Critical = 3,
}

impl Priority {
    /// Parse a priority level from a name string (`"low"`, `"medium"`,
    /// `"high"`, `"critical"`). Returns `None` for unrecognised strings.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

/// A single computation request submitted to the [`AdmissionController`].
///
/// Identity is `id`; uniqueness is the caller's responsibility. The request
/// is consumed once by the controller and discarded after completion or
/// timeout.
#[derive(Debug, Clone)]
pub struct ComputationRequest {
    /// Unique identifier for trace correlation and queue removal.
    pub id: String,
    /// Category of analysis requested.
    pub category: PredictionCategory,
    /// Opaque structured input, passed unchanged to the compute collaborator.
    pub payload: serde_json::Value,
    /// Priority tag (not used for queue ordering in the baseline design).
    pub priority: Priority,
    /// Monotonic creation timestamp.
    pub submitted_at: Instant,
    /// Maximum time the request may wait in the queue before failing with
    /// [`GateError::QueueTimeout`].
    pub timeout_ms: u64,
}

/// Default queue-wait timeout for a request, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

impl ComputationRequest {
    /// Create a request with a fresh UUID, the current monotonic timestamp,
    /// and the default 30s queue timeout.
    pub fn new(
        category: PredictionCategory,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            payload,
            priority,
            submitted_at: Instant::now(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    /// Override the queue-wait timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}
