//! Orchestration contract.
//!
//! [`PredictionGate`] composes the [`ResultCache`] and the
//! [`AdmissionController`] in front of a caller-supplied [`Predictor`]:
//! check the cache first; on a miss submit to the controller; on success
//! store the result before returning it. Backpressure rejections
//! (`QueueFull`, `QueueTimeout`) surface as [`GateResponse::NotAvailable`]
//! rather than errors — throttling is advisory, and callers may fall back
//! to a degraded path.

use crate::admission::{AdmissionController, AdmissionMetrics};
use crate::cache::{CacheStats, ResultCache};
use crate::{ComputationRequest, GateError, PredictionCategory, Priority};
use serde_json::Value;
use tracing::debug;

/// Outcome of one gate request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateResponse {
    /// Served from the cache; the admission controller was not consulted.
    Cached(Value),
    /// Freshly computed and stored in the cache.
    Computed(Value),
    /// Backpressure rejection — the caller may retry later or degrade.
    NotAvailable,
}

/// Cache-first gate in front of the admission controller.
pub struct PredictionGate {
    cache: ResultCache<Value>,
    controller: AdmissionController,
}

impl PredictionGate {
    /// Compose a gate from independently constructed components.
    pub fn new(cache: ResultCache<Value>, controller: AdmissionController) -> Self {
        Self { cache, controller }
    }

    /// Serve one request with the default queue timeout.
    ///
    /// # Errors
    ///
    /// [`GateError::RateLimitExceeded`], [`GateError::ShuttingDown`], and
    /// compute failures propagate; `QueueFull`/`QueueTimeout` do not (they
    /// become [`GateResponse::NotAvailable`]).
    pub async fn request(
        &self,
        category: PredictionCategory,
        payload: Value,
        priority: Priority,
    ) -> Result<GateResponse, GateError> {
        self.request_with_timeout(category, payload, priority, crate::DEFAULT_REQUEST_TIMEOUT_MS)
            .await
    }

    /// Serve one request with an explicit queue timeout in milliseconds.
    ///
    /// # Errors
    ///
    /// See [`PredictionGate::request`].
    pub async fn request_with_timeout(
        &self,
        category: PredictionCategory,
        payload: Value,
        priority: Priority,
        timeout_ms: u64,
    ) -> Result<GateResponse, GateError> {
        if let Some(hit) = self.cache.get(category, &payload) {
            return Ok(GateResponse::Cached(hit));
        }

        let request =
            ComputationRequest::new(category, payload.clone(), priority).with_timeout_ms(timeout_ms);
        let id = request.id.clone();

        match self.controller.submit(request).await {
            Ok(result) => {
                self.cache.set(category, &payload, result.clone());
                Ok(GateResponse::Computed(result))
            }
            Err(GateError::QueueFull) | Err(GateError::QueueTimeout) => {
                debug!(id = %id, "request not served, backpressure active");
                Ok(GateResponse::NotAvailable)
            }
            Err(e) => Err(e),
        }
    }

    /// Admission metrics snapshot.
    pub fn metrics(&self) -> AdmissionMetrics {
        self.controller.get_metrics()
    }

    /// Cache statistics snapshot.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Invalidate cache entries; see [`ResultCache::invalidate`].
    pub fn invalidate(
        &self,
        category: Option<PredictionCategory>,
        payload: Option<&Value>,
    ) -> usize {
        self.cache.invalidate(category, payload)
    }

    /// Tear down both components: controller tasks and queued requests,
    /// then the cache sweep.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
        self.cache.stop();
    }
}
