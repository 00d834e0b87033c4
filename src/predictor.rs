//! Compute collaborator abstraction.
//!
//! The gate treats the actual analysis engine as an opaque async
//! collaborator: it accepts a typed request and eventually returns a result
//! or fails. Implementations must be thread-safe (Send + Sync) for use
//! across tasks; the trait is object-safe to allow `Arc<dyn Predictor>`.

use crate::{GateError, PredictionCategory};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Trait for predictive-analysis engines.
///
/// The whole point of the admission controller is that `predict` must NOT
/// be assumed synchronous-fast — it may take seconds and saturate CPUs.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Run one analysis for `payload` in `category`.
    ///
    /// # Errors
    ///
    /// Implementations report failures as [`GateError::Compute`]; the gate
    /// surfaces them unchanged and never retries.
    async fn predict(
        &self,
        category: PredictionCategory,
        payload: &Value,
    ) -> Result<Value, GateError>;
}

/// Dummy predictor for tests and demos.
///
/// Sleeps for a configurable delay, then echoes the payload back wrapped in
/// a result object.
pub struct EchoPredictor {
    /// Simulated inference delay.
    pub delay_ms: u64,
}

impl EchoPredictor {
    /// Create an echo predictor with a 10ms simulated delay.
    pub fn new() -> Self {
        Self { delay_ms: 10 }
    }

    /// Create an echo predictor with a specific simulated delay.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for EchoPredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Predictor for EchoPredictor {
    async fn predict(
        &self,
        category: PredictionCategory,
        payload: &Value,
    ) -> Result<Value, GateError> {
        tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;

        Ok(json!({
            "category": category.as_str(),
            "echo": payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_predictor_wraps_payload() {
        let predictor = EchoPredictor::with_delay(0);
        let result = predictor
            .predict(PredictionCategory::Forecast, &json!({"series": "cpu"}))
            .await
            .expect("echo must succeed");

        assert_eq!(result["category"], "forecast");
        assert_eq!(result["echo"]["series"], "cpu");
    }

    #[tokio::test]
    async fn test_echo_predictor_honours_delay() {
        let predictor = EchoPredictor::with_delay(50);
        let started = std::time::Instant::now();
        let _ = predictor
            .predict(PredictionCategory::Trend, &Value::Null)
            .await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_echo_predictor_default_delay_is_10ms() {
        assert_eq!(EchoPredictor::default().delay_ms, 10);
    }
}
