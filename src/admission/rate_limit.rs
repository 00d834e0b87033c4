//! Per-category rate limiting.
//!
//! The admission controller consults a [`RatePolicy`] before anything else.
//! The default [`FixedWindowPolicy`] counts requests per category in fixed
//! one-minute windows from the configured allowances and is permissive for
//! categories with no configured limit. Callers with different needs
//! implement [`RatePolicy`] themselves and inject it at construction.

use crate::PredictionCategory;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Admission-time rate policy hook.
pub trait RatePolicy: Send + Sync {
    /// Returns `true` when the request may proceed, `false` to reject it
    /// with `RateLimitExceeded`. Implementations count the call as usage.
    fn check(&self, category: PredictionCategory) -> bool;
}

struct CategoryWindow {
    count: u32,
    reset_at: SystemTime,
}

/// Fixed-window per-category limiter.
pub struct FixedWindowPolicy {
    limits: HashMap<PredictionCategory, u32>,
    windows: DashMap<PredictionCategory, CategoryWindow>,
    window: Duration,
}

impl FixedWindowPolicy {
    /// Create a policy with per-minute allowances. Categories absent from
    /// `limits` are unlimited.
    pub fn new(limits: HashMap<PredictionCategory, u32>) -> Self {
        Self::with_window(limits, Duration::from_secs(60))
    }

    /// Create a policy with a custom window length (tests use short windows).
    pub fn with_window(limits: HashMap<PredictionCategory, u32>, window: Duration) -> Self {
        Self {
            limits,
            windows: DashMap::new(),
            window,
        }
    }

    /// Current usage in the active window, `None` for categories that have
    /// never been checked or carry no limit.
    pub fn usage(&self, category: PredictionCategory) -> Option<RateUsage> {
        let limit = *self.limits.get(&category)?;
        self.windows.get(&category).map(|w| RateUsage {
            used: w.count,
            remaining: limit.saturating_sub(w.count),
            reset_in_secs: w
                .reset_at
                .duration_since(SystemTime::now())
                .unwrap_or_default()
                .as_secs(),
        })
    }
}

impl RatePolicy for FixedWindowPolicy {
    fn check(&self, category: PredictionCategory) -> bool {
        let Some(&limit) = self.limits.get(&category) else {
            return true;
        };

        let now = SystemTime::now();
        let mut entry = self.windows.entry(category).or_insert(CategoryWindow {
            count: 0,
            reset_at: now + self.window,
        });

        // Reset if window expired
        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        if entry.count >= limit {
            warn!(
                category = %category,
                count = entry.count,
                limit = limit,
                "rate limit exceeded"
            );
            return false;
        }

        entry.count += 1;
        debug!(
            category = %category,
            count = entry.count,
            limit = limit,
            "rate limit check passed"
        );
        true
    }
}

/// Usage snapshot for one category's active window.
#[derive(Debug)]
pub struct RateUsage {
    /// Requests consumed in the current window.
    pub used: u32,
    /// Requests still available in the current window.
    pub remaining: u32,
    /// Seconds until the current window resets.
    pub reset_in_secs: u64,
}
