//! CPU load sampling.
//!
//! [`CpuProbe`] is the seam between the controller and the operating
//! system: production uses [`SysinfoProbe`], tests inject scripted probes
//! so admission behaviour is deterministic. [`CpuWindow`] smooths raw
//! samples with a fixed-length moving average so admission decisions are
//! not flappy under transient spikes.

use std::collections::VecDeque;
use std::sync::Mutex;
use sysinfo::System;
use tracing::warn;

/// Number of samples held by the smoothing window.
pub const CPU_WINDOW_SIZE: usize = 10;

/// Number of samples on each side of the trend comparison.
const TREND_SPAN: usize = 3;

/// Source of system-wide CPU busy-percent samples (0.0–100.0).
pub trait CpuProbe: Send + Sync {
    /// Take one sample. Called on the controller's sampling cadence.
    fn sample(&self) -> f64;
}

/// Production probe reading system-wide CPU usage via `sysinfo`.
///
/// The `System` instance is cached behind a mutex — recreating it per
/// sample is expensive, and `sysinfo` computes usage from the delta
/// between consecutive refreshes anyway.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    /// Create a probe with a primed `System` instance.
    pub fn new() -> Self {
        let mut system = System::new();
        // First refresh primes the counters; the first real sample is
        // computed against this baseline.
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuProbe for SysinfoProbe {
    fn sample(&self) -> f64 {
        match self.system.lock() {
            Ok(mut system) => {
                system.refresh_cpu_usage();
                f64::from(system.global_cpu_usage())
            }
            Err(e) => {
                warn!(error = %e, "system lock poisoned in cpu sample");
                0.0
            }
        }
    }
}

/// Fixed-length ring of recent CPU samples with mean and trend readouts.
pub struct CpuWindow {
    samples: Mutex<VecDeque<f64>>,
    capacity: usize,
}

impl CpuWindow {
    /// Create a window holding up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Push a sample, dropping the oldest at capacity. Returns the new mean.
    pub fn push(&self, sample: f64) -> f64 {
        match self.samples.lock() {
            Ok(mut samples) => {
                if samples.len() >= self.capacity {
                    samples.pop_front();
                }
                samples.push_back(sample);
                mean_of(samples.iter().copied())
            }
            Err(e) => {
                warn!(error = %e, "samples lock poisoned in push");
                sample
            }
        }
    }

    /// Arithmetic mean of the held samples. 0.0 when empty.
    pub fn mean(&self) -> f64 {
        match self.samples.lock() {
            Ok(samples) => mean_of(samples.iter().copied()),
            Err(e) => {
                warn!(error = %e, "samples lock poisoned in mean");
                0.0
            }
        }
    }

    /// Short-term trend: mean of the newest 3 samples minus the mean of the
    /// 3 before them. `None` until 6 samples have been collected.
    pub fn trend(&self) -> Option<f64> {
        match self.samples.lock() {
            Ok(samples) => {
                if samples.len() < TREND_SPAN * 2 {
                    return None;
                }
                let newest = mean_of(samples.iter().rev().take(TREND_SPAN).copied());
                let previous =
                    mean_of(samples.iter().rev().skip(TREND_SPAN).take(TREND_SPAN).copied());
                Some(newest - previous)
            }
            Err(e) => {
                warn!(error = %e, "samples lock poisoned in trend");
                None
            }
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// True when no samples have been collected yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
