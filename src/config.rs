//! Configuration loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`GateConfig`], and run
//! validation before returning. This is the primary entry point for loading
//! gate configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message

use crate::{AdmissionConfig, CacheConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level configuration: one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Admission controller section.
    pub admission: AdmissionConfig,
    /// Result cache section.
    pub cache: CacheConfig,
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not well-formed TOML.
    #[error("failed to parse config file {file}: {source}")]
    Parse {
        /// Path of the malformed file.
        file: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// The file parsed but violates semantic constraints.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Load a [`GateConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
pub fn load_from_file(path: &Path) -> Result<GateConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`GateConfig`] from a TOML string.
///
/// Useful for testing or embedding configs without file I/O.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
pub fn load_from_str(content: &str, source_name: &str) -> Result<GateConfig, ConfigError> {
    let config: GateConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validate(&config).map_err(|errors| ConfigError::Validation(errors.join("\n")))?;

    Ok(config)
}

/// Check semantic constraints. Returns every violation, not just the first.
pub fn validate(config: &GateConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let a = &config.admission;

    if a.min_cpu_threshold <= 0.0 || a.min_cpu_threshold > 100.0 {
        errors.push(format!(
            "admission.min_cpu_threshold must be in (0, 100], got {}",
            a.min_cpu_threshold
        ));
    }
    if a.max_cpu_threshold <= 0.0 || a.max_cpu_threshold > 100.0 {
        errors.push(format!(
            "admission.max_cpu_threshold must be in (0, 100], got {}",
            a.max_cpu_threshold
        ));
    }
    if a.min_cpu_threshold > a.max_cpu_threshold {
        errors.push(format!(
            "admission.min_cpu_threshold ({}) must not exceed max_cpu_threshold ({})",
            a.min_cpu_threshold, a.max_cpu_threshold
        ));
    }
    if a.max_threshold_ceiling < a.max_cpu_threshold || a.max_threshold_ceiling > 100.0 {
        errors.push(format!(
            "admission.max_threshold_ceiling must be in [max_cpu_threshold, 100], got {}",
            a.max_threshold_ceiling
        ));
    }
    if a.sample_interval_ms == 0 {
        errors.push("admission.sample_interval_ms must be > 0".to_string());
    }
    if a.adaptive_interval_ms == 0 {
        errors.push("admission.adaptive_interval_ms must be > 0".to_string());
    }
    if a.queue_max_size == 0 {
        errors.push("admission.queue_max_size must be > 0".to_string());
    }
    if a.step_down <= 0.0 || a.step_up <= 0.0 {
        errors.push("admission.step_down and step_up must be > 0".to_string());
    }
    if a.step_down < a.step_up {
        errors.push(format!(
            "admission.step_down ({}) must be >= step_up ({}) to damp oscillation",
            a.step_down, a.step_up
        ));
    }
    if a.drain_batch_size == 0 {
        errors.push("admission.drain_batch_size must be > 0".to_string());
    }

    let c = &config.cache;
    if c.max_size == 0 {
        errors.push("cache.max_size must be > 0".to_string());
    }
    if c.default_ttl_ms == 0 {
        errors.push("cache.default_ttl_ms must be > 0".to_string());
    }
    if c.sweep_interval_ms == 0 {
        errors.push("cache.sweep_interval_ms must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
