//! Error types for the monitoring core

use std::path::PathBuf;
use thiserror::Error;

/// An OS query needed for a snapshot failed
///
/// Transient: the monitor skips the cycle and retries on the next tick.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("permission denied reading {subsystem}: {message}")]
    PermissionDenied {
        subsystem: &'static str,
        message: String,
    },
    #[error("failed to query {subsystem}: {message}")]
    Query {
        subsystem: &'static str,
        message: String,
    },
}

/// Writing to the anomaly log failed
///
/// Never fatal once monitoring has started; the event stays in memory and
/// the write is retried on the next cycle.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to open anomaly log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write anomaly log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode anomaly event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invalid configuration detected at startup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("subsample_size {subsample} must satisfy 1 < subsample_size <= warmup_count ({warmup})")]
    SubsampleSize { subsample: usize, warmup: usize },

    #[error("severity cuts must satisfy 0 < low < mid < high < 1, got low={low} mid={mid} high={high}")]
    SeverityCuts { low: f64, mid: f64, high: f64 },

    #[error("{field} threshold {value} is outside [0, 100]")]
    ThresholdOutOfRange { field: &'static str, value: f64 },

    #[error("history_capacity {capacity} must be at least warmup_count {warmup}")]
    HistoryCapacity { capacity: usize, warmup: usize },

    #[error("training_window {window} must lie within [{min}, {max}]")]
    TrainingWindow { window: usize, min: usize, max: usize },
}

/// Fatal conditions reported by the monitor loop
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitoring stopped after {failures} consecutive sampling failures: {last_error}")]
    ConsecutiveSamplingFailures { failures: u32, last_error: String },

    #[error("{0} is required to build the monitor loop")]
    MissingComponent(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
