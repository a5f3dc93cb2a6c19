//! Anomaly detection for host resource usage
//!
//! This module provides:
//! - Isolation-forest scoring against a periodically refitted baseline
//! - Severity grading of anomaly scores
//! - The append-only anomaly log

mod baseline;
mod detector;
mod isolation_forest;
mod log;
mod severity;

pub use baseline::{feature_vector, Baseline, FeatureStats, MetricDeviation};
pub use detector::{AnomalyDetector, AnomalyEvent, Detection, DetectorOutput, DetectorPhase};
pub use isolation_forest::{expected_path_length, FeatureVector, IsolationForest};
pub use log::{AnomalyLog, AnomalyLogStats};
pub use severity::{Severity, SeverityCuts};
