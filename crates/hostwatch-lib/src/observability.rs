//! Observability infrastructure for the host monitor
//!
//! Provides:
//! - Prometheus metrics (sampling and cycle latency, anomaly scores and counts,
//!   log persistence, detector state)
//! - Structured logging with tracing, including the human-readable line
//!   emitted once per monitoring cycle

use crate::anomaly::{AnomalyEvent, Detection, DetectorPhase, Severity};
use crate::models::Snapshot;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    sample_latency_seconds: Histogram,
    cycle_latency_seconds: Histogram,
    anomaly_score: Gauge,
    anomalies_total: IntCounterVec,
    sampling_errors_total: IntCounter,
    degraded_samples_total: IntCounter,
    log_write_failures_total: IntCounter,
    log_pending_records: IntGauge,
    retrains_total: IntCounter,
    history_snapshots: IntGauge,
    detector_ready: IntGauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            sample_latency_seconds: register_histogram!(
                "hostwatch_sample_latency_seconds",
                "Time spent taking one host snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            cycle_latency_seconds: register_histogram!(
                "hostwatch_cycle_latency_seconds",
                "Time spent on one full monitoring cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            anomaly_score: register_gauge!(
                "hostwatch_anomaly_score",
                "Anomaly score of the most recent snapshot"
            )
            .expect("Failed to register anomaly_score"),

            anomalies_total: register_int_counter_vec!(
                "hostwatch_anomalies_total",
                "Anomaly events by severity",
                &["severity"]
            )
            .expect("Failed to register anomalies_total"),

            sampling_errors_total: register_int_counter!(
                "hostwatch_sampling_errors_total",
                "Monitoring cycles skipped because sampling failed"
            )
            .expect("Failed to register sampling_errors_total"),

            degraded_samples_total: register_int_counter!(
                "hostwatch_degraded_samples_total",
                "Snapshots with at least one unavailable metric"
            )
            .expect("Failed to register degraded_samples_total"),

            log_write_failures_total: register_int_counter!(
                "hostwatch_anomaly_log_write_failures_total",
                "Failed attempts to persist anomaly records"
            )
            .expect("Failed to register log_write_failures_total"),

            log_pending_records: register_int_gauge!(
                "hostwatch_anomaly_log_pending_records",
                "Anomaly records waiting to be written"
            )
            .expect("Failed to register log_pending_records"),

            retrains_total: register_int_counter!(
                "hostwatch_baseline_fits_total",
                "Anomaly baselines fitted"
            )
            .expect("Failed to register retrains_total"),

            history_snapshots: register_int_gauge!(
                "hostwatch_history_snapshots",
                "Snapshots currently held in history"
            )
            .expect("Failed to register history_snapshots"),

            detector_ready: register_int_gauge!(
                "hostwatch_detector_ready",
                "1 once the detector has a baseline, 0 while warming up"
            )
            .expect("Failed to register detector_ready"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    /// Record the outcome of scoring a snapshot
    pub fn record_detection(&self, detection: &Detection) {
        let inner = self.inner();
        match detection {
            Detection::WarmingUp { .. } => inner.detector_ready.set(0),
            Detection::Scored { score, severity } => {
                inner.detector_ready.set(1);
                inner.anomaly_score.set(*score);
                if let Some(severity) = severity {
                    let label = severity.to_string();
                    inner
                        .anomalies_total
                        .with_label_values(&[label.as_str()])
                        .inc();
                }
            }
        }
    }

    pub fn inc_sampling_errors(&self) {
        self.inner().sampling_errors_total.inc();
    }

    pub fn inc_degraded_samples(&self) {
        self.inner().degraded_samples_total.inc();
    }

    pub fn inc_log_write_failures(&self) {
        self.inner().log_write_failures_total.inc();
    }

    pub fn set_log_pending(&self, pending: usize) {
        self.inner().log_pending_records.set(pending as i64);
    }

    pub fn inc_retrains(&self) {
        self.inner().retrains_total.inc();
    }

    pub fn set_history_size(&self, snapshots: usize) {
        self.inner().history_snapshots.set(snapshots as i64);
    }
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1}", v))
}

/// Structured logger for monitor events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64, warmup_count: usize) {
        info!(
            event = "monitor_started",
            node = %self.node_name,
            version = %version,
            interval_secs = interval_secs,
            warmup_count = warmup_count,
            "Host monitor started"
        );
    }

    /// The per-cycle line: timestamp, key metrics and any triggered severity
    pub fn log_cycle(&self, cycle: u64, snapshot: &Snapshot, detection: &Detection, recommendations: usize) {
        let (score, severity, detector) = match detection {
            Detection::WarmingUp { observed, required } => {
                (None, None, format!("warming up {}/{}", observed, required))
            }
            Detection::Scored { score, severity } => (Some(*score), *severity, "ready".to_string()),
        };

        let line = format!(
            "{} cpu={}% mem={}% disk={}% swap={}% score={} severity={}",
            snapshot.timestamp.to_rfc3339(),
            fmt_metric(snapshot.cpu_percent),
            fmt_metric(snapshot.memory_percent),
            fmt_metric(snapshot.disk_percent),
            fmt_metric(snapshot.swap_percent),
            score.map_or_else(|| "-".to_string(), |s| format!("{:.3}", s)),
            severity.map_or_else(|| "none".to_string(), |s| s.to_string()),
        );

        info!(
            event = "monitor_cycle",
            node = %self.node_name,
            cycle = cycle,
            detector = %detector,
            recommendations = recommendations,
            degraded = snapshot.is_degraded(),
            "{}",
            line
        );
    }

    pub fn log_anomaly(&self, event: &AnomalyEvent) {
        let contributing: Vec<&str> = event
            .contributing_metrics
            .iter()
            .map(|m| m.metric.name())
            .collect();

        match event.severity {
            Severity::High => {
                warn!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    severity = %event.severity,
                    anomaly_score = event.anomaly_score,
                    contributing = ?contributing,
                    "High severity anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    severity = %event.severity,
                    anomaly_score = event.anomaly_score,
                    contributing = ?contributing,
                    "Anomaly detected"
                );
            }
        }
    }

    pub fn log_retrain(&self, phase: DetectorPhase, observed: usize) {
        info!(
            event = "baseline_fitted",
            node = %self.node_name,
            phase = ?phase,
            observed = observed,
            "Anomaly baseline replaced, effective next cycle"
        );
    }

    pub fn log_sampling_failure(&self, error: &str, consecutive: u32, budget: u32) {
        warn!(
            event = "sampling_failed",
            node = %self.node_name,
            error = %error,
            consecutive_failures = consecutive,
            max_consecutive_failures = budget,
            "Sampling failed, skipping cycle"
        );
    }

    pub fn log_write_failure(&self, error: &str, pending: usize) {
        warn!(
            event = "anomaly_log_write_failed",
            node = %self.node_name,
            error = %error,
            pending = pending,
            "Failed to persist anomaly record, will retry next cycle"
        );
    }

    pub fn log_write_recovered(&self, written: usize) {
        debug!(
            event = "anomaly_log_recovered",
            node = %self.node_name,
            written = written,
            "Persisted previously pending anomaly records"
        );
    }

    pub fn log_stopped(&self, reason: &str) {
        error!(
            event = "monitor_stopped",
            node = %self.node_name,
            reason = %reason,
            "Host monitor stopped"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Host monitor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_monitor_metrics_handles_share_registry() {
        let metrics = MonitorMetrics::new();
        let other = metrics.clone();

        metrics.observe_sample_latency(0.002);
        other.observe_cycle_latency(0.01);
        metrics.record_detection(&Detection::Scored {
            score: 0.7,
            severity: Some(Severity::High),
        });
        metrics.record_detection(&Detection::WarmingUp {
            observed: 1,
            required: 10,
        });
        metrics.set_log_pending(3);
        metrics.set_history_size(42);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "hostwatch_anomalies_total"));
    }

    #[test]
    fn test_fmt_metric_marks_unavailable() {
        assert_eq!(fmt_metric(None), "n/a");
        assert_eq!(fmt_metric(Some(12.345)), "12.3");
    }

    #[test]
    fn test_structured_logger_cycle_line() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
        logger.log_cycle(
            1,
            &Snapshot::empty(Utc::now()),
            &Detection::WarmingUp {
                observed: 1,
                required: 120,
            },
            0,
        );
    }
}
