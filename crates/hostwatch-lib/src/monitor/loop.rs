//! Monitoring loop
//!
//! Drives one cycle per interval: sample, append to history, score, evaluate
//! thresholds, log any anomaly, publish the results. The loop is the only
//! writer of history, the detector's baseline and the published state.

use super::handle::{CycleBundle, MonitorHandle, MonitorStatus, PublishedState};
use crate::allocator::{ConsumerRanking, MaintenanceAdvisor, ResourceAllocator};
use crate::anomaly::{AnomalyDetector, AnomalyLog, DetectorPhase};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, SamplingError};
use crate::health::{Component, HealthRegistry};
use crate::history::HistoryStore;
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::sampler::MetricSampler;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// The monitoring orchestrator
pub struct MonitorLoop {
    config: MonitorConfig,
    sampler: Box<dyn MetricSampler>,
    history: HistoryStore,
    detector: AnomalyDetector,
    allocator: ResourceAllocator,
    maintenance: MaintenanceAdvisor,
    anomaly_log: AnomalyLog,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    state_tx: watch::Sender<PublishedState>,
    cycle: u64,
    consecutive_failures: u32,
}

impl MonitorLoop {
    /// Create a loop and the handle that reads its results
    ///
    /// Fails if the configuration does not validate.
    pub fn new(
        config: MonitorConfig,
        sampler: Box<dyn MetricSampler>,
        anomaly_log: AnomalyLog,
        health: HealthRegistry,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Result<(Self, MonitorHandle), MonitorError> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(PublishedState {
            anomalies: Arc::new(anomaly_log.recent(config.anomaly_log.retention)),
            ..Default::default()
        });

        let monitor = Self {
            history: HistoryStore::new(config.history_capacity),
            detector: AnomalyDetector::new(config.detector.clone(), config.severity),
            allocator: ResourceAllocator::new(config.thresholds, config.sustain_window),
            maintenance: MaintenanceAdvisor::new(config.maintenance),
            config,
            sampler,
            anomaly_log,
            health,
            metrics,
            logger,
            state_tx,
            cycle: 0,
            consecutive_failures: 0,
        };

        Ok((monitor, MonitorHandle::new(state_rx)))
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Run until shutdown is requested or sampling fails too often
    ///
    /// Shutdown is only observed between cycles, never part-way through one.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), MonitorError> {
        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.config.interval_secs,
            self.config.detector.warmup_count,
        );
        self.health.register_all().await;
        if self.detector.phase() == DetectorPhase::WarmingUp {
            self.health
                .set_degraded(Component::Detector, "warming up")
                .await;
        }
        self.publish_status(MonitorStatus::Running);
        self.health.set_ready(true).await;

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    self.logger.log_shutdown("shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        if self.consecutive_failures >= self.config.max_consecutive_failures {
                            return Err(self.fail(e).await);
                        }
                    }
                }
            }
        }

        self.health.set_ready(false).await;
        self.publish_status(MonitorStatus::Stopped);
        Ok(())
    }

    /// Run one monitoring cycle and publish its results
    ///
    /// A sampling failure skips the cycle: nothing is stored or published.
    pub async fn run_cycle(&mut self) -> Result<Arc<CycleBundle>, SamplingError> {
        let cycle_start = Instant::now();
        self.retry_pending_records().await;

        let sample_start = Instant::now();
        let snapshot = match self.sampler.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.metrics.inc_sampling_errors();
                self.logger.log_sampling_failure(
                    &e.to_string(),
                    self.consecutive_failures,
                    self.config.max_consecutive_failures,
                );
                self.health
                    .set_degraded(Component::Sampler, e.to_string())
                    .await;
                return Err(e);
            }
        };
        self.metrics
            .observe_sample_latency(sample_start.elapsed().as_secs_f64());
        self.consecutive_failures = 0;

        if snapshot.is_degraded() {
            self.metrics.inc_degraded_samples();
            let unavailable: Vec<&str> = snapshot.unavailable().iter().map(|f| f.name()).collect();
            self.health
                .set_degraded(
                    Component::Sampler,
                    format!("unavailable: {}", unavailable.join(", ")),
                )
                .await;
        } else {
            self.health.set_healthy(Component::Sampler).await;
        }

        let snapshot = self.history.append(snapshot);
        self.metrics.set_history_size(self.history.len());

        let output = self.detector.observe(&snapshot, &self.history);
        self.metrics.record_detection(&output.detection);
        if output.retrained {
            self.metrics.inc_retrains();
            self.logger
                .log_retrain(self.detector.phase(), self.detector.observed());
            self.health.set_healthy(Component::Detector).await;
        }

        let recommendations = self.allocator.evaluate(&snapshot, &self.history);
        let maintenance = self.maintenance.assess(&snapshot);
        // Ranked over the same window the allocator sustains usage over
        let top_consumers =
            ConsumerRanking::from_history(&self.history, self.config.sustain_window);

        let mut log_warning = None;
        let recorded = output.event.is_some();
        if let Some(event) = output.event {
            self.logger.log_anomaly(&event);
            if let Err(e) = self.anomaly_log.record(event) {
                self.metrics.inc_log_write_failures();
                self.logger
                    .log_write_failure(&e.to_string(), self.anomaly_log.pending_count());
                log_warning = Some(e.to_string());
            }
        }
        let log_warning = self.update_log_health(log_warning).await;

        self.cycle += 1;
        let bundle = Arc::new(CycleBundle {
            cycle: self.cycle,
            snapshot: Arc::clone(&snapshot),
            detection: output.detection,
            recommendations,
            maintenance,
            top_consumers,
            log_warning,
        });

        self.logger.log_cycle(
            self.cycle,
            &snapshot,
            &bundle.detection,
            bundle.recommendations.len(),
        );

        // Swap the whole published state so readers never mix cycles
        let anomalies = recorded
            .then(|| Arc::new(self.anomaly_log.recent(self.config.anomaly_log.retention)));
        let latest = Arc::clone(&bundle);
        self.state_tx.send_modify(|state| {
            state.latest = Some(latest);
            if let Some(anomalies) = anomalies {
                state.anomalies = anomalies;
            }
        });

        self.metrics
            .observe_cycle_latency(cycle_start.elapsed().as_secs_f64());
        Ok(bundle)
    }

    /// Retry anomaly records that previous cycles failed to persist
    async fn retry_pending_records(&mut self) {
        if self.anomaly_log.pending_count() == 0 {
            return;
        }

        match self.anomaly_log.retry_pending() {
            Ok(written) => {
                self.logger.log_write_recovered(written);
            }
            Err(e) => {
                self.metrics.inc_log_write_failures();
                self.logger
                    .log_write_failure(&e.to_string(), self.anomaly_log.pending_count());
            }
        }
    }

    /// Reflect the pending queue in health, returning the cycle's log warning
    async fn update_log_health(&self, write_error: Option<String>) -> Option<String> {
        let pending = self.anomaly_log.pending_count();
        self.metrics.set_log_pending(pending);

        if pending == 0 {
            self.health.set_healthy(Component::AnomalyLog).await;
            return write_error;
        }

        let message = match write_error {
            Some(error) => format!("{} ({} records pending)", error, pending),
            None => format!("{} anomaly records pending write", pending),
        };
        self.health
            .set_degraded(Component::AnomalyLog, message.clone())
            .await;
        Some(message)
    }

    /// Stop after exhausting the sampling failure budget
    async fn fail(&mut self, last_error: SamplingError) -> MonitorError {
        let error = MonitorError::ConsecutiveSamplingFailures {
            failures: self.consecutive_failures,
            last_error: last_error.to_string(),
        };

        self.logger.log_stopped(&error.to_string());
        self.health
            .set_unhealthy(Component::Sampler, last_error.to_string())
            .await;
        self.health
            .set_unhealthy(Component::Monitor, error.to_string())
            .await;
        self.health.set_ready(false).await;
        self.publish_status(MonitorStatus::Failed {
            reason: last_error.to_string(),
            consecutive_failures: self.consecutive_failures,
        });

        error
    }

    fn publish_status(&self, status: MonitorStatus) {
        debug!(status = ?status, "Publishing monitor status");
        self.state_tx.send_modify(|state| state.status = status);
    }
}

/// Builder for creating the monitor loop
pub struct MonitorLoopBuilder {
    config: MonitorConfig,
    sampler: Option<Box<dyn MetricSampler>>,
    anomaly_log: Option<AnomalyLog>,
    health: Option<HealthRegistry>,
    metrics: Option<MonitorMetrics>,
    logger: Option<StructuredLogger>,
}

impl MonitorLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: MonitorConfig::default(),
            sampler: None,
            anomaly_log: None,
            health: None,
            metrics: None,
            logger: None,
        }
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the metric sampler
    pub fn sampler(mut self, sampler: Box<dyn MetricSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Set the anomaly log (defaults to an in-memory log)
    pub fn anomaly_log(mut self, log: AnomalyLog) -> Self {
        self.anomaly_log = Some(log);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: MonitorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the monitor loop
    pub fn build(self) -> Result<(MonitorLoop, MonitorHandle), MonitorError> {
        let sampler = self
            .sampler
            .ok_or(MonitorError::MissingComponent("sampler"))?;
        let retention = self.config.anomaly_log.retention;

        info!(
            interval_secs = self.config.interval_secs,
            history_capacity = self.config.history_capacity,
            "Building monitor loop"
        );

        MonitorLoop::new(
            self.config,
            sampler,
            self.anomaly_log
                .unwrap_or_else(|| AnomalyLog::in_memory(retention)),
            self.health.unwrap_or_default(),
            self.metrics.unwrap_or_default(),
            self.logger
                .unwrap_or_else(|| StructuredLogger::new("localhost")),
        )
    }
}

impl Default for MonitorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
