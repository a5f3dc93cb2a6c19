//! Anomaly detector state machine
//!
//! The detector warms up on the first `warmup_count` snapshots, fits a
//! baseline from history, and from then on scores every snapshot against it.
//! Every `retrain_interval` scored cycles the baseline is refitted wholesale
//! from the most recent `training_window` snapshots. A freshly fitted baseline
//! only takes effect on the following cycle; the current snapshot is always
//! scored by the baseline that was active when the cycle began.

use super::baseline::{Baseline, MetricDeviation};
use super::severity::{Severity, SeverityCuts};
use crate::config::DetectorConfig;
use crate::history::HistoryStore;
use crate::models::Snapshot;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Detector lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorPhase {
    WarmingUp,
    Ready,
}

/// Outcome of scoring one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Detection {
    /// Not enough snapshots yet; nothing can be reported
    WarmingUp { observed: usize, required: usize },
    /// Scored against the active baseline; `severity` is `None` below the low cut
    Scored {
        score: f64,
        severity: Option<Severity>,
    },
}

impl Detection {
    pub fn score(&self) -> Option<f64> {
        match self {
            Detection::WarmingUp { .. } => None,
            Detection::Scored { score, .. } => Some(*score),
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            Detection::WarmingUp { .. } => None,
            Detection::Scored { severity, .. } => *severity,
        }
    }

    pub fn is_anomaly(&self) -> bool {
        self.severity().is_some()
    }
}

/// An anomalous snapshot, as recorded in the anomaly log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub timestamp: DateTime<Utc>,
    pub anomaly_score: f64,
    pub severity: Severity,
    /// Available metrics ranked by deviation from the baseline, largest first
    pub contributing_metrics: Vec<MetricDeviation>,
    pub snapshot_ref: Snapshot,
}

/// Everything the detector produced for one cycle
#[derive(Debug, Clone)]
pub struct DetectorOutput {
    pub detection: Detection,
    pub event: Option<AnomalyEvent>,
    /// A new baseline was fitted this cycle and applies from the next one
    pub retrained: bool,
}

/// Isolation-forest anomaly detector
pub struct AnomalyDetector {
    config: DetectorConfig,
    cuts: SeverityCuts,
    baseline: Option<Arc<Baseline>>,
    observed: usize,
    cycles_since_fit: usize,
    rng: StdRng,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig, cuts: SeverityCuts) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            cuts,
            baseline: None,
            observed: 0,
            cycles_since_fit: 0,
            rng,
        }
    }

    pub fn phase(&self) -> DetectorPhase {
        if self.baseline.is_some() {
            DetectorPhase::Ready
        } else {
            DetectorPhase::WarmingUp
        }
    }

    /// The baseline currently used for scoring
    pub fn baseline(&self) -> Option<Arc<Baseline>> {
        self.baseline.clone()
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Score `snapshot` and advance the state machine
    ///
    /// `snapshot` must already be appended to `history`; it is part of the
    /// training window of any baseline fitted during this call.
    pub fn observe(&mut self, snapshot: &Snapshot, history: &HistoryStore) -> DetectorOutput {
        self.observed = self.observed.saturating_add(1);

        let Some(baseline) = self.baseline.clone() else {
            let retrained = self.observed >= self.config.warmup_count && self.refit(history);
            return DetectorOutput {
                detection: Detection::WarmingUp {
                    observed: self.observed,
                    required: self.config.warmup_count,
                },
                event: None,
                retrained,
            };
        };

        let score = baseline.score(snapshot);
        let severity = self.cuts.classify(score);
        let event = severity.map(|severity| AnomalyEvent {
            timestamp: snapshot.timestamp,
            anomaly_score: score,
            severity,
            contributing_metrics: baseline.contributing_metrics(snapshot),
            snapshot_ref: snapshot.clone(),
        });

        self.cycles_since_fit += 1;
        let retrained = self.cycles_since_fit >= self.config.retrain_interval && self.refit(history);

        DetectorOutput {
            detection: Detection::Scored { score, severity },
            event,
            retrained,
        }
    }

    /// Fit a replacement baseline from the training window
    fn refit(&mut self, history: &HistoryStore) -> bool {
        let window = history.recent(self.config.training_window);
        let fitted = Baseline::fit(
            window.iter().map(|snapshot| &**snapshot),
            self.config.num_trees,
            self.config.subsample_size,
            &mut self.rng,
        );

        match fitted {
            Some(baseline) => {
                let first = self.baseline.is_none();
                info!(
                    trained_on = baseline.trained_on(),
                    trained_at = %baseline.trained_at(),
                    num_trees = baseline.num_trees(),
                    initial = first,
                    "Fitted anomaly baseline"
                );
                self.baseline = Some(Arc::new(baseline));
                self.cycles_since_fit = 0;
                true
            }
            None if self.baseline.is_some() => {
                warn!(
                    window = window.len(),
                    "Not enough history to refit baseline, keeping current one"
                );
                self.cycles_since_fit = 0;
                false
            }
            None => {
                debug!(window = window.len(), "Not enough history to fit baseline yet");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config(warmup: usize) -> DetectorConfig {
        DetectorConfig {
            warmup_count: warmup,
            retrain_interval: 10,
            training_window: 64,
            num_trees: 100,
            subsample_size: warmup.min(32),
            seed: Some(7),
        }
    }

    fn snapshot(i: i64, cpu: f64) -> Snapshot {
        let mut s = Snapshot::empty(Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(i * 5));
        s.cpu_percent = Some(cpu);
        s.memory_percent = Some(40.0);
        s.disk_percent = Some(55.0);
        s
    }

    /// Feed `count` snapshots produced by `cpu_at`, returning the outputs
    fn feed(
        detector: &mut AnomalyDetector,
        history: &mut HistoryStore,
        range: std::ops::Range<i64>,
        cpu_at: impl Fn(i64) -> f64,
    ) -> Vec<DetectorOutput> {
        range
            .map(|i| {
                let stored = history.append(snapshot(i, cpu_at(i)));
                detector.observe(&stored, history)
            })
            .collect()
    }

    #[test]
    fn test_never_reports_during_warmup() {
        let mut detector = AnomalyDetector::new(config(20), SeverityCuts::default());
        let mut history = HistoryStore::new(100);

        // Wildly varying input still produces nothing
        let outputs = feed(&mut detector, &mut history, 0..19, |i| if i % 2 == 0 { 0.0 } else { 100.0 });
        for output in outputs {
            assert!(matches!(output.detection, Detection::WarmingUp { .. }));
            assert!(output.event.is_none());
        }
        assert_eq!(detector.phase(), DetectorPhase::WarmingUp);
    }

    #[test]
    fn test_baseline_applies_from_cycle_after_warmup() {
        let mut detector = AnomalyDetector::new(config(20), SeverityCuts::default());
        let mut history = HistoryStore::new(100);

        let outputs = feed(&mut detector, &mut history, 0..21, |i| 20.0 + (i % 5) as f64 * 0.5);

        let last_warmup = &outputs[19];
        assert_eq!(
            last_warmup.detection,
            Detection::WarmingUp {
                observed: 20,
                required: 20
            }
        );
        assert!(last_warmup.retrained);
        assert_eq!(detector.phase(), DetectorPhase::Ready);
        assert!(matches!(outputs[20].detection, Detection::Scored { .. }));
    }

    #[test]
    fn test_constant_baseline_never_flags() {
        let mut detector = AnomalyDetector::new(config(30), SeverityCuts::default());
        let mut history = HistoryStore::new(200);

        let outputs = feed(&mut detector, &mut history, 0..100, |_| 20.0);
        for output in &outputs[30..] {
            let score = output.detection.score().unwrap();
            assert!(score < SeverityCuts::default().low);
            assert!(output.event.is_none());
        }
    }

    #[test]
    fn test_cpu_spike_is_high_severity() {
        let mut detector = AnomalyDetector::new(config(32), SeverityCuts::default());
        let mut history = HistoryStore::new(200);

        feed(&mut detector, &mut history, 0..40, |i| 20.0 + (i % 5) as f64 * 0.5);
        assert_eq!(detector.phase(), DetectorPhase::Ready);

        let spike = history.append(snapshot(40, 100.0));
        let output = detector.observe(&spike, &history);

        let score = output.detection.score().unwrap();
        assert!(score >= SeverityCuts::default().high, "spike score {}", score);
        assert_eq!(output.detection.severity(), Some(Severity::High));

        let event = output.event.unwrap();
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.timestamp, spike.timestamp);
        assert_eq!(event.snapshot_ref, *spike);
        assert_eq!(event.contributing_metrics[0].metric, crate::models::Feature::CpuPercent);
    }

    #[test]
    fn test_cpu_spike_is_high_when_every_metric_jitters() {
        use rand::Rng;

        fn noisy(rng: &mut StdRng, i: i64, cpu: f64) -> Snapshot {
            let mut s = snapshot(i, cpu);
            s.memory_percent = Some(40.0 + rng.gen_range(0.0..2.0));
            s.disk_percent = Some(55.0 + rng.gen_range(0.0..0.5));
            s.swap_percent = Some(5.0 + rng.gen_range(0.0..1.0));
            s.network_bytes_sent_per_sec = Some(1_000.0 + rng.gen_range(0.0..200.0));
            s.network_bytes_recv_per_sec = Some(2_000.0 + rng.gen_range(0.0..400.0));
            s.process_count = Some(200 + rng.gen_range(0..10));
            s
        }

        for seed in 0..10 {
            let cfg = DetectorConfig {
                warmup_count: 120,
                retrain_interval: 60,
                training_window: 120,
                num_trees: 100,
                subsample_size: 64,
                seed: Some(seed),
            };
            let mut detector = AnomalyDetector::new(cfg, SeverityCuts::default());
            let mut history = HistoryStore::new(200);
            let mut jitter = StdRng::seed_from_u64(1_000 + seed);

            for i in 0..130 {
                let cpu = 20.0 + jitter.gen_range(0.0..3.0);
                let stored = history.append(noisy(&mut jitter, i, cpu));
                detector.observe(&stored, &history);
            }

            let spike = history.append(noisy(&mut jitter, 130, 100.0));
            let output = detector.observe(&spike, &history);
            assert_eq!(
                output.detection.severity(),
                Some(Severity::High),
                "seed {} scored {:?}",
                seed,
                output.detection.score()
            );
        }
    }

    #[test]
    fn test_retrains_every_interval() {
        let mut detector = AnomalyDetector::new(config(20), SeverityCuts::default());
        let mut history = HistoryStore::new(100);

        let outputs = feed(&mut detector, &mut history, 0..50, |i| 20.0 + (i % 5) as f64);

        // Initial fit on cycle 20, then after 10 scored cycles each
        let retrain_cycles: Vec<usize> = outputs
            .iter()
            .enumerate()
            .filter(|(_, o)| o.retrained)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(retrain_cycles, vec![20, 30, 40, 50]);
    }

    #[test]
    fn test_retrain_does_not_affect_current_score() {
        let cfg = config(20);
        let mut detector = AnomalyDetector::new(cfg.clone(), SeverityCuts::default());
        let mut history = HistoryStore::new(100);
        feed(&mut detector, &mut history, 0..29, |i| 20.0 + (i % 5) as f64);

        let before = detector.baseline().unwrap();
        let next = history.append(snapshot(29, 21.0));
        let expected = before.score(&next);

        let output = detector.observe(&next, &history);
        assert!(output.retrained);
        assert_eq!(output.detection.score(), Some(expected));
        assert!(!Arc::ptr_eq(&before, &detector.baseline().unwrap()));
    }
}
