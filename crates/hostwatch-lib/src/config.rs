//! Monitor configuration
//!
//! All values are fixed once the monitor loop starts. [`MonitorConfig::validate`]
//! must pass before a loop can be built.

use crate::anomaly::SeverityCuts;
use crate::error::ConfigError;
use crate::models::Resource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between monitoring cycles
    pub interval_secs: u64,
    /// Maximum snapshots retained in history (default: 1 hour at 5s)
    pub history_capacity: usize,
    /// Consecutive skipped cycles tolerated before the loop stops
    pub max_consecutive_failures: u32,
    /// Processes kept per resource ranking in each snapshot
    pub process_limit: usize,
    /// History snapshots averaged for the sustained-usage figure and consumer rankings
    pub sustain_window: usize,
    pub detector: DetectorConfig,
    pub severity: SeverityCuts,
    pub thresholds: ResourceThresholds,
    pub maintenance: MaintenanceThresholds,
    pub anomaly_log: AnomalyLogConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            history_capacity: 720,
            max_consecutive_failures: 5,
            process_limit: 5,
            sustain_window: 12,
            detector: DetectorConfig::default(),
            severity: SeverityCuts::default(),
            thresholds: ResourceThresholds::default(),
            maintenance: MaintenanceThresholds::default(),
            anomaly_log: AnomalyLogConfig::default(),
        }
    }
}

/// Isolation-forest detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Snapshots observed before the first baseline is fitted
    pub warmup_count: usize,
    /// Cycles between wholesale baseline refits
    pub retrain_interval: usize,
    /// Most recent history snapshots used for each fit, at least `warmup_count`
    pub training_window: usize,
    /// Trees in the ensemble (T)
    pub num_trees: usize,
    /// Points drawn for each tree (S)
    pub subsample_size: usize,
    /// Fixed RNG seed for reproducible baselines
    pub seed: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            warmup_count: 120,
            retrain_interval: 60,
            training_window: 720,
            num_trees: 100,
            subsample_size: 64,
            seed: None,
        }
    }
}

/// Per-resource thresholds for optimization recommendations (percent)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu: 80.0,
            memory: 85.0,
            disk: 85.0,
        }
    }
}

impl ResourceThresholds {
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
            Resource::Disk => self.disk,
        }
    }
}

/// Thresholds for predictive-maintenance notices (percent)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceThresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for MaintenanceThresholds {
    fn default() -> Self {
        Self {
            cpu: 95.0,
            memory: 90.0,
            disk: 90.0,
        }
    }
}

impl MaintenanceThresholds {
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
            Resource::Disk => self.disk,
        }
    }
}

/// Anomaly log persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyLogConfig {
    /// JSON-lines file; `None` keeps events in memory only
    pub path: Option<PathBuf>,
    /// Events kept in memory for `recent` queries
    pub retention: usize,
    /// Unwritten events held for retry before the oldest are dropped
    pub max_pending: usize,
    /// Write attempts per cycle before giving up until the next one
    pub write_attempts: u32,
}

impl Default for AnomalyLogConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("hostwatch-anomalies.jsonl")),
            retention: 256,
            max_pending: 1024,
            write_attempts: 3,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Check every startup rule, returning the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("interval_secs", self.interval_secs as usize)?;
        positive("detector.warmup_count", self.detector.warmup_count)?;
        positive("detector.retrain_interval", self.detector.retrain_interval)?;
        positive("detector.num_trees", self.detector.num_trees)?;
        positive("max_consecutive_failures", self.max_consecutive_failures as usize)?;
        positive("process_limit", self.process_limit)?;
        positive("sustain_window", self.sustain_window)?;
        positive("anomaly_log.retention", self.anomaly_log.retention)?;
        positive("anomaly_log.write_attempts", self.anomaly_log.write_attempts as usize)?;

        let detector = &self.detector;
        if detector.subsample_size <= 1 || detector.subsample_size > detector.warmup_count {
            return Err(ConfigError::SubsampleSize {
                subsample: detector.subsample_size,
                warmup: detector.warmup_count,
            });
        }

        self.severity.validate()?;

        for (field, value) in [
            ("thresholds.cpu", self.thresholds.cpu),
            ("thresholds.memory", self.thresholds.memory),
            ("thresholds.disk", self.thresholds.disk),
            ("maintenance.cpu", self.maintenance.cpu),
            ("maintenance.memory", self.maintenance.memory),
            ("maintenance.disk", self.maintenance.disk),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { field, value });
            }
        }

        if self.history_capacity < detector.warmup_count {
            return Err(ConfigError::HistoryCapacity {
                capacity: self.history_capacity,
                warmup: detector.warmup_count,
            });
        }

        // Every refit sees at least as much history as the first fit did
        if detector.training_window < detector.warmup_count
            || detector.training_window > self.history_capacity
        {
            return Err(ConfigError::TrainingWindow {
                window: detector.training_window,
                min: detector.warmup_count,
                max: self.history_capacity,
            });
        }

        Ok(())
    }
}

fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::MustBePositive { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(MonitorConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = MonitorConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MustBePositive {
                field: "interval_secs"
            })
        );
    }

    #[test]
    fn test_subsample_larger_than_warmup_rejected() {
        let mut config = MonitorConfig::default();
        config.detector.subsample_size = config.detector.warmup_count + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SubsampleSize { .. })
        ));

        config.detector.subsample_size = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SubsampleSize { .. })
        ));
    }

    #[test]
    fn test_unordered_severity_cuts_rejected() {
        let mut config = MonitorConfig::default();
        config.severity = SeverityCuts {
            low: 0.6,
            mid: 0.5,
            high: 0.7,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SeverityCuts { .. })
        ));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = MonitorConfig::default();
        config.thresholds.disk = 120.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                field: "thresholds.disk",
                value: 120.0
            })
        );
    }

    #[test]
    fn test_history_smaller_than_warmup_rejected() {
        let mut config = MonitorConfig::default();
        config.history_capacity = config.detector.warmup_count - 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HistoryCapacity { .. })
        ));
    }

    #[test]
    fn test_training_window_bounds() {
        let mut config = MonitorConfig::default();
        config.detector.training_window = config.history_capacity + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TrainingWindow { .. })
        ));
    }

    #[test]
    fn test_training_window_shorter_than_warmup_rejected() {
        let mut config = MonitorConfig::default();
        config.detector.warmup_count = 120;
        config.detector.training_window = 64;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TrainingWindow {
                window: 64,
                min: 120,
                max: config.history_capacity
            })
        );

        config.detector.training_window = 120;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"interval_secs": 10, "detector": {"num_trees": 50}}"#)
                .unwrap();
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.detector.num_trees, 50);
        assert_eq!(config.detector.warmup_count, 120);
        assert_eq!(config.thresholds.cpu, 80.0);
    }
}
