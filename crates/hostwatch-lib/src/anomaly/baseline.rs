//! Fitted baseline of normal host behaviour
//!
//! A baseline couples the isolation forest with per-feature mean and
//! standard deviation of the snapshots it was trained on. The forest
//! produces the score; the statistics rank which metrics drove it.

use super::isolation_forest::{FeatureVector, IsolationForest};
use crate::models::{Feature, Snapshot, FEATURE_COUNT};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Deviation (in standard deviations) at which a metric counts as contributing
const CONTRIBUTION_THRESHOLD: f64 = 2.0;

/// Relative floor on the standard deviation, so near-constant metrics
/// don't produce unbounded deviations
const RELATIVE_STD_FLOOR: f64 = 0.01;

/// Absolute floor on the standard deviation
const ABSOLUTE_STD_FLOOR: f64 = 1e-6;

/// Extract the detector's feature vector from a snapshot
pub fn feature_vector(snapshot: &Snapshot) -> FeatureVector {
    let mut vector = [None; FEATURE_COUNT];
    for feature in Feature::ALL {
        vector[feature.index()] = snapshot.feature(feature);
    }
    vector
}

/// Mean and standard deviation of one feature over the training set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std_dev: f64,
    /// Training snapshots where the feature was available
    pub count: usize,
}

impl FeatureStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;

        // Two-pass sample variance
        let std_dev = if count > 1 {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            mean,
            std_dev,
            count,
        })
    }

    /// Signed distance from the mean in (floored) standard deviations
    pub fn deviation(&self, value: f64) -> f64 {
        let scale = self
            .std_dev
            .max(self.mean.abs() * RELATIVE_STD_FLOOR)
            .max(ABSOLUTE_STD_FLOOR);
        (value - self.mean) / scale
    }
}

/// One metric's departure from the baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDeviation {
    pub metric: Feature,
    pub value: f64,
    pub baseline_mean: f64,
    /// Signed deviation in standard deviations
    pub deviation: f64,
}

/// Fitted anomaly-scoring model
#[derive(Debug, Clone)]
pub struct Baseline {
    forest: IsolationForest,
    stats: [Option<FeatureStats>; FEATURE_COUNT],
    trained_on: usize,
    trained_at: DateTime<Utc>,
}

impl Baseline {
    /// Fit a baseline on `snapshots`
    ///
    /// Returns `None` when fewer than two snapshots are supplied.
    pub fn fit<'a, I, R>(snapshots: I, num_trees: usize, subsample_size: usize, rng: &mut R) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Snapshot>,
        R: Rng,
    {
        let vectors: Vec<FeatureVector> = snapshots.into_iter().map(feature_vector).collect();
        let forest = IsolationForest::fit(&vectors, num_trees, subsample_size, rng)?;

        let mut stats = [None; FEATURE_COUNT];
        for (index, slot) in stats.iter_mut().enumerate() {
            let values: Vec<f64> = vectors.iter().filter_map(|v| v[index]).collect();
            *slot = FeatureStats::from_values(&values);
        }

        Some(Self {
            forest,
            stats,
            trained_on: vectors.len(),
            trained_at: Utc::now(),
        })
    }

    /// Anomaly score of `snapshot` in [0, 1]
    pub fn score(&self, snapshot: &Snapshot) -> f64 {
        self.forest.score(&feature_vector(snapshot))
    }

    /// Available metrics ranked by absolute deviation from the baseline
    ///
    /// Metrics at or beyond the contribution threshold are returned; when none
    /// reach it the single largest deviation is returned instead.
    pub fn contributing_metrics(&self, snapshot: &Snapshot) -> Vec<MetricDeviation> {
        let mut deviations: Vec<MetricDeviation> = Feature::ALL
            .into_iter()
            .filter_map(|feature| {
                let value = snapshot.feature(feature)?;
                let stats = self.stats[feature.index()]?;
                Some(MetricDeviation {
                    metric: feature,
                    value,
                    baseline_mean: stats.mean,
                    deviation: stats.deviation(value),
                })
            })
            .collect();

        deviations.sort_by(|a, b| {
            b.deviation
                .abs()
                .partial_cmp(&a.deviation.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let significant = deviations
            .iter()
            .take_while(|d| d.deviation.abs() >= CONTRIBUTION_THRESHOLD)
            .count();
        deviations.truncate(significant.max(1));
        deviations
    }

    pub fn stats(&self, feature: Feature) -> Option<FeatureStats> {
        self.stats[feature.index()]
    }

    pub fn trained_on(&self) -> usize {
        self.trained_on
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn num_trees(&self) -> usize {
        self.forest.num_trees()
    }
}
