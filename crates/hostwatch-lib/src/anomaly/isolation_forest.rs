//! Isolation forest scoring
//!
//! An ensemble of random partitioning trees, each grown on a random
//! subsample of the training data. Points that are isolated after few
//! splits are anomalous; the score compares the average isolation depth of a
//! point with the expected depth for a subsample of the same size.
//!
//! Unavailable feature values (`None`) never take part in partitioning:
//! training points missing the split feature are passed to both children,
//! and a scored point missing it averages the path lengths of both subtrees.
//!
//! A value outside the range a tree was grown on could be cut off by the
//! very first split if the tree were regrown with it. Each tree keeps its
//! subsample's range for every varying feature and treats an excursion on
//! any of them as possibly isolated at the root, whichever feature the root
//! happens to split on.

use crate::models::FEATURE_COUNT;
use rand::seq::index;
use rand::Rng;

/// Feature values in [`crate::models::Feature::ALL`] order; `None` is unavailable
pub type FeatureVector = [Option<f64>; FEATURE_COUNT];

/// Euler-Mascheroni constant, used to approximate harmonic numbers
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful search in a binary search tree
/// built from `n` points: c(n) = 2H(n-1) - 2(n-1)/n.
pub fn expected_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        /// Observed range of `feature` among the points at this node
        low: f64,
        high: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A single random partitioning tree
#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
    /// Range of every feature that varies in the subsample
    bounds: [Option<(f64, f64)>; FEATURE_COUNT],
}

impl IsolationTree {
    fn grow<R: Rng>(points: &[&FeatureVector], max_depth: usize, rng: &mut R) -> Self {
        let mut bounds = [None; FEATURE_COUNT];
        for (feature, bound) in bounds.iter_mut().enumerate() {
            *bound = observed_range(points, feature).filter(|(low, high)| low < high);
        }

        Self {
            root: grow_node(points, 0, max_depth, rng),
            bounds,
        }
    }

    fn path_length(&self, point: &FeatureVector) -> f64 {
        let isolated = self.root_isolation(point);
        isolated + (1.0 - isolated) * node_path_length(&self.root, point, 0)
    }

    /// Chance that `point` is cut off by the first split of a tree regrown with it
    ///
    /// Each feature the point falls outside of contributes independently;
    /// constant features never do, since no split could be drawn on them.
    fn root_isolation(&self, point: &FeatureVector) -> f64 {
        let retained: f64 = self
            .bounds
            .iter()
            .zip(point.iter())
            .filter_map(|(bound, value)| Some(excursion(bound.as_ref()?, (*value)?)))
            .map(|isolated| 1.0 - isolated)
            .product();
        1.0 - retained
    }
}

/// Fraction of the range widened to include `value` that lies outside `(low, high)`
fn excursion(&(low, high): &(f64, f64), value: f64) -> f64 {
    if value < low {
        (low - value) / (high - value)
    } else if value > high {
        (value - high) / (value - low)
    } else {
        0.0
    }
}

fn grow_node<R: Rng>(
    points: &[&FeatureVector],
    depth: usize,
    max_depth: usize,
    rng: &mut R,
) -> Node {
    if points.len() <= 1 || depth >= max_depth {
        return Node::Leaf { size: points.len() };
    }

    // Only features that still vary at this node can partition it
    let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
        .filter_map(|feature| {
            observed_range(points, feature)
                .filter(|(low, high)| low < high)
                .map(|(low, high)| (feature, low, high))
        })
        .collect();

    if candidates.is_empty() {
        return Node::Leaf { size: points.len() };
    }

    let (feature, low, high) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(low..high);

    let mut left = Vec::with_capacity(points.len());
    let mut right = Vec::with_capacity(points.len());
    for point in points {
        match point[feature] {
            Some(value) if value <= threshold => left.push(*point),
            Some(_) => right.push(*point),
            None => {
                left.push(*point);
                right.push(*point);
            }
        }
    }

    Node::Split {
        feature,
        threshold,
        low,
        high,
        left: Box::new(grow_node(&left, depth + 1, max_depth, rng)),
        right: Box::new(grow_node(&right, depth + 1, max_depth, rng)),
    }
}

fn observed_range(points: &[&FeatureVector], feature: usize) -> Option<(f64, f64)> {
    points
        .iter()
        .filter_map(|point| point[feature])
        .fold(None, |range, value| match range {
            None => Some((value, value)),
            Some((low, high)) => Some((low.min(value), high.max(value))),
        })
}

fn node_path_length(node: &Node, point: &FeatureVector, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + expected_path_length(*size),
        Node::Split {
            feature,
            threshold,
            low,
            high,
            left,
            right,
        } => match point[*feature] {
            None => {
                0.5 * (node_path_length(left, point, depth + 1)
                    + node_path_length(right, point, depth + 1))
            }
            Some(value) => {
                let child = if value <= *threshold { left } else { right };
                let continued = node_path_length(child, point, depth + 1);

                // Excursions at the root are already covered by the tree bounds
                let isolated = if depth == 0 {
                    0.0
                } else {
                    excursion(&(*low, *high), value)
                };

                isolated * (depth + 1) as f64 + (1.0 - isolated) * continued
            }
        },
    }
}

/// A fitted isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    subsample_size: usize,
    normaliser: f64,
}

impl IsolationForest {
    /// Grow `num_trees` trees over subsamples of `subsample_size` points
    ///
    /// Returns `None` when fewer than two training points are supplied.
    pub fn fit<R: Rng>(
        samples: &[FeatureVector],
        num_trees: usize,
        subsample_size: usize,
        rng: &mut R,
    ) -> Option<Self> {
        if samples.len() < 2 || num_trees == 0 {
            return None;
        }

        let subsample_size = subsample_size.clamp(2, samples.len());
        let max_depth = (subsample_size as f64).log2().ceil() as usize;

        let trees = (0..num_trees)
            .map(|_| {
                let subsample: Vec<&FeatureVector> =
                    index::sample(rng, samples.len(), subsample_size)
                        .into_iter()
                        .map(|i| &samples[i])
                        .collect();
                IsolationTree::grow(&subsample, max_depth, rng)
            })
            .collect();

        Some(Self {
            trees,
            subsample_size,
            normaliser: expected_path_length(subsample_size),
        })
    }

    /// Average isolation depth of `point` across the ensemble
    pub fn average_path_length(&self, point: &FeatureVector) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.path_length(point)).sum();
        total / self.trees.len() as f64
    }

    /// Anomaly score in [0, 1]
    ///
    /// The classic isolation score `s = 2^(-E[h]/c(S))` sits at 0.5 for a
    /// point isolated at the expected depth. It is rescaled so that such
    /// points, and anything deeper, score 0 and points isolated immediately
    /// approach 1.
    pub fn score(&self, point: &FeatureVector) -> f64 {
        if self.normaliser <= 0.0 {
            return 0.0;
        }
        let raw = 2f64.powf(-self.average_path_length(point) / self.normaliser);
        (2.0 * raw - 1.0).clamp(0.0, 1.0)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn subsample_size(&self) -> usize {
        self.subsample_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn vector(cpu: f64, memory: f64) -> FeatureVector {
        let mut v = [Some(10.0); FEATURE_COUNT];
        v[0] = Some(cpu);
        v[1] = Some(memory);
        v
    }

    #[test]
    fn test_expected_path_length_values() {
        assert_eq!(expected_path_length(1), 0.0);
        assert_eq!(expected_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((expected_path_length(256) - 10.24).abs() < 0.05);
    }

    #[test]
    fn test_fit_requires_two_points() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(IsolationForest::fit(&[vector(1.0, 1.0)], 10, 8, &mut rng).is_none());
        assert!(IsolationForest::fit(&[], 10, 8, &mut rng).is_none());
    }

    #[test]
    fn test_subsample_clamped_to_training_size() {
        let mut rng = StdRng::seed_from_u64(1);
        let samples: Vec<_> = (0..10).map(|i| vector(i as f64, 1.0)).collect();
        let forest = IsolationForest::fit(&samples, 5, 64, &mut rng).unwrap();
        assert_eq!(forest.subsample_size(), 10);
        assert_eq!(forest.num_trees(), 5);
    }

    #[test]
    fn test_constant_training_scores_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples = vec![vector(20.0, 40.0); 50];
        let forest = IsolationForest::fit(&samples, 20, 32, &mut rng).unwrap();

        assert_eq!(forest.score(&vector(20.0, 40.0)), 0.0);
        // No feature varies, so no tree has a split that could isolate anything
        assert_eq!(forest.score(&vector(95.0, 40.0)), 0.0);
    }

    #[test]
    fn test_outlier_scores_above_inliers() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<_> = (0..200)
            .map(|i| vector(20.0 + (i % 10) as f64 * 0.3, 40.0 + (i % 7) as f64 * 0.2))
            .collect();
        let forest = IsolationForest::fit(&samples, 100, 64, &mut rng).unwrap();

        let inlier = forest.score(&vector(21.2, 40.6));
        let outlier = forest.score(&vector(100.0, 40.6));
        assert!(outlier > inlier);
        assert!(outlier > 0.5, "outlier score {}", outlier);
        assert!(inlier < 0.3, "inlier score {}", inlier);
    }

    #[test]
    fn test_single_feature_excursion_isolated_whatever_the_root_split() {
        let mut rng = StdRng::seed_from_u64(5);
        let samples: Vec<FeatureVector> = (0..128)
            .map(|_| {
                let mut v = [None; FEATURE_COUNT];
                for (i, value) in v.iter_mut().enumerate() {
                    let centre = 20.0 + i as f64 * 10.0;
                    *value = Some(centre + rng.gen_range(0.0..3.0));
                }
                v
            })
            .collect();
        let forest = IsolationForest::fit(&samples, 100, 64, &mut rng).unwrap();

        for feature in 0..FEATURE_COUNT {
            let mut spiked = samples[0];
            spiked[feature] = Some(500.0);
            let score = forest.score(&spiked);
            assert!(score >= 0.6, "feature {} scored {}", feature, score);
        }

        let centre: FeatureVector =
            std::array::from_fn(|i| Some(20.0 + i as f64 * 10.0 + 1.5));
        assert!(forest.score(&centre) < 0.3);
    }

    #[test]
    fn test_missing_feature_is_not_imputed() {
        let mut rng = StdRng::seed_from_u64(3);
        let samples: Vec<_> = (0..100)
            .map(|i| vector(20.0 + (i % 10) as f64 * 0.3, 40.0 + (i % 7) as f64 * 0.2))
            .collect();
        let forest = IsolationForest::fit(&samples, 50, 32, &mut rng).unwrap();

        // A zero in place of the missing value would be far outside the range
        let mut missing = vector(21.0, 40.4);
        missing[1] = None;
        let mut zeroed = missing;
        zeroed[1] = Some(0.0);

        assert!(forest.score(&missing) < forest.score(&zeroed));
        assert!(forest.score(&missing) < 0.3);
    }

    #[test]
    fn test_training_points_with_missing_values() {
        let mut rng = StdRng::seed_from_u64(9);
        let samples: Vec<_> = (0..60)
            .map(|i| {
                let mut v = vector(20.0 + (i % 5) as f64, 40.0);
                if i % 3 == 0 {
                    v[0] = None;
                }
                v
            })
            .collect();
        let forest = IsolationForest::fit(&samples, 30, 32, &mut rng).unwrap();
        let score = forest.score(&vector(22.0, 40.0));
        assert!((0.0..=1.0).contains(&score));
    }
}
