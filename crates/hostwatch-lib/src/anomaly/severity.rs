//! Severity grading of anomaly scores

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of an anomaly event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

/// Cut points mapping a score in [0, 1] to a severity
///
/// `score < low` is not an anomaly, `[low, mid)` is LOW, `[mid, high)` is
/// MEDIUM and `score >= high` is HIGH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityCuts {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl Default for SeverityCuts {
    fn default() -> Self {
        Self {
            low: 0.30,
            mid: 0.45,
            high: 0.60,
        }
    }
}

impl SeverityCuts {
    /// Require 0 < low < mid < high < 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 < self.low && self.low < self.mid && self.mid < self.high && self.high < 1.0;
        if ordered {
            Ok(())
        } else {
            Err(ConfigError::SeverityCuts {
                low: self.low,
                mid: self.mid,
                high: self.high,
            })
        }
    }

    pub fn classify(&self, score: f64) -> Option<Severity> {
        if score >= self.high {
            Some(Severity::High)
        } else if score >= self.mid {
            Some(Severity::Medium)
        } else if score >= self.low {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        let cuts = SeverityCuts {
            low: 0.3,
            mid: 0.5,
            high: 0.7,
        };

        assert_eq!(cuts.classify(0.0), None);
        assert_eq!(cuts.classify(0.299), None);
        assert_eq!(cuts.classify(0.3), Some(Severity::Low));
        assert_eq!(cuts.classify(0.5), Some(Severity::Medium));
        assert_eq!(cuts.classify(0.69), Some(Severity::Medium));
        assert_eq!(cuts.classify(0.7), Some(Severity::High));
        assert_eq!(cuts.classify(1.0), Some(Severity::High));
    }

    #[test]
    fn test_classify_is_monotone() {
        let cuts = SeverityCuts::default();
        let mut previous = None;
        for step in 0..=100 {
            let current = cuts.classify(step as f64 / 100.0);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_severity_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"HIGH\"");
        let parsed: Severity = serde_json::from_str("\"MEDIUM\"").unwrap();
        assert_eq!(parsed, Severity::Medium);
    }

    #[test]
    fn test_validate_rejects_out_of_unit_interval() {
        let cuts = SeverityCuts {
            low: 0.0,
            mid: 0.5,
            high: 0.9,
        };
        assert!(cuts.validate().is_err());

        let cuts = SeverityCuts {
            low: 0.2,
            mid: 0.5,
            high: 1.0,
        };
        assert!(cuts.validate().is_err());
        assert!(SeverityCuts::default().validate().is_ok());
    }
}
