//! Threshold-based resource optimization advice
//!
//! Recommendations are advisory only; nothing here acts on the host.

mod consumers;
mod maintenance;

pub use consumers::{ConsumerRanking, ConsumerUsage};
pub use maintenance::MaintenanceAdvisor;

use crate::config::ResourceThresholds;
use crate::history::HistoryStore;
use crate::models::{OptimizationRecommendation, Resource, Snapshot};
use std::fmt::Write;

/// Compares each snapshot against per-resource thresholds
pub struct ResourceAllocator {
    thresholds: ResourceThresholds,
    /// History snapshots averaged for the sustained-usage figure
    sustain_window: usize,
}

impl ResourceAllocator {
    pub fn new(thresholds: ResourceThresholds, sustain_window: usize) -> Self {
        Self {
            thresholds,
            sustain_window: sustain_window.max(1),
        }
    }

    /// One recommendation per resource whose value exceeds its threshold
    ///
    /// Unavailable resources are skipped, never treated as over threshold.
    pub fn evaluate(&self, snapshot: &Snapshot, history: &HistoryStore) -> Vec<OptimizationRecommendation> {
        Resource::ALL
            .into_iter()
            .filter_map(|resource| {
                let value = snapshot.resource(resource)?;
                let threshold = self.thresholds.get(resource);
                if value <= threshold {
                    return None;
                }

                let top_consumer = snapshot.top_consumer(resource).cloned();
                let sustained_average = self.sustained_average(resource, history);

                let mut condition = format!(
                    "{}={:.1} > threshold={:.1}",
                    resource.field_name(),
                    value,
                    threshold
                );
                if let Some(process) = &top_consumer {
                    let _ = write!(condition, ", top consumer: pid {} ({})", process.pid, process.name);
                }

                Some(OptimizationRecommendation {
                    resource,
                    value,
                    threshold,
                    top_consumer,
                    sustained_average,
                    sustained: sustained_average.is_some_and(|avg| avg > threshold),
                    condition,
                    advice: advice(resource).to_string(),
                })
            })
            .collect()
    }

    /// Mean of `resource` over the recent window, ignoring unavailable readings
    fn sustained_average(&self, resource: Resource, history: &HistoryStore) -> Option<f64> {
        let values: Vec<f64> = history
            .recent(self.sustain_window)
            .iter()
            .filter_map(|snapshot| snapshot.resource(resource))
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

fn advice(resource: Resource) -> &'static str {
    match resource {
        Resource::Cpu => "Lower priority of background processes and pause heavy indexing.",
        Resource::Memory => "Free caches, close unused applications, or expand swap.",
        Resource::Disk => "Limit background writes and offload logs to slower intervals.",
    }
}
