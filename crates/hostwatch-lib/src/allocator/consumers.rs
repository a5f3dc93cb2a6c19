//! Top consumer rankings over the history window

use crate::history::HistoryStore;
use crate::models::Resource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One process's usage of a resource across the history window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerUsage {
    pub pid: u32,
    pub name: String,
    /// Mean usage over the snapshots the process appeared in
    pub average: f64,
    pub peak: f64,
    /// Snapshots in which the process was among the top processes
    pub samples: usize,
}

/// Processes ranked by usage of each resource, heaviest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRanking {
    pub cpu: Vec<ConsumerUsage>,
    pub memory: Vec<ConsumerUsage>,
    pub disk: Vec<ConsumerUsage>,
}

#[derive(Default)]
struct Accumulator {
    total: f64,
    peak: f64,
    samples: usize,
}

impl ConsumerRanking {
    /// Rank every process seen in the last `window` snapshots of `history`
    ///
    /// A process is identified by pid and name, so a recycled pid running a
    /// different program is ranked separately.
    pub fn from_history(history: &HistoryStore, window: usize) -> Self {
        let snapshots = history.recent(window);
        let mut ranking = Self::default();

        for resource in Resource::ALL {
            let mut usage: HashMap<(u32, &str), Accumulator> = HashMap::new();
            for snapshot in &snapshots {
                for process in &snapshot.top_processes {
                    let value = process.usage(resource);
                    let entry = usage.entry((process.pid, process.name.as_str())).or_default();
                    entry.total += value;
                    entry.peak = entry.peak.max(value);
                    entry.samples += 1;
                }
            }

            let mut ranked: Vec<ConsumerUsage> = usage
                .into_iter()
                .map(|((pid, name), acc)| ConsumerUsage {
                    pid,
                    name: name.to_string(),
                    average: acc.total / acc.samples as f64,
                    peak: acc.peak,
                    samples: acc.samples,
                })
                .collect();
            ranked.sort_by(|a, b| {
                b.average
                    .partial_cmp(&a.average)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.pid.cmp(&b.pid))
            });

            *ranking.for_resource_mut(resource) = ranked;
        }

        ranking
    }

    pub fn for_resource(&self, resource: Resource) -> &[ConsumerUsage] {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
            Resource::Disk => &self.disk,
        }
    }

    fn for_resource_mut(&mut self, resource: Resource) -> &mut Vec<ConsumerUsage> {
        match resource {
            Resource::Cpu => &mut self.cpu,
            Resource::Memory => &mut self.memory,
            Resource::Disk => &mut self.disk,
        }
    }

    /// The `k` heaviest consumers of `resource`
    pub fn top(&self, resource: Resource, k: usize) -> Vec<ConsumerUsage> {
        self.for_resource(resource).iter().take(k).cloned().collect()
    }
}
