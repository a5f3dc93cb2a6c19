//! Host metric sampling
//!
//! A sampler takes one instantaneous snapshot of host-wide CPU, memory, disk,
//! swap and network usage plus the heaviest processes. Subsystems that cannot
//! be read leave their fields unavailable instead of failing the sample; only
//! a failure that leaves nothing usable is a [`SamplingError`].

mod simulated;
mod system;

pub use simulated::SimulatedSampler;
pub use system::SystemSampler;

use crate::error::SamplingError;
use crate::models::{ProcessUsage, Resource, Snapshot};
use std::collections::HashSet;

pub use async_trait::async_trait;

/// Source of host snapshots
#[async_trait]
pub trait MetricSampler: Send + Sync {
    /// Take one snapshot of current host usage
    async fn sample(&mut self) -> Result<Snapshot, SamplingError>;
}

/// Clamp a percentage into [0, 100], treating non-finite readings as unavailable
pub fn clamp_percent(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 100.0))
}

/// `part / whole` as a percentage, unavailable when `whole` is zero
pub fn percent_of(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        return None;
    }
    clamp_percent(part as f64 / whole as f64 * 100.0)
}

/// Keep the `limit` heaviest processes for every resource
///
/// The result is the union of the top `limit` by CPU, by memory and by disk
/// throughput, without duplicates, ordered by CPU usage descending.
pub fn select_top_processes(processes: Vec<ProcessUsage>, limit: usize) -> Vec<ProcessUsage> {
    let mut keep = HashSet::new();
    for resource in Resource::ALL {
        let mut ranked: Vec<&ProcessUsage> = processes.iter().collect();
        ranked.sort_by(|a, b| {
            b.usage(resource)
                .partial_cmp(&a.usage(resource))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        keep.extend(ranked.into_iter().take(limit).map(|p| p.pid));
    }

    let mut selected: Vec<ProcessUsage> = processes
        .into_iter()
        .filter(|p| keep.remove(&p.pid))
        .collect();
    selected.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(pid: u32, cpu: f64, memory: f64, disk: f64) -> ProcessUsage {
        ProcessUsage {
            pid,
            name: format!("proc-{}", pid),
            cpu_percent: cpu,
            memory_percent: memory,
            disk_bytes_per_sec: disk,
        }
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(42.0), Some(42.0));
        assert_eq!(clamp_percent(-3.0), Some(0.0));
        assert_eq!(clamp_percent(130.0), Some(100.0));
        assert_eq!(clamp_percent(f64::NAN), None);
        assert_eq!(clamp_percent(f64::INFINITY), None);
    }

    #[test]
    fn test_percent_of_zero_total_is_unavailable() {
        assert_eq!(percent_of(50, 200), Some(25.0));
        assert_eq!(percent_of(5, 0), None);
    }

    #[test]
    fn test_select_top_processes_unions_resources() {
        let processes = vec![
            process(1, 90.0, 1.0, 0.0),
            process(2, 50.0, 2.0, 0.0),
            process(3, 1.0, 60.0, 0.0),
            process(4, 0.5, 0.5, 5_000_000.0),
            process(5, 0.1, 0.1, 0.0),
        ];

        let selected = select_top_processes(processes, 1);
        let pids: Vec<u32> = selected.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![1, 3, 4]);
    }

    #[test]
    fn test_select_top_processes_no_duplicates() {
        let processes = vec![process(1, 90.0, 90.0, 90.0), process(2, 1.0, 1.0, 1.0)];
        let selected = select_top_processes(processes, 5);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].pid, 1);
    }
}
