//! Sampler backed by the operating system via `sysinfo`

use super::{async_trait, clamp_percent, percent_of, select_top_processes, MetricSampler};
use crate::error::SamplingError;
use crate::models::{ProcessUsage, Snapshot};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, System, SystemExt};
use tracing::debug;

/// Where process entries are listed on Linux
const PROC_ROOT: &str = "/proc";

/// Samples the local host
pub struct SystemSampler {
    system: System,
    disk_mount: PathBuf,
    process_limit: usize,
    /// Network byte totals and when they were read
    last_network: Option<(u64, u64, Instant)>,
    last_refresh: Instant,
}

impl SystemSampler {
    /// Create a sampler reporting usage of the volume mounted at `disk_mount`
    ///
    /// Everything is refreshed once up front so the first sample already has
    /// CPU and rate figures to diff against.
    pub fn new(disk_mount: impl Into<PathBuf>, process_limit: usize) -> Self {
        let system = System::new_all();
        let now = Instant::now();
        let (sent, recv) = network_totals(&system);

        Self {
            system,
            disk_mount: disk_mount.into(),
            process_limit: process_limit.max(1),
            last_network: Some((sent, recv, now)),
            last_refresh: now,
        }
    }

    fn cpu_percent(&self) -> Option<f64> {
        if self.system.cpus().is_empty() {
            return None;
        }
        clamp_percent(self.system.global_cpu_info().cpu_usage() as f64)
    }

    fn disk_percent(&self) -> Option<f64> {
        let disks = self.system.disks();
        let disk = disks
            .iter()
            .find(|disk| disk.mount_point() == self.disk_mount.as_path())
            .or_else(|| disks.iter().find(|disk| disk.mount_point() == Path::new("/")))
            .or_else(|| disks.first())?;

        let total = disk.total_space();
        percent_of(total.saturating_sub(disk.available_space()), total)
    }

    /// Sent and received bytes per second since the previous sample
    fn network_rates(&mut self, now: Instant) -> (Option<f64>, Option<f64>) {
        if self.system.networks().iter().next().is_none() {
            self.last_network = None;
            return (None, None);
        }

        let (sent, recv) = network_totals(&self.system);
        let rates = match self.last_network {
            Some((last_sent, last_recv, at)) => {
                let elapsed = now.duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    (
                        Some(sent.saturating_sub(last_sent) as f64 / elapsed),
                        Some(recv.saturating_sub(last_recv) as f64 / elapsed),
                    )
                } else {
                    (None, None)
                }
            }
            None => (None, None),
        };
        self.last_network = Some((sent, recv, now));
        rates
    }

    fn processes(&self, elapsed_secs: f64) -> Vec<ProcessUsage> {
        let cpu_count = self.system.cpus().len().max(1) as f64;
        let total_memory = self.system.total_memory();

        self.system
            .processes()
            .values()
            .map(|process| {
                let disk = process.disk_usage();
                let disk_bytes = disk.read_bytes.saturating_add(disk.written_bytes) as f64;
                ProcessUsage {
                    pid: process.pid().as_u32(),
                    name: process.name().to_string(),
                    cpu_percent: clamp_percent(process.cpu_usage() as f64 / cpu_count).unwrap_or(0.0),
                    memory_percent: percent_of(process.memory(), total_memory).unwrap_or(0.0),
                    disk_bytes_per_sec: if elapsed_secs > 0.0 {
                        disk_bytes / elapsed_secs
                    } else {
                        0.0
                    },
                }
            })
            .collect()
    }
}

/// Explain an empty process table by looking at the process listing directly
///
/// A listing that cannot be opened for lack of permission, or that opens but
/// shows no process entries (`hidepid` mounts, restricted containers), means
/// the agent is not allowed to see processes. Anything else is a query failure.
fn empty_process_table(proc_root: &Path) -> SamplingError {
    const SUBSYSTEM: &str = "process table";

    let entries = match std::fs::read_dir(proc_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return SamplingError::PermissionDenied {
                subsystem: SUBSYSTEM,
                message: format!("cannot list {}: {}", proc_root.display(), e),
            }
        }
        Err(e) => {
            return SamplingError::Query {
                subsystem: SUBSYSTEM,
                message: format!(
                    "no processes visible and {} unreadable: {}",
                    proc_root.display(),
                    e
                ),
            }
        }
    };

    let has_pids = entries.filter_map(Result::ok).any(|entry| {
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
    });

    if has_pids {
        SamplingError::Query {
            subsystem: SUBSYSTEM,
            message: "no processes visible".to_string(),
        }
    } else {
        SamplingError::PermissionDenied {
            subsystem: SUBSYSTEM,
            message: format!("no process entries visible under {}", proc_root.display()),
        }
    }
}

fn network_totals(system: &System) -> (u64, u64) {
    system
        .networks()
        .iter()
        .fold((0u64, 0u64), |(sent, recv), (_, data)| {
            (
                sent.saturating_add(data.total_transmitted()),
                recv.saturating_add(data.total_received()),
            )
        })
}

#[async_trait]
impl MetricSampler for SystemSampler {
    async fn sample(&mut self) -> Result<Snapshot, SamplingError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_disks_list();
        self.system.refresh_disks();
        self.system.refresh_networks_list();
        self.system.refresh_networks();
        self.system.refresh_processes();

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refresh).as_secs_f64();
        self.last_refresh = now;

        let processes = self.processes(elapsed);
        if processes.is_empty() {
            return Err(empty_process_table(Path::new(PROC_ROOT)));
        }

        let mut snapshot = Snapshot::empty(Utc::now());
        snapshot.cpu_percent = self.cpu_percent();
        snapshot.memory_percent = percent_of(self.system.used_memory(), self.system.total_memory());
        // A host without swap has no swap pressure
        snapshot.swap_percent = if self.system.total_swap() == 0 {
            Some(0.0)
        } else {
            percent_of(self.system.used_swap(), self.system.total_swap())
        };
        snapshot.disk_percent = self.disk_percent();
        let (sent, recv) = self.network_rates(now);
        snapshot.network_bytes_sent_per_sec = sent;
        snapshot.network_bytes_recv_per_sec = recv;
        snapshot.process_count = Some(processes.len() as u64);
        snapshot.top_processes = select_top_processes(processes, self.process_limit);

        if snapshot.is_degraded() {
            debug!(unavailable = ?snapshot.unavailable(), "Sampled degraded snapshot");
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_sample_respects_invariants() {
        let mut sampler = SystemSampler::new("/", 5);
        let snapshot = sampler.sample().await.unwrap();

        for value in [
            snapshot.cpu_percent,
            snapshot.memory_percent,
            snapshot.disk_percent,
            snapshot.swap_percent,
        ]
        .into_iter()
        .flatten()
        {
            assert!((0.0..=100.0).contains(&value));
        }

        assert!(snapshot.process_count.unwrap() > 0);
        assert!(!snapshot.top_processes.is_empty());
        assert!(snapshot.top_processes.len() <= 15);
        for process in &snapshot.top_processes {
            assert!((0.0..=100.0).contains(&process.cpu_percent));
            assert!((0.0..=100.0).contains(&process.memory_percent));
            assert!(process.disk_bytes_per_sec >= 0.0);
        }
    }

    #[test]
    fn test_hidden_process_listing_is_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sys")).unwrap();
        std::fs::write(dir.path().join("uptime"), "1.0 1.0").unwrap();

        assert!(matches!(
            empty_process_table(dir.path()),
            SamplingError::PermissionDenied { subsystem: "process table", .. }
        ));
    }

    #[test]
    fn test_visible_process_entries_are_query_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("1")).unwrap();

        assert!(matches!(
            empty_process_table(dir.path()),
            SamplingError::Query { .. }
        ));
    }

    #[test]
    fn test_missing_process_listing_is_query_failure() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            empty_process_table(&dir.path().join("absent")),
            SamplingError::Query { .. }
        ));
    }

    #[tokio::test]
    async fn test_consecutive_samples_are_ordered() {
        let mut sampler = SystemSampler::new("/", 3);
        let first = sampler.sample().await.unwrap();
        let second = sampler.sample().await.unwrap();
        assert!(second.timestamp >= first.timestamp);
    }
}
