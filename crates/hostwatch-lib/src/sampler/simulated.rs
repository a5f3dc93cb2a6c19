//! Deterministic sampler for demos and tests
//!
//! Produces smooth waveforms with periodic spikes so the detector and the
//! allocator have something to react to without a real workload.

use super::{async_trait, clamp_percent, MetricSampler};
use crate::error::SamplingError;
use crate::models::{ProcessUsage, Snapshot};
use chrono::Utc;

const CPU_SPIKE_EVERY: u64 = 150;
const MEMORY_SPIKE_EVERY: u64 = 233;
const DISK_SPIKE_EVERY: u64 = 411;

pub struct SimulatedSampler {
    tick: u64,
}

impl Default for SimulatedSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSampler {
    pub fn new() -> Self {
        Self { tick: 0 }
    }

    fn processes(&self, cpu: f64, memory: f64, disk_spike: bool) -> Vec<ProcessUsage> {
        let phase = self.tick as f64 / 8.0;
        vec![
            ProcessUsage {
                pid: 1201,
                name: "postgres".to_string(),
                cpu_percent: cpu * 0.45,
                memory_percent: memory * 0.3,
                disk_bytes_per_sec: 250_000.0 + phase.sin().abs() * 50_000.0,
            },
            ProcessUsage {
                pid: 2310,
                name: "node".to_string(),
                cpu_percent: cpu * 0.25,
                memory_percent: memory * 0.2,
                disk_bytes_per_sec: 12_000.0,
            },
            ProcessUsage {
                pid: 877,
                name: "rsync".to_string(),
                cpu_percent: cpu * 0.05,
                memory_percent: 0.5,
                disk_bytes_per_sec: if disk_spike { 80_000_000.0 } else { 900_000.0 },
            },
            ProcessUsage {
                pid: 431,
                name: "systemd-journald".to_string(),
                cpu_percent: 0.2,
                memory_percent: 0.4,
                disk_bytes_per_sec: 4_000.0,
            },
        ]
    }
}

#[async_trait]
impl MetricSampler for SimulatedSampler {
    async fn sample(&mut self) -> Result<Snapshot, SamplingError> {
        self.tick = self.tick.saturating_add(1);
        let phase = self.tick as f64 / 8.0;

        let mut cpu = 35.0 + phase.sin() * 10.0;
        let mut memory = 55.0 + (phase * 0.7).sin() * 6.0;
        let mut disk = 60.0 + (phase * 0.05).sin() * 2.0;

        let cpu_spike = self.tick % CPU_SPIKE_EVERY == 0;
        let memory_spike = self.tick % MEMORY_SPIKE_EVERY == 0;
        let disk_spike = self.tick % DISK_SPIKE_EVERY == 0;
        if cpu_spike {
            cpu = 97.0;
        }
        if memory_spike {
            memory = 93.0;
        }
        if disk_spike {
            disk = 91.0;
        }

        let mut snapshot = Snapshot::empty(Utc::now());
        snapshot.cpu_percent = clamp_percent(cpu);
        snapshot.memory_percent = clamp_percent(memory);
        snapshot.disk_percent = clamp_percent(disk);
        snapshot.swap_percent = clamp_percent(if memory_spike { 40.0 } else { 5.0 });
        snapshot.network_bytes_sent_per_sec = Some(120_000.0 + (phase * 1.3).cos() * 20_000.0);
        snapshot.network_bytes_recv_per_sec = Some(480_000.0 + (phase * 0.9).sin() * 60_000.0);
        snapshot.process_count = Some(210 + self.tick % 7);
        snapshot.top_processes = self.processes(cpu, memory, disk_spike);
        snapshot.top_processes.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(snapshot)
    }
}
