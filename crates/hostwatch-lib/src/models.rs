//! Core data models for the host monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resources the allocator compares against thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Cpu, Resource::Memory, Resource::Disk];

    /// Snapshot field holding this resource's host-wide usage
    pub fn field_name(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu_percent",
            Resource::Memory => "memory_percent",
            Resource::Disk => "disk_percent",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Memory => write!(f, "memory"),
            Resource::Disk => write!(f, "disk"),
        }
    }
}

/// Snapshot fields fed to the anomaly detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    CpuPercent,
    MemoryPercent,
    DiskPercent,
    SwapPercent,
    NetworkBytesSentPerSec,
    NetworkBytesRecvPerSec,
    ProcessCount,
}

/// Number of detector features
pub const FEATURE_COUNT: usize = 7;

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::CpuPercent,
        Feature::MemoryPercent,
        Feature::DiskPercent,
        Feature::SwapPercent,
        Feature::NetworkBytesSentPerSec,
        Feature::NetworkBytesRecvPerSec,
        Feature::ProcessCount,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Feature::CpuPercent => "cpu_percent",
            Feature::MemoryPercent => "memory_percent",
            Feature::DiskPercent => "disk_percent",
            Feature::SwapPercent => "swap_percent",
            Feature::NetworkBytesSentPerSec => "network_bytes_sent_per_sec",
            Feature::NetworkBytesRecvPerSec => "network_bytes_recv_per_sec",
            Feature::ProcessCount => "process_count",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resource usage of a single process at sampling time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub name: String,
    /// Share of total host CPU capacity (0-100)
    pub cpu_percent: f64,
    /// Share of total physical memory (0-100)
    pub memory_percent: f64,
    /// Bytes read plus written per second since the previous sample
    pub disk_bytes_per_sec: f64,
}

impl ProcessUsage {
    /// Usage figure used to rank this process for `resource`
    pub fn usage(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_percent,
            Resource::Memory => self.memory_percent,
            Resource::Disk => self.disk_bytes_per_sec,
        }
    }
}

/// One timestamped sample of host resource usage
///
/// A field the sampler could not read is `None`. Unavailable fields are
/// never zero-filled, so downstream consumers can tell "idle" from "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub swap_percent: Option<f64>,
    pub network_bytes_sent_per_sec: Option<f64>,
    pub network_bytes_recv_per_sec: Option<f64>,
    pub process_count: Option<u64>,
    /// Heaviest processes, ordered by CPU usage descending
    pub top_processes: Vec<ProcessUsage>,
}

impl Snapshot {
    /// A snapshot with every metric unavailable
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_percent: None,
            memory_percent: None,
            disk_percent: None,
            swap_percent: None,
            network_bytes_sent_per_sec: None,
            network_bytes_recv_per_sec: None,
            process_count: None,
            top_processes: Vec::new(),
        }
    }

    pub fn resource(&self, resource: Resource) -> Option<f64> {
        match resource {
            Resource::Cpu => self.cpu_percent,
            Resource::Memory => self.memory_percent,
            Resource::Disk => self.disk_percent,
        }
    }

    pub fn feature(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::CpuPercent => self.cpu_percent,
            Feature::MemoryPercent => self.memory_percent,
            Feature::DiskPercent => self.disk_percent,
            Feature::SwapPercent => self.swap_percent,
            Feature::NetworkBytesSentPerSec => self.network_bytes_sent_per_sec,
            Feature::NetworkBytesRecvPerSec => self.network_bytes_recv_per_sec,
            Feature::ProcessCount => self.process_count.map(|count| count as f64),
        }
    }

    /// Features the sampler could not read for this snapshot
    pub fn unavailable(&self) -> Vec<Feature> {
        Feature::ALL
            .into_iter()
            .filter(|feature| self.feature(*feature).is_none())
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        Feature::ALL
            .iter()
            .any(|feature| self.feature(*feature).is_none())
    }

    /// Process with the highest usage of `resource` in this snapshot
    pub fn top_consumer(&self, resource: Resource) -> Option<&ProcessUsage> {
        self.top_processes.iter().max_by(|a, b| {
            a.usage(resource)
                .partial_cmp(&b.usage(resource))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Advisory produced when a resource exceeds its configured threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub resource: Resource,
    pub value: f64,
    pub threshold: f64,
    pub top_consumer: Option<ProcessUsage>,
    /// Mean of the resource over the recent history window
    pub sustained_average: Option<f64>,
    /// True when the recent mean also exceeds the threshold
    pub sustained: bool,
    /// Triggering condition, e.g. `cpu_percent=92.0 > threshold=80.0, top consumer: pid 1234 (make)`
    pub condition: String,
    pub advice: String,
}

/// Predictive-maintenance notice for a resource close to saturation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceNotice {
    pub resource: Resource,
    pub value: f64,
    pub threshold: f64,
    pub advice: String,
}
