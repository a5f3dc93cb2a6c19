//! Core library for the hostwatch monitoring agent
//!
//! This crate provides the core functionality for:
//! - Sampling host CPU, memory, disk, swap and network usage
//! - Bounded snapshot history
//! - Isolation-forest anomaly detection with periodic retraining
//! - Threshold-based resource recommendations
//! - A durable JSON-lines anomaly log
//! - Health checks and observability

pub mod allocator;
pub mod anomaly;
pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod sampler;

pub use allocator::{ConsumerRanking, ConsumerUsage, MaintenanceAdvisor, ResourceAllocator};
pub use anomaly::{AnomalyDetector, AnomalyEvent, AnomalyLog, Detection, Severity, SeverityCuts};
pub use config::MonitorConfig;
pub use error::{ConfigError, MonitorError, PersistenceError, SamplingError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use history::HistoryStore;
pub use models::*;
pub use monitor::{
    CycleBundle, LatestResults, MonitorHandle, MonitorLoop, MonitorLoopBuilder, MonitorStatus,
};
pub use observability::{MonitorMetrics, StructuredLogger};
pub use sampler::{MetricSampler, SimulatedSampler, SystemSampler};
