//! Read-only query surface over the monitor loop
//!
//! The loop publishes one immutable [`CycleBundle`] per cycle through a watch
//! channel. Readers only ever see a whole bundle: the snapshot, its score and
//! the recommendations derived from it always belong to the same cycle.

use crate::allocator::{ConsumerRanking, ConsumerUsage};
use crate::anomaly::{AnomalyEvent, Detection, Severity};
use crate::models::{MaintenanceNotice, OptimizationRecommendation, Resource, Snapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Everything one monitoring cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct CycleBundle {
    /// 1-based count of completed cycles
    pub cycle: u64,
    pub snapshot: Arc<Snapshot>,
    pub detection: Detection,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub maintenance: Vec<MaintenanceNotice>,
    pub top_consumers: ConsumerRanking,
    /// Set while anomaly records could not be persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_warning: Option<String>,
}

impl CycleBundle {
    pub fn anomaly_score(&self) -> Option<f64> {
        self.detection.score()
    }

    pub fn severity(&self) -> Option<Severity> {
        self.detection.severity()
    }
}

/// Monitor loop lifecycle as seen by readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MonitorStatus {
    /// Not started yet, or shut down on request
    Stopped,
    Running,
    /// Stopped because sampling kept failing
    Failed {
        reason: String,
        consecutive_failures: u32,
    },
}

/// Result of [`MonitorHandle::latest`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", content = "bundle", rename_all = "snake_case")]
pub enum LatestResults {
    /// No cycle has completed yet
    NotYetAvailable,
    Available(Arc<CycleBundle>),
}

impl LatestResults {
    pub fn bundle(&self) -> Option<&Arc<CycleBundle>> {
        match self {
            LatestResults::NotYetAvailable => None,
            LatestResults::Available(bundle) => Some(bundle),
        }
    }
}

/// State published by the monitor loop, replaced wholesale on every change
#[derive(Debug, Clone)]
pub(crate) struct PublishedState {
    pub status: MonitorStatus,
    pub latest: Option<Arc<CycleBundle>>,
    /// Most recent anomaly events, oldest first
    pub anomalies: Arc<Vec<AnomalyEvent>>,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self {
            status: MonitorStatus::Stopped,
            latest: None,
            anomalies: Arc::new(Vec::new()),
        }
    }
}

/// Cheap-to-clone reader of the monitor's published results
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    state_rx: watch::Receiver<PublishedState>,
}

impl MonitorHandle {
    pub(crate) fn new(state_rx: watch::Receiver<PublishedState>) -> Self {
        Self { state_rx }
    }

    /// A handle that is not connected to any monitor loop
    pub fn detached() -> Self {
        let (_state_tx, state_rx) = watch::channel(PublishedState::default());
        Self { state_rx }
    }

    /// The most recently published cycle
    pub fn latest(&self) -> LatestResults {
        match &self.state_rx.borrow().latest {
            Some(bundle) => LatestResults::Available(Arc::clone(bundle)),
            None => LatestResults::NotYetAvailable,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.state_rx.borrow().status.clone()
    }

    /// The last `k` anomaly events, oldest first
    pub fn recent_anomalies(&self, k: usize) -> Vec<AnomalyEvent> {
        let anomalies = Arc::clone(&self.state_rx.borrow().anomalies);
        let skip = anomalies.len().saturating_sub(k);
        anomalies.iter().skip(skip).cloned().collect()
    }

    /// The `k` heaviest consumers of `resource` over the last `sustain_window` snapshots
    pub fn top_consumers(&self, resource: Resource, k: usize) -> Vec<ConsumerUsage> {
        self.state_rx
            .borrow()
            .latest
            .as_ref()
            .map(|bundle| bundle.top_consumers.top(resource, k))
            .unwrap_or_default()
    }

    /// Wait until at least `cycle` cycles have completed or the loop stops
    pub async fn wait_for_cycle(&mut self, cycle: u64) -> bool {
        self.state_rx
            .wait_for(|state| {
                state.latest.as_ref().is_some_and(|b| b.cycle >= cycle)
                    || matches!(state.status, MonitorStatus::Failed { .. })
            })
            .await
            .map(|state| state.latest.as_ref().is_some_and(|b| b.cycle >= cycle))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle_is_not_yet_available() {
        let handle = MonitorHandle::detached();
        assert!(matches!(handle.latest(), LatestResults::NotYetAvailable));
        assert_eq!(handle.status(), MonitorStatus::Stopped);
        assert!(handle.recent_anomalies(5).is_empty());
        assert!(handle.top_consumers(Resource::Cpu, 5).is_empty());
    }

    #[test]
    fn test_status_serialization_is_tagged() {
        let failed = MonitorStatus::Failed {
            reason: "permission denied".to_string(),
            consecutive_failures: 5,
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["consecutive_failures"], 5);

        let json = serde_json::to_value(LatestResults::NotYetAvailable).unwrap();
        assert_eq!(json["state"], "not_yet_available");
    }
}
