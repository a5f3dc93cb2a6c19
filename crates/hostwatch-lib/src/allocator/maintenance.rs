//! Predictive-maintenance notices for resources close to saturation

use crate::config::MaintenanceThresholds;
use crate::models::{MaintenanceNotice, Resource, Snapshot};

pub struct MaintenanceAdvisor {
    thresholds: MaintenanceThresholds,
}

impl MaintenanceAdvisor {
    pub fn new(thresholds: MaintenanceThresholds) -> Self {
        Self { thresholds }
    }

    /// Notices for every available resource above its maintenance threshold
    pub fn assess(&self, snapshot: &Snapshot) -> Vec<MaintenanceNotice> {
        // Disk first: the only one that risks data loss
        [Resource::Disk, Resource::Memory, Resource::Cpu]
            .into_iter()
            .filter_map(|resource| {
                let value = snapshot.resource(resource)?;
                let threshold = self.thresholds.get(resource);
                (value > threshold).then(|| MaintenanceNotice {
                    resource,
                    value,
                    threshold,
                    advice: advice(resource).to_string(),
                })
            })
            .collect()
    }
}

fn advice(resource: Resource) -> &'static str {
    match resource {
        Resource::Disk => "Disk failure risk increases when near full; consider cleanup or expansion.",
        Resource::Memory => {
            "System may become unstable under memory pressure; close applications or add RAM/swap."
        }
        Resource::Cpu => {
            "Sustained CPU saturation can cause throttling; improve cooling or limit workloads."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_notices_only_above_threshold() {
        let advisor = MaintenanceAdvisor::new(MaintenanceThresholds::default());
        let mut snapshot = Snapshot::empty(Utc::now());
        snapshot.cpu_percent = Some(96.0);
        snapshot.memory_percent = Some(90.0);
        snapshot.disk_percent = Some(93.5);

        let notices = advisor.assess(&snapshot);
        let resources: Vec<Resource> = notices.iter().map(|n| n.resource).collect();
        assert_eq!(resources, vec![Resource::Disk, Resource::Cpu]);
        assert!(notices[0].advice.contains("cleanup"));
    }

    #[test]
    fn test_unavailable_resources_skipped() {
        let advisor = MaintenanceAdvisor::new(MaintenanceThresholds::default());
        assert!(advisor.assess(&Snapshot::empty(Utc::now())).is_empty());
    }
}
