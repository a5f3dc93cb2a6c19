//! Bounded snapshot history
//!
//! Doubles as the detector's training buffer and the window for top
//! consumer queries. Only the monitor loop mutates it.

use crate::models::Snapshot;
use chrono::Duration as ChronoDuration;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Time-ordered FIFO of snapshots with fixed capacity
#[derive(Debug)]
pub struct HistoryStore {
    snapshots: VecDeque<Arc<Snapshot>>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store holding at most `capacity` snapshots (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
        }
    }

    /// Append a snapshot, evicting the oldest when full
    ///
    /// Timestamps are kept strictly increasing: a snapshot stamped at or before
    /// the newest entry (wall clock stepped back) is moved one microsecond past it.
    pub fn append(&mut self, mut snapshot: Snapshot) -> Arc<Snapshot> {
        if let Some(newest) = self.snapshots.back() {
            if snapshot.timestamp <= newest.timestamp {
                let adjusted = newest.timestamp + ChronoDuration::microseconds(1);
                debug!(
                    original = %snapshot.timestamp,
                    adjusted = %adjusted,
                    "Snapshot timestamp not after newest history entry, adjusting"
                );
                snapshot.timestamp = adjusted;
            }
        }

        while self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }

        let snapshot = Arc::new(snapshot);
        self.snapshots.push_back(Arc::clone(&snapshot));
        snapshot
    }

    /// The last `k` snapshots, oldest first
    pub fn recent(&self, k: usize) -> Vec<Arc<Snapshot>> {
        let skip = self.snapshots.len().saturating_sub(k);
        self.snapshots.iter().skip(skip).cloned().collect()
    }

    /// Read-only view of the whole history, oldest first
    pub fn all(&self) -> &VecDeque<Arc<Snapshot>> {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot_at(secs: i64, cpu: f64) -> Snapshot {
        let mut snapshot = Snapshot::empty(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap());
        snapshot.cpu_percent = Some(cpu);
        snapshot
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut history = HistoryStore::new(4);
        for i in 0..20 {
            history.append(snapshot_at(i, i as f64));
            assert!(history.len() <= 4);
        }
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_overflow_evicts_first_appended() {
        let n = 5;
        let mut history = HistoryStore::new(n);
        for i in 0..=n as i64 {
            history.append(snapshot_at(i, i as f64));
        }

        let cpus: Vec<f64> = history.all().iter().filter_map(|s| s.cpu_percent).collect();
        assert!(!cpus.contains(&0.0));
        assert!(cpus.contains(&(n as f64)));
        assert_eq!(history.latest().unwrap().cpu_percent, Some(n as f64));
    }

    #[test]
    fn test_recent_returns_last_k_in_order() {
        let mut history = HistoryStore::new(10);
        for i in 0..6 {
            history.append(snapshot_at(i, i as f64));
        }

        let recent: Vec<f64> = history
            .recent(3)
            .iter()
            .filter_map(|s| s.cpu_percent)
            .collect();
        assert_eq!(recent, vec![3.0, 4.0, 5.0]);

        assert_eq!(history.recent(50).len(), 6);
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut history = HistoryStore::new(10);
        history.append(snapshot_at(10, 1.0));
        history.append(snapshot_at(10, 2.0));
        history.append(snapshot_at(5, 3.0));

        let stamps: Vec<_> = history.all().iter().map(|s| s.timestamp).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
