use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::tasks::TargetIdentity;

/// Connection failure counts per target. Counts only grow during a run.
#[derive(Debug, Default)]
pub struct FailureLedger {
    counts: Mutex<HashMap<TargetIdentity, u32>>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure and returns the new count.
    pub async fn increment(&self, identity: &TargetIdentity) -> u32 {
        let mut guard = self.counts.lock().await;
        let count = guard.entry(identity.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Zero for targets that never failed.
    pub async fn get(&self, identity: &TargetIdentity) -> u32 {
        self.counts.lock().await.get(identity).copied().unwrap_or(0)
    }

    /// Targets at or above `ceiling`.
    pub async fn exhausted(&self, ceiling: u32) -> Vec<TargetIdentity> {
        let guard = self.counts.lock().await;
        let mut targets: Vec<_> = guard
            .iter()
            .filter(|(_, count)| **count >= ceiling)
            .map(|(identity, _)| identity.clone())
            .collect();
        targets.sort();
        targets
    }
}
