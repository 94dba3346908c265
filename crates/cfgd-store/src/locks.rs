//! Per-deployment mutation locks

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// One exclusive lock per deployment name
///
/// Hand the lock to `UpdateRequestBuilder::exclusive` so that mutations of
/// the same deployment run one at a time while other deployments proceed.
#[derive(Debug, Default)]
pub struct DeploymentLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeploymentLocks {
    /// Empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `deployment`, created on first use
    pub fn lock_for(&self, deployment: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(deployment) {
            return lock.value().clone();
        }
        self.locks
            .entry(deployment.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Number of deployments seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if no lock was handed out yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
