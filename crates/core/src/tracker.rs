//! Echo suppression for remote-initiated writes
//!
//! When a file is about to be rewritten on behalf of a remote
//! participant, its name goes into this set so the local monitor does
//! not observe the write and publish it back to the cluster.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

/// Thread-safe set of filenames the monitor must ignore.
#[derive(Debug, Default)]
pub struct SuppressionTracker {
    suppressed: Mutex<HashSet<String>>,
}

impl SuppressionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ignoring local changes to `name`. Idempotent.
    pub fn suppress(&self, name: &str) {
        let mut set = self.suppressed.lock().unwrap();
        if set.insert(name.to_owned()) {
            debug!("suppressing change notifications for {name:?}");
        }
    }

    /// Stop ignoring `name`. A single resume cancels any number of
    /// prior suppressions; resuming an untracked name is a no-op.
    pub fn resume(&self, name: &str) {
        let mut set = self.suppressed.lock().unwrap();
        if set.remove(name) {
            debug!("resumed change notifications for {name:?}");
        }
    }

    /// Is `name` currently suppressed?
    #[must_use]
    pub fn is_suppressed(&self, name: &str) -> bool {
        self.suppressed.lock().unwrap().contains(name)
    }

    /// Drop every suppression.
    pub fn clear(&self) {
        self.suppressed.lock().unwrap().clear();
    }

    /// Number of currently suppressed names.
    #[must_use]
    pub fn suppressed_count(&self) -> usize {
        self.suppressed.lock().unwrap().len()
    }
}
