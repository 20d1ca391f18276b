//! Observer subscriptions for status and progress changes.
//!
//! Callbacks fire on the control plane, after the mutation that triggered
//! them has fully settled, so a callback may immediately issue fresh queries
//! against the storage engine.

use crate::catalog::RegionId;

use super::progress::Progress;
use super::status::NodeStatus;

/// Fired when a region's derived status changes.
pub type StatusCallback = Box<dyn Fn(&RegionId, NodeStatus) + Send>;

/// Fired when byte progress for a region changes.
pub type ProgressCallback = Box<dyn Fn(&RegionId, Progress) + Send>;

struct Subscription {
    id: u64,
    on_status: StatusCallback,
    on_progress: ProgressCallback,
}

/// Slot-id keyed set of observers.
#[derive(Default)]
pub struct ObserverSet {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, on_status: StatusCallback, on_progress: ProgressCallback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            on_status,
            on_progress,
        });
        id
    }

    /// Returns false when the id was never issued or already removed.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn notify_status(&self, region: &RegionId, status: NodeStatus) {
        for sub in &self.subscriptions {
            (sub.on_status)(region, status);
        }
    }

    pub fn notify_progress(&self, region: &RegionId, progress: Progress) {
        for sub in &self.subscriptions {
            (sub.on_progress)(region, progress);
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
