//! Ordered, deduplicated set of download tasks.
//!
//! FIFO within the configured number of concurrent slots. Tasks are
//! deduplicated by `(region, kind)` and at most one task per region is
//! `Active` at any instant; the orchestrator relies on this to keep diff
//! application and full downloads mutually exclusive per region.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::catalog::RegionId;
use crate::registry::FileKind;

use super::task::{DownloadTask, TaskState};

/// The pending/active download set.
#[derive(Debug)]
pub struct DownloadQueue {
    tasks: VecDeque<DownloadTask>,
    /// Number of transfer slots.
    concurrency: usize,
}

impl DownloadQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether any task (either kind) exists for the region.
    pub fn contains(&self, region: &str) -> bool {
        self.tasks.iter().any(|t| t.region == region)
    }

    /// Whether a task for exactly `(region, kind)` exists.
    pub fn contains_kind(&self, region: &str, kind: FileKind) -> bool {
        self.tasks
            .iter()
            .any(|t| t.region == region && t.kind == kind)
    }

    /// Whether the region's task is currently active.
    pub fn is_active(&self, region: &str) -> bool {
        self.tasks
            .iter()
            .any(|t| t.region == region && t.is_active())
    }

    /// Add a task unless an equivalent one is already queued or active.
    pub fn enqueue(&mut self, task: DownloadTask) -> bool {
        if self.contains_kind(&task.region, task.kind) {
            debug!(region = %task.region, "task already queued, skipping");
            return false;
        }
        self.tasks.push_back(task);
        true
    }

    /// Remove all tasks for a region, returning them so the caller can abort
    /// an active transfer and clean up partial files.
    pub fn cancel(&mut self, region: &str) -> Vec<DownloadTask> {
        let mut removed = Vec::new();
        self.tasks.retain(|t| {
            if t.region == region {
                removed.push(t.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove one finished task.
    pub fn complete(&mut self, region: &str, kind: FileKind) -> Option<DownloadTask> {
        let pos = self
            .tasks
            .iter()
            .position(|t| t.region == region && t.kind == kind)?;
        self.tasks.remove(pos)
    }

    /// Promote queued tasks to active while slots are free. Returns the
    /// newly activated tasks; a region with a task already active is skipped
    /// so that two kinds for one region never run together.
    pub fn activate_ready(&mut self) -> Vec<DownloadTask> {
        let mut activated = Vec::new();
        let mut active_regions: HashSet<RegionId> = self
            .tasks
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.region.clone())
            .collect();

        let mut free_slots = self.concurrency.saturating_sub(active_regions.len());
        for task in self.tasks.iter_mut() {
            if free_slots == 0 {
                break;
            }
            if task.state == TaskState::Queued && !active_regions.contains(&task.region) {
                task.state = TaskState::Active;
                active_regions.insert(task.region.clone());
                activated.push(task.clone());
                free_slots -= 1;
            }
        }
        activated
    }

    /// Record transfer progress for the region's active task.
    pub fn on_progress(&mut self, region: &str, bytes_downloaded: u64) {
        if let Some(task) = self
            .tasks
            .iter_mut()
            .find(|t| t.region == region && t.is_active())
        {
            task.bytes_downloaded = bytes_downloaded;
        }
    }

    /// Visit every task in queue order.
    pub fn for_each<F: FnMut(&DownloadTask)>(&self, mut f: F) {
        for task in &self.tasks {
            f(task);
        }
    }

    /// Region ids of every queued/active task, in queue order, deduplicated.
    pub fn regions(&self) -> Vec<RegionId> {
        let mut seen = HashSet::new();
        self.tasks
            .iter()
            .filter(|t| seen.insert(t.region.clone()))
            .map(|t| t.region.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(region: &str, kind: FileKind) -> DownloadTask {
        DownloadTask::new(region, kind, 220101, 1000)
    }

    #[test]
    fn test_enqueue_dedupes_by_region_and_kind() {
        let mut queue = DownloadQueue::new(1);
        assert!(queue.enqueue(task("A", FileKind::FullData)));
        assert!(!queue.enqueue(task("A", FileKind::FullData)));
        // A different kind for the same region is a distinct task.
        assert!(queue.enqueue(task("A", FileKind::Diff)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_activate_ready_respects_concurrency() {
        let mut queue = DownloadQueue::new(2);
        queue.enqueue(task("A", FileKind::FullData));
        queue.enqueue(task("B", FileKind::FullData));
        queue.enqueue(task("C", FileKind::FullData));

        let activated = queue.activate_ready();
        assert_eq!(activated.len(), 2);
        assert!(queue.is_active("A"));
        assert!(queue.is_active("B"));
        assert!(!queue.is_active("C"));

        // Nothing more until a slot frees up.
        assert!(queue.activate_ready().is_empty());

        queue.complete("A", FileKind::FullData);
        let activated = queue.activate_ready();
        assert_eq!(activated.len(), 1);
        assert_eq!(activated[0].region, "C");
    }

    #[test]
    fn test_one_active_task_per_region() {
        let mut queue = DownloadQueue::new(4);
        queue.enqueue(task("A", FileKind::Diff));
        queue.enqueue(task("A", FileKind::FullData));

        let activated = queue.activate_ready();
        assert_eq!(activated.len(), 1);
        assert_eq!(activated[0].kind, FileKind::Diff);

        queue.complete("A", FileKind::Diff);
        let activated = queue.activate_ready();
        assert_eq!(activated.len(), 1);
        assert_eq!(activated[0].kind, FileKind::FullData);
    }

    #[test]
    fn test_cancel_removes_all_tasks_for_region() {
        let mut queue = DownloadQueue::new(1);
        queue.enqueue(task("A", FileKind::FullData));
        queue.enqueue(task("A", FileKind::Diff));
        queue.enqueue(task("B", FileKind::FullData));
        queue.activate_ready();

        let removed = queue.cancel("A");
        assert_eq!(removed.len(), 2);
        assert!(removed[0].is_active());
        assert!(!queue.contains("A"));
        assert!(queue.contains("B"));
    }

    #[test]
    fn test_progress_updates_active_task() {
        let mut queue = DownloadQueue::new(1);
        queue.enqueue(task("A", FileKind::FullData));
        queue.activate_ready();
        queue.on_progress("A", 512);

        let mut seen = 0;
        queue.for_each(|t| {
            assert_eq!(t.bytes_downloaded, 512);
            seen += 1;
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_regions_in_queue_order() {
        let mut queue = DownloadQueue::new(1);
        queue.enqueue(task("B", FileKind::FullData));
        queue.enqueue(task("A", FileKind::FullData));
        queue.enqueue(task("A", FileKind::Diff));
        assert_eq!(queue.regions(), vec!["B".to_string(), "A".to_string()]);
    }
}
