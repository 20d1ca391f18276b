//! The download queue: ordered, deduplicated, slot-limited.

#[allow(clippy::module_inception)]
mod queue;
mod task;

pub use queue::DownloadQueue;
pub use task::{DownloadTask, TaskState};
