//! Download task descriptor and lifecycle.

use crate::catalog::RegionId;
use crate::registry::FileKind;

/// Lifecycle of a download task: `Queued` until a transfer slot frees up,
/// then `Active` until the transfer layer reports completion or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Active,
}

/// One pending or running download.
///
/// Deduplicated by `(region, kind)`; at most one task per region is ever
/// `Active`.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub region: RegionId,
    pub kind: FileKind,
    /// Data version being fetched.
    pub version: i64,
    /// Remote size from the catalog or diff index.
    pub expected_size: u64,
    /// Bytes received so far, updated from transfer progress.
    pub bytes_downloaded: u64,
    pub state: TaskState,
}

impl DownloadTask {
    pub fn new(region: impl Into<RegionId>, kind: FileKind, version: i64, expected_size: u64) -> Self {
        Self {
            region: region.into(),
            kind,
            version,
            expected_size,
            bytes_downloaded: 0,
            state: TaskState::Queued,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TaskState::Active
    }
}
