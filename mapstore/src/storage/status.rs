//! Region status derivation and hierarchical aggregation.
//!
//! Statuses are never stored; they are computed on demand from the registry,
//! the queue and the set of running diff jobs. Group status is the "worst"
//! status among the leaves of the subtree, with each disputed leaf counted
//! once, and with the special `PartlyDownloaded` result when some but not
//! all leaves are installed.

/// Derived status of one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    NotDownloaded,
    /// Waiting for a transfer slot.
    InQueue,
    /// Bytes are moving.
    Downloading,
    /// A diff job is running.
    Applying,
    /// Installed at the current catalog version.
    OnDisk,
    /// Installed, but a newer version exists in the catalog.
    OnDiskOutOfDate,
    /// Groups only: some leaves installed, some not.
    PartlyDownloaded,
    /// The last attempt failed and automatic recovery is exhausted.
    DownloadFailed,
}

impl NodeStatus {
    /// Aggregation rank; the lowest rank among a group's leaves wins.
    fn rank(self) -> u8 {
        match self {
            NodeStatus::Downloading => 0,
            NodeStatus::Applying => 1,
            NodeStatus::InQueue => 2,
            NodeStatus::DownloadFailed => 3,
            NodeStatus::OnDiskOutOfDate => 4,
            NodeStatus::OnDisk => 5,
            NodeStatus::NotDownloaded => 6,
            // Never produced for leaves; ranked above everything so it can
            // never win an aggregation it did not come from.
            NodeStatus::PartlyDownloaded => 7,
        }
    }

    /// Whether the region is installed, current version or not.
    pub fn is_downloaded(self) -> bool {
        matches!(self, NodeStatus::OnDisk | NodeStatus::OnDiskOutOfDate)
    }

    /// Whether a download or application is queued or running.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            NodeStatus::InQueue | NodeStatus::Downloading | NodeStatus::Applying
        )
    }
}

/// Fold leaf statuses into a group status. Callers must feed each disputed
/// leaf exactly once.
pub fn aggregate<I: IntoIterator<Item = NodeStatus>>(leaf_statuses: I) -> NodeStatus {
    let mut worst: Option<NodeStatus> = None;
    let mut all_on_disk = true;
    let mut any = false;
    for status in leaf_statuses {
        any = true;
        if status != NodeStatus::OnDisk {
            all_on_disk = false;
        }
        worst = Some(match worst {
            Some(w) if w.rank() <= status.rank() => w,
            _ => status,
        });
    }
    if !any {
        return NodeStatus::NotDownloaded;
    }
    if all_on_disk {
        return NodeStatus::OnDisk;
    }
    match worst {
        // Some leaves installed at the current version, the rest absent.
        Some(NodeStatus::OnDisk) => NodeStatus::PartlyDownloaded,
        Some(w) => w,
        None => NodeStatus::NotDownloaded,
    }
}
