//! Byte progress accounting for single regions and subtrees.

use std::ops::AddAssign;

/// Byte progress of a download, an application, or an aggregated subtree.
///
/// `bytes_total == 0` means the total is not known yet; the transfer layer
/// fills it in once the server reports a content length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
}

impl Progress {
    /// Sentinel for "total not reported yet".
    pub const UNKNOWN: Progress = Progress {
        bytes_downloaded: 0,
        bytes_total: 0,
    };

    pub fn new(bytes_downloaded: u64, bytes_total: u64) -> Self {
        Self {
            bytes_downloaded,
            bytes_total,
        }
    }

    /// A finished item: all bytes present.
    pub fn complete(bytes_total: u64) -> Self {
        Self {
            bytes_downloaded: bytes_total,
            bytes_total,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.bytes_total == 0
    }

    /// Completion ratio in `[0, 1]`; zero while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            0.0
        } else {
            self.bytes_downloaded as f64 / self.bytes_total as f64
        }
    }
}

impl AddAssign for Progress {
    fn add_assign(&mut self, other: Self) {
        self.bytes_downloaded += other.bytes_downloaded;
        self.bytes_total += other.bytes_total;
    }
}
