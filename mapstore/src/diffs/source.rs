//! Index of binary diffs available on the server.
//!
//! Populated from server metadata once per catalog version; the orchestrator
//! consults it to decide diff-vs-full per leaf, and marks entries applied or
//! removed as jobs finish. An aborted scheme (server says no diffs) empties
//! the index so every pending diff task can fall back to a full download.

use std::collections::HashMap;

use crate::catalog::RegionId;

/// One downloadable diff: transforms `base_version` into `target_version`.
#[derive(Debug, Clone)]
pub struct DiffInfo {
    /// Installed version the diff applies on top of.
    pub base_version: i64,
    /// Version produced by applying the diff.
    pub target_version: i64,
    /// Size of the diff payload on the server, in bytes.
    pub size: u64,
    /// Base64-encoded SHA-1 of the patched output file.
    pub output_sha1_base64: String,
}

/// Availability of the diff scheme as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffsStatus {
    /// No metadata received yet.
    Undefined,
    /// The server has no diffs for our local versions.
    NotAvailable,
    /// At least one diff was offered.
    Available,
}

/// The set of diffs the server currently offers for our installed files.
#[derive(Debug)]
pub struct DiffSource {
    status: DiffsStatus,
    diffs: HashMap<RegionId, DiffInfo>,
}

impl Default for DiffSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffSource {
    pub fn new() -> Self {
        Self {
            status: DiffsStatus::Undefined,
            diffs: HashMap::new(),
        }
    }

    pub fn status(&self) -> DiffsStatus {
        self.status
    }

    /// Replace the index with freshly received metadata.
    pub fn set_diffs(&mut self, diffs: HashMap<RegionId, DiffInfo>) {
        self.status = if diffs.is_empty() {
            DiffsStatus::NotAvailable
        } else {
            DiffsStatus::Available
        };
        self.diffs = diffs;
    }

    pub fn has_diff_for(&self, region: &str) -> bool {
        self.diffs.contains_key(region)
    }

    pub fn info_for(&self, region: &str) -> Option<&DiffInfo> {
        self.diffs.get(region)
    }

    /// Bytes that would be transferred to update `region` via diff.
    pub fn size_to_download(&self, region: &str) -> Option<u64> {
        self.diffs.get(region).map(|d| d.size)
    }

    /// Drop the entry after a successful application.
    pub fn mark_applied(&mut self, region: &str) {
        self.diffs.remove(region);
    }

    /// Drop the entry after a failure so the region falls back to full data.
    pub fn remove_diff_for(&mut self, region: &str) {
        self.diffs.remove(region);
    }

    /// Abandon the diff scheme entirely.
    pub fn abort(&mut self) {
        self.diffs.clear();
        self.status = DiffsStatus::NotAvailable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(base: i64, target: i64, size: u64) -> DiffInfo {
        DiffInfo {
            base_version: base,
            target_version: target,
            size,
            output_sha1_base64: "aGFzaA==".to_string(),
        }
    }

    #[test]
    fn test_empty_source_is_undefined() {
        let source = DiffSource::new();
        assert_eq!(source.status(), DiffsStatus::Undefined);
        assert!(!source.has_diff_for("Freedonia"));
    }

    #[test]
    fn test_set_diffs_updates_status() {
        let mut source = DiffSource::new();
        source.set_diffs(HashMap::from([("Freedonia".to_string(), info(1, 2, 400))]));
        assert_eq!(source.status(), DiffsStatus::Available);
        assert!(source.has_diff_for("Freedonia"));
        assert_eq!(source.size_to_download("Freedonia"), Some(400));

        source.set_diffs(HashMap::new());
        assert_eq!(source.status(), DiffsStatus::NotAvailable);
    }

    #[test]
    fn test_mark_applied_removes_entry() {
        let mut source = DiffSource::new();
        source.set_diffs(HashMap::from([("Freedonia".to_string(), info(1, 2, 400))]));
        source.mark_applied("Freedonia");
        assert!(!source.has_diff_for("Freedonia"));
    }

    #[test]
    fn test_abort_clears_everything() {
        let mut source = DiffSource::new();
        source.set_diffs(HashMap::from([
            ("Freedonia".to_string(), info(1, 2, 400)),
            ("Sylvania".to_string(), info(1, 2, 500)),
        ]));
        source.abort();
        assert_eq!(source.status(), DiffsStatus::NotAvailable);
        assert!(!source.has_diff_for("Freedonia"));
        assert!(!source.has_diff_for("Sylvania"));
    }
}
