//! Registry of map files physically present on disk.
//!
//! Tracks, per region and per on-disk version, which file kinds exist and how
//! large they are. Records are created by the startup scan or by successful
//! download registration, and destroyed by explicit deletion or superseded-
//! version sweeps. Every delete goes through [`crate::fileops`].

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::catalog::RegionId;
use crate::error::{StorageError, StorageResult};
use crate::fileops;

use super::paths::{self, ScannedFile};
use super::record::{FileKind, LocalFileRecord};

/// Outcome of the startup disk scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Regions with complete full data found, with their versions.
    pub registered: Vec<(RegionId, i64)>,
    /// Regions with a fetched-but-unapplied diff on disk.
    pub pending_diffs: Vec<(RegionId, i64)>,
    /// Transfer/application leftovers that were discarded.
    pub discarded: Vec<PathBuf>,
}

/// Tracks which region files are physically present on disk.
#[derive(Debug)]
pub struct LocalFileRegistry {
    data_dir: PathBuf,
    /// Records per region, most recently registered first.
    records: HashMap<RegionId, VecDeque<LocalFileRecord>>,
}

impl LocalFileRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            records: HashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Ensure the version directory for a region's files exists.
    pub fn prepare_place(&self, version: i64) -> StorageResult<PathBuf> {
        let dir = paths::version_dir(&self.data_dir, version);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(dir)
    }

    /// Stat each file kind of (region, version) and refresh the record,
    /// creating it if any kind is present. Returns the refreshed record.
    pub fn sync_with_disk(
        &mut self,
        region: &str,
        name: &str,
        version: i64,
    ) -> Option<LocalFileRecord> {
        let mut record = match self.take(region, version) {
            Some(existing) => existing,
            None => LocalFileRecord::new(region, name, version, &self.data_dir),
        };
        record.sync_with_disk();
        if record.has_files() {
            let copy = record.clone();
            self.records
                .entry(region.to_string())
                .or_default()
                .push_front(record);
            Some(copy)
        } else {
            None
        }
    }

    /// The record for an exact (region, version), if known.
    pub fn record(&self, region: &str, version: i64) -> Option<&LocalFileRecord> {
        self.records
            .get(region)?
            .iter()
            .find(|r| r.version == version)
    }

    /// The record with the highest version that has full data on disk.
    pub fn latest_record(&self, region: &str) -> Option<&LocalFileRecord> {
        self.records
            .get(region)?
            .iter()
            .filter(|r| r.on_disk(FileKind::FullData))
            .max_by_key(|r| r.version)
    }

    /// Highest version with full data present, if any.
    pub fn latest_version(&self, region: &str) -> Option<i64> {
        self.latest_record(region).map(|r| r.version)
    }

    /// All regions with at least one record.
    pub fn regions(&self) -> impl Iterator<Item = &RegionId> {
        self.records.keys()
    }

    /// Register a freshly synced record.
    ///
    /// Refuses with [`StorageError::Conflict`] when an existing record for
    /// the same (region, version) disagrees on identity (file name or
    /// directory), the signature of a double-registration race. A record
    /// that only adds or drops file kinds replaces the old one.
    pub fn register(&mut self, record: LocalFileRecord) -> StorageResult<()> {
        let region = record.region.clone();
        let version = record.version;
        let conflict = self.record(&region, version).is_some_and(|existing| {
            existing.name != record.name || existing.directory != record.directory
        });
        if conflict {
            return Err(StorageError::Conflict { region, version });
        }
        self.take(&region, version);
        self.records.entry(region).or_default().push_front(record);
        Ok(())
    }

    /// Remove a file kind of (region, version) from the registry and, unless
    /// `deferred`, from disk, along with the derived index directory.
    ///
    /// With `deferred` only the in-memory record is dropped; the caller
    /// guarantees eventual disk deletion.
    pub fn deregister_and_delete(
        &mut self,
        region: &str,
        version: i64,
        kind: FileKind,
        deferred: bool,
    ) -> StorageResult<()> {
        let Some(mut record) = self.take(region, version) else {
            return Ok(());
        };

        if deferred {
            return Ok(());
        }

        fileops::delete(&record.path(kind))?;
        fileops::delete_dir_all(&paths::index_dir(&self.data_dir, version, &record.name))?;
        record.sync_with_disk();
        record.clear(kind);
        if record.has_files() {
            self.records
                .entry(region.to_string())
                .or_default()
                .push_front(record);
        }
        Ok(())
    }

    /// Remove a file kind of every version of `region`.
    pub fn delete_all_versions(
        &mut self,
        region: &str,
        kind: FileKind,
        deferred: bool,
    ) -> StorageResult<()> {
        let versions: Vec<i64> = self
            .records
            .get(region)
            .map(|list| list.iter().map(|r| r.version).collect())
            .unwrap_or_default();
        for version in versions {
            self.deregister_and_delete(region, version, kind, deferred)?;
        }
        Ok(())
    }

    /// Delete every version of `region` older than the newest one with full
    /// data. Diffs of superseded versions go too.
    pub fn cleanup_superseded(&mut self, region: &str) -> StorageResult<()> {
        let Some(latest) = self.latest_version(region) else {
            return Ok(());
        };
        let old: Vec<i64> = self
            .records
            .get(region)
            .map(|list| {
                list.iter()
                    .map(|r| r.version)
                    .filter(|&v| v < latest)
                    .collect()
            })
            .unwrap_or_default();
        for version in old {
            info!(region, version, "removing superseded map version");
            self.deregister_and_delete(region, version, FileKind::FullData, false)?;
            self.deregister_and_delete(region, version, FileKind::Diff, false)?;
        }
        Ok(())
    }

    /// Walk every version directory under the data dir, registering complete
    /// files, collecting unapplied diffs, and deleting transfer leftovers.
    ///
    /// `resolve` maps a file name to its region id; files the catalog does
    /// not know are left untouched.
    pub fn scan_disk<F>(&mut self, resolve: F) -> ScanReport
    where
        F: Fn(&str) -> Option<RegionId>,
    {
        let mut report = ScanReport::default();
        let Ok(entries) = fs::read_dir(&self.data_dir) else {
            return report;
        };

        for entry in entries.flatten() {
            let Ok(version) = entry.file_name().to_string_lossy().parse::<i64>() else {
                continue;
            };
            let Ok(files) = fs::read_dir(entry.path()) else {
                continue;
            };
            for file in files.flatten() {
                let file_name = file.file_name();
                let file_name = file_name.to_string_lossy();
                match paths::classify(&file_name) {
                    ScannedFile::FullData(name) => {
                        if let Some(region) = resolve(name) {
                            if self.sync_with_disk(&region, name, version).is_some() {
                                report.registered.push((region, version));
                            }
                        }
                    }
                    ScannedFile::Diff(name) => {
                        if let Some(region) = resolve(name) {
                            self.sync_with_disk(&region, name, version);
                            report.pending_diffs.push((region, version));
                        }
                    }
                    ScannedFile::Transient(_) => {
                        let path = file.path();
                        if let Err(e) = fileops::delete(&path) {
                            warn!(path = %path.display(), error = %e, "failed to discard leftover");
                        } else {
                            report.discarded.push(path);
                        }
                    }
                    ScannedFile::Unknown => {}
                }
            }
        }

        info!(
            registered = report.registered.len(),
            pending_diffs = report.pending_diffs.len(),
            discarded = report.discarded.len(),
            "disk scan complete"
        );
        report
    }

    fn take(&mut self, region: &str, version: i64) -> Option<LocalFileRecord> {
        let list = self.records.get_mut(region)?;
        let pos = list.iter().position(|r| r.version == version)?;
        let record = list.remove(pos);
        if list.is_empty() {
            self.records.remove(region);
        }
        record
    }
}
