//! Local file records: which file kinds of a region version are on disk.

use std::path::{Path, PathBuf};

use super::paths;

/// The two kinds of bytes a region version can have on disk.
///
/// Only `FullData` counts as installed; a `Diff` is transient input for the
/// diff application engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    FullData,
    Diff,
}

impl FileKind {
    pub const ALL: [FileKind; 2] = [FileKind::FullData, FileKind::Diff];

    fn slot(self) -> usize {
        match self {
            FileKind::FullData => 0,
            FileKind::Diff => 1,
        }
    }
}

/// On-disk state of one region at one data version.
///
/// Created when a file kind is detected on disk or registered after a
/// download. Multiple versions of the same region may coexist until cleanup;
/// the registry keeps at most one record per (region, version).
#[derive(Debug, Clone)]
pub struct LocalFileRecord {
    /// Region this record belongs to.
    pub region: String,

    /// File name from the catalog descriptor.
    pub name: String,

    /// Data version of the files.
    pub version: i64,

    /// Directory the files live in.
    pub directory: PathBuf,

    /// Byte size per kind, `None` when the kind is absent.
    sizes: [Option<u64>; 2],
}

impl LocalFileRecord {
    /// Create an empty record; call [`sync_with_disk`](Self::sync_with_disk)
    /// to populate it.
    pub fn new(region: impl Into<String>, name: impl Into<String>, version: i64, data_dir: &Path) -> Self {
        Self {
            region: region.into(),
            name: name.into(),
            version,
            directory: paths::version_dir(data_dir, version),
            sizes: [None, None],
        }
    }

    /// Canonical path of a file kind for this record.
    pub fn path(&self, kind: FileKind) -> PathBuf {
        let file = match kind {
            FileKind::FullData => format!("{}.{}", self.name, paths::DATA_FILE_EXT),
            FileKind::Diff => format!(
                "{}.{}{}",
                self.name,
                paths::DATA_FILE_EXT,
                paths::DIFF_SUFFIX
            ),
        };
        self.directory.join(file)
    }

    /// Whether the kind is present on disk as of the last sync.
    pub fn on_disk(&self, kind: FileKind) -> bool {
        self.sizes[kind.slot()].is_some()
    }

    /// Byte size of the kind as of the last sync.
    pub fn size(&self, kind: FileKind) -> Option<u64> {
        self.sizes[kind.slot()]
    }

    /// Whether any kind is present.
    pub fn has_files(&self) -> bool {
        self.sizes.iter().any(Option::is_some)
    }

    /// Stat each kind's expected path and refresh presence and sizes.
    pub fn sync_with_disk(&mut self) {
        for kind in FileKind::ALL {
            self.sizes[kind.slot()] = std::fs::metadata(self.path(kind)).ok().map(|m| m.len());
        }
    }

    /// Forget a kind without touching the disk.
    pub(crate) fn clear(&mut self, kind: FileKind) {
        self.sizes[kind.slot()] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_record_paths() {
        let record = LocalFileRecord::new("Freedonia", "Freedonia", 220101, Path::new("/maps"));
        assert_eq!(
            record.path(FileKind::FullData),
            Path::new("/maps/220101/Freedonia.rmap")
        );
        assert_eq!(
            record.path(FileKind::Diff),
            Path::new("/maps/220101/Freedonia.rmap.diff")
        );
    }

    #[test]
    fn test_sync_with_disk_detects_kinds() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("220101");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Freedonia.rmap"), b"full bytes").unwrap();

        let mut record = LocalFileRecord::new("Freedonia", "Freedonia", 220101, temp.path());
        record.sync_with_disk();

        assert!(record.on_disk(FileKind::FullData));
        assert_eq!(record.size(FileKind::FullData), Some(10));
        assert!(!record.on_disk(FileKind::Diff));
        assert!(record.has_files());
    }

    #[test]
    fn test_sync_with_disk_after_delete() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("220101");
        fs::create_dir_all(&dir).unwrap();
        let full = dir.join("Freedonia.rmap");
        fs::write(&full, b"full").unwrap();

        let mut record = LocalFileRecord::new("Freedonia", "Freedonia", 220101, temp.path());
        record.sync_with_disk();
        assert!(record.has_files());

        fs::remove_file(&full).unwrap();
        record.sync_with_disk();
        assert!(!record.has_files());
    }
}
