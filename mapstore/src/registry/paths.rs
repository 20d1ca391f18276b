//! On-disk layout for versioned map data.
//!
//! ```text
//! <data_dir>/<version>/<name>.rmap             installed full data
//! <data_dir>/<version>/<name>.rmap.diff        fetched, unapplied diff
//! <data_dir>/<version>/<name>.rmap.diff.ready  diff mid-transfer
//! <data_dir>/<version>/<name>.rmap.downloading full download mid-transfer
//! <data_dir>/<version>/<name>.rmap.resume      resume marker
//! <data_dir>/<version>/<name>.rmap.applying    diff output mid-application
//! <data_dir>/<version>/<name>.idx/             derived index files
//! ```
//!
//! Any file bearing a transfer or application suffix found at startup is
//! either resumed or discarded by the retry policy; none of them is ever
//! visible at the canonical `.rmap` path.

use std::path::{Path, PathBuf};

use super::record::FileKind;

/// Extension of an installed map data file.
pub const DATA_FILE_EXT: &str = "rmap";

/// Suffix of a fetched-but-unapplied diff, appended to the data file name.
pub const DIFF_SUFFIX: &str = ".diff";

/// Suffix of a diff still being transferred.
pub const DIFF_READY_SUFFIX: &str = ".diff.ready";

/// Suffix of a full download still being transferred.
pub const DOWNLOADING_SUFFIX: &str = ".downloading";

/// Suffix of a resume marker for an interrupted full download.
pub const RESUME_SUFFIX: &str = ".resume";

/// Suffix of a diff application staging file.
pub const APPLYING_SUFFIX: &str = ".applying";

/// Extension of the per-region derived index directory.
pub const INDEX_DIR_EXT: &str = "idx";

/// Directory holding all files of one data version.
pub fn version_dir(data_dir: &Path, version: i64) -> PathBuf {
    data_dir.join(version.to_string())
}

fn base_name(name: &str) -> String {
    format!("{name}.{DATA_FILE_EXT}")
}

/// Canonical path of an installed file kind.
pub fn file_path(data_dir: &Path, version: i64, name: &str, kind: FileKind) -> PathBuf {
    let file = match kind {
        FileKind::FullData => base_name(name),
        FileKind::Diff => format!("{}{}", base_name(name), DIFF_SUFFIX),
    };
    version_dir(data_dir, version).join(file)
}

/// Path a transfer writes to while a download of `kind` is in progress.
pub fn download_path(data_dir: &Path, version: i64, name: &str, kind: FileKind) -> PathBuf {
    let file = match kind {
        FileKind::FullData => format!("{}{}", base_name(name), DOWNLOADING_SUFFIX),
        FileKind::Diff => format!("{}{}", base_name(name), DIFF_READY_SUFFIX),
    };
    version_dir(data_dir, version).join(file)
}

/// Resume marker for an interrupted full download.
pub fn resume_path(data_dir: &Path, version: i64, name: &str) -> PathBuf {
    version_dir(data_dir, version).join(format!("{}{}", base_name(name), RESUME_SUFFIX))
}

/// Staging path the diff engine writes the patched output to.
pub fn applying_path(data_dir: &Path, version: i64, name: &str) -> PathBuf {
    version_dir(data_dir, version).join(format!("{}{}", base_name(name), APPLYING_SUFFIX))
}

/// Directory of derived per-region index files for one version.
pub fn index_dir(data_dir: &Path, version: i64, name: &str) -> PathBuf {
    version_dir(data_dir, version).join(format!("{name}.{INDEX_DIR_EXT}"))
}

/// Classification of a file name found during the startup scan.
#[derive(Debug, PartialEq, Eq)]
pub enum ScannedFile<'a> {
    /// A complete installed data file; the captured str is the region name.
    FullData(&'a str),
    /// A fetched-but-unapplied diff.
    Diff(&'a str),
    /// A transfer or application leftover to be resumed or discarded.
    Transient(&'a str),
    /// Not one of ours.
    Unknown,
}

/// Classify a bare file name from a version directory.
pub fn classify(file_name: &str) -> ScannedFile<'_> {
    // Longest suffixes first; ".diff" is a prefix of ".diff.ready".
    for suffix in [
        DIFF_READY_SUFFIX,
        DOWNLOADING_SUFFIX,
        RESUME_SUFFIX,
        APPLYING_SUFFIX,
    ] {
        if let Some(rest) = file_name.strip_suffix(suffix) {
            return match rest.strip_suffix(&format!(".{DATA_FILE_EXT}")) {
                Some(name) => ScannedFile::Transient(name),
                None => ScannedFile::Unknown,
            };
        }
    }
    if let Some(rest) = file_name.strip_suffix(DIFF_SUFFIX) {
        return match rest.strip_suffix(&format!(".{DATA_FILE_EXT}")) {
            Some(name) => ScannedFile::Diff(name),
            None => ScannedFile::Unknown,
        };
    }
    match file_name.strip_suffix(&format!(".{DATA_FILE_EXT}")) {
        Some(name) => ScannedFile::FullData(name),
        None => ScannedFile::Unknown,
    }
}
