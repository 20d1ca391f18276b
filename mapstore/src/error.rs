//! Error types exposed across the storage engine's public boundary.
//!
//! Every orchestrator operation reports failures as values of [`StorageError`];
//! nothing panics across the public API. Transient network failures are
//! handled internally by the retry policy and surface only as a region status
//! change, so callers mostly see the structural errors (`UnknownRegion`,
//! `Busy`, `CatalogCorrupt`).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The region id does not exist in the loaded catalog.
    #[error("unknown region: {0}")]
    UnknownRegion(String),

    /// The catalog cannot be replaced while downloads or diff jobs are active.
    #[error("storage is busy: {0}")]
    Busy(String),

    /// A local file record for the same (region, version) already exists and
    /// is incompatible with the one being registered.
    #[error("conflicting registration for {region} v{version}")]
    Conflict { region: String, version: i64 },

    /// A diff was requested but no matching base file is on disk.
    #[error("no base file for diff of {region} (base version {base_version})")]
    BaseMissing { region: String, base_version: i64 },

    /// The diff index has no entry for the region at the target version.
    #[error("no diff available for {0}")]
    DiffUnavailable(String),

    /// A downloaded or patched file failed the content hash check.
    #[error("integrity check failed for {path}")]
    FailedIntegrity { path: PathBuf },

    /// The transfer layer could not reach any server.
    #[error("no connection")]
    NoConnection,

    /// The server answered with an error status.
    #[error("server error: {0}")]
    ServerError(String),

    /// The operation was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// The catalog document is malformed.
    #[error("catalog corrupt: {0}")]
    CatalogCorrupt(String),

    /// An underlying filesystem operation failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Helper for wrapping an [`io::Error`] with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_region_display() {
        let err = StorageError::UnknownRegion("Atlantis".to_string());
        assert_eq!(err.to_string(), "unknown region: Atlantis");
    }

    #[test]
    fn test_conflict_display() {
        let err = StorageError::Conflict {
            region: "Freedonia".to_string(),
            version: 220101,
        };
        assert!(err.to_string().contains("Freedonia"));
        assert!(err.to_string().contains("220101"));
    }

    #[test]
    fn test_catalog_error_conversion_keeps_unknown_region() {
        use crate::catalog::CatalogError;
        let err: StorageError = CatalogError::UnknownRegion("Atlantis".to_string()).into();
        assert!(matches!(err, StorageError::UnknownRegion(_)));
        let err: StorageError = CatalogError::Corrupt("cycle".to_string()).into();
        assert!(matches!(err, StorageError::CatalogCorrupt(_)));
    }

    #[test]
    fn test_io_error_carries_source() {
        let err = StorageError::io(
            "/tmp/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
