//! Events marshalled from worker tasks back onto the control plane.
//!
//! Workers never touch shared state; they post one of these and the control
//! loop applies the result. Every event carries the per-region generation it
//! was spawned under, so results of a download cancelled in the meantime are
//! recognized as stale and dropped.

use crate::catalog::RegionId;
use crate::diffs::DiffResult;
use crate::integrity::IntegrityError;
use crate::registry::FileKind;
use crate::transfer::TransferError;

/// A worker completion or timer marshalled onto the control plane.
#[derive(Debug)]
pub enum StorageEvent {
    /// Bytes moved on an active transfer.
    TransferProgress {
        region: RegionId,
        generation: u64,
        bytes_downloaded: u64,
        bytes_total: u64,
    },

    /// A transfer resolved.
    TransferFinished {
        region: RegionId,
        kind: FileKind,
        version: i64,
        generation: u64,
        result: Result<u64, TransferError>,
    },

    /// Post-download integrity check resolved.
    VerifyFinished {
        region: RegionId,
        version: i64,
        generation: u64,
        result: Result<(), IntegrityError>,
    },

    /// A diff application job resolved.
    DiffFinished {
        region: RegionId,
        version: i64,
        generation: u64,
        result: DiffResult,
    },

    /// A delayed retry timer fired.
    RetryReady { region: RegionId },
}
