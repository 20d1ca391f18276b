//! Diff application: old file + diff payload -> new file, or a typed failure.
//!
//! Per job the flow is: locate the base full-data file, drive the opaque
//! patch stream chunk by chunk into a staging file (committed atomically),
//! rename the staging file to the final path, re-validate integrity, and
//! clean up. Cancellation is cooperative: the token is checked between
//! chunks and right before the final rename, and a cancelled job leaves the
//! pre-existing full-data file untouched.
//!
//! On `Applied` the diff payload is deleted; on `Failed` and `Cancelled` it
//! is preserved so the retry policy can choose between retrying the diff and
//! falling back to a full download.

use std::io::{self, Write};
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fileops::{self, FileOpsError};
use crate::integrity::{self, IntegrityError};

use super::patcher::DiffPatcher;

/// Everything a diff application job needs.
#[derive(Debug, Clone)]
pub struct ApplyDiffParams {
    pub region: String,
    /// Installed full-data file the diff applies on top of.
    pub old_file: PathBuf,
    /// Downloaded diff payload.
    pub diff_file: PathBuf,
    /// Staging path (`*.applying`) the patched output is committed to.
    pub staging: PathBuf,
    /// Final full-data path at the target version.
    pub output: PathBuf,
    /// Expected digest of the patched output.
    pub output_sha1_base64: String,
}

/// Cause of a failed diff application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffFailure {
    /// There is no local full-data file to apply the diff on.
    BaseMissing,
    /// The patched output did not match the expected digest.
    Integrity,
    /// The patch primitive rejected the inputs.
    Patch(String),
    /// Filesystem trouble outside the primitive.
    Io(String),
}

/// Terminal state of a diff application job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffResult {
    Applied,
    Cancelled,
    Failed(DiffFailure),
}

/// Run one diff application to completion. Blocking; callers run it on a
/// worker thread.
pub fn apply_diff(
    params: &ApplyDiffParams,
    patcher: &dyn DiffPatcher,
    cancel: &CancellationToken,
) -> DiffResult {
    if !params.old_file.exists() {
        return DiffResult::Failed(DiffFailure::BaseMissing);
    }
    if cancel.is_cancelled() {
        return DiffResult::Cancelled;
    }

    let mut stream = match patcher.open(&params.old_file, &params.diff_file) {
        Ok(stream) => stream,
        Err(e) => return DiffResult::Failed(DiffFailure::Patch(e.to_string())),
    };

    // Patch errors inside the writer closure travel out through this slot;
    // the closure itself can only report io::Error.
    let mut patch_error = None;
    let write_result = fileops::write_then_commit(&params.staging, |w| {
        loop {
            if cancel.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
            }
            match stream.next_chunk() {
                Ok(Some(chunk)) => w.write_all(&chunk)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    patch_error = Some(e);
                    return Err(io::Error::other("patch failed"));
                }
            }
        }
    });

    match write_result {
        Ok(()) => {}
        Err(FileOpsError::Cancelled { .. }) => return DiffResult::Cancelled,
        Err(e) => {
            return match patch_error {
                Some(p) => DiffResult::Failed(DiffFailure::Patch(p.to_string())),
                None => DiffResult::Failed(DiffFailure::Io(e.to_string())),
            }
        }
    }

    // Last checkpoint before the output becomes visible.
    if cancel.is_cancelled() {
        let _ = fileops::delete(&params.staging);
        return DiffResult::Cancelled;
    }

    if let Err(e) = fileops::rename(&params.staging, &params.output) {
        let _ = fileops::delete(&params.staging);
        return DiffResult::Failed(DiffFailure::Io(e.to_string()));
    }

    match integrity::verify(&params.output, &params.output_sha1_base64) {
        Ok(()) => {}
        Err(IntegrityError::DigestMismatch { .. }) => {
            warn!(region = %params.region, "patched output failed integrity check");
            let _ = fileops::delete(&params.output);
            return DiffResult::Failed(DiffFailure::Integrity);
        }
        Err(IntegrityError::ReadFailed { source, .. }) => {
            let _ = fileops::delete(&params.output);
            return DiffResult::Failed(DiffFailure::Io(source.to_string()));
        }
    }

    if let Err(e) = fileops::delete(&params.diff_file) {
        warn!(region = %params.region, error = %e, "failed to delete applied diff payload");
    }
    info!(region = %params.region, output = %params.output.display(), "diff applied");
    DiffResult::Applied
}
