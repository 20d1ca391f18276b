//! Opaque binary-patch primitive.
//!
//! The diff wire format and patching algorithm are not this crate's concern.
//! The engine drives a [`DiffStream`] chunk by chunk so that cancellation can
//! be observed between chunks, never mid-chunk.

use std::io;
use std::path::Path;

use bytes::Bytes;
use thiserror::Error;

/// Errors from the patch primitive.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed diff: {0}")]
    Malformed(String),
}

/// Opens patch streams over an old file and a diff payload.
pub trait DiffPatcher: Send + Sync + 'static {
    /// Begin patching `old` with `diff`.
    fn open(&self, old: &Path, diff: &Path) -> Result<Box<dyn DiffStream>, PatchError>;
}

/// Produces the patched output incrementally.
pub trait DiffStream: Send {
    /// Next chunk of patched output, or `None` when the output is complete.
    fn next_chunk(&mut self) -> Result<Option<Bytes>, PatchError>;
}
