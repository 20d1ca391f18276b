//! Incremental updates: the server-side diff index and the engine that turns
//! an installed file plus a diff payload into the next version.

mod apply;
mod patcher;
mod source;

pub use apply::{apply_diff, ApplyDiffParams, DiffFailure, DiffResult};
pub use patcher::{DiffPatcher, DiffStream, PatchError};
pub use source::{DiffInfo, DiffSource, DiffsStatus};
