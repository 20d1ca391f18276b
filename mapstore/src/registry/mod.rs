//! Local file bookkeeping: what is installed, where, and at which version.

pub mod paths;
mod record;
#[allow(clippy::module_inception)]
mod registry;

pub use record::{FileKind, LocalFileRecord};
pub use registry::{LocalFileRegistry, ScanReport};
