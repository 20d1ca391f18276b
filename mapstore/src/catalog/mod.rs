//! The region catalog: an immutable, hierarchically-organized index of every
//! downloadable map file known for one data version.
//!
//! Loaded once per catalog version from a JSON document and replaced
//! wholesale when a newer catalog is fetched, never mutated in place. The
//! orchestrator refuses the swap while downloads or diff applications are in
//! flight so descriptors cannot vanish mid-operation.

mod loader;
mod node;
mod tree;

pub use loader::load_catalog;
pub use node::{FileDescriptor, RegionId, RegionNode};
pub use tree::{Found, RegionCatalog};

use thiserror::Error;

/// Errors produced while loading or querying a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The document is not valid JSON.
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document declares a format version this loader does not support.
    #[error("unsupported catalog format version {0}")]
    UnsupportedFormat(u32),

    /// The hierarchy violates a structural invariant.
    #[error("corrupt catalog: {0}")]
    Corrupt(String),

    /// A descriptor was requested for a group node.
    #[error("region {0} is not a leaf")]
    NotLeaf(String),

    /// The region id is not present in the catalog.
    #[error("unknown region: {0}")]
    UnknownRegion(String),
}

impl From<CatalogError> for crate::error::StorageError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownRegion(id) => Self::UnknownRegion(id),
            other => Self::CatalogCorrupt(other.to_string()),
        }
    }
}
