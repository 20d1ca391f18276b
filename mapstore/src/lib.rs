//! Mapstore - versioned regional map storage and incremental updates
//!
//! This library manages the lifecycle of versioned, hierarchically-organized
//! map data files on a client device: discovering what is installed, queuing
//! and downloading what is missing or outdated, applying space-saving binary
//! diffs instead of full re-downloads, verifying integrity, and reconciling
//! failures, while a tree of regions reflects live, aggregated status and
//! progress.
//!
//! The entry point is [`storage::Storage`]; see its module documentation for
//! the concurrency model.

pub mod catalog;
pub mod diffs;
pub mod error;
pub mod fileops;
pub mod integrity;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod transfer;

pub use catalog::{load_catalog, RegionCatalog, RegionId};
pub use error::{StorageError, StorageResult};
pub use storage::{NodeStatus, Progress, Storage, StorageConfig};
