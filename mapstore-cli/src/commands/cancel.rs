//! Cancel command: drop queued downloads left behind by an interrupted run.
//!
//! Startup restores the queue persisted in `settings.ini`, so cancelling
//! here clears both the persisted entries and any partial files on disk.

use super::common::{open_storage, EngineOptions};
use crate::error::CliError;

/// Arguments for the cancel command.
pub struct CancelArgs {
    /// Regions to cancel; everything queued when empty.
    pub regions: Vec<String>,
}

/// Run the cancel command.
pub fn run(opts: &EngineOptions, args: CancelArgs) -> Result<(), CliError> {
    let mut storage = open_storage(opts)?;
    let regions = if args.regions.is_empty() {
        let root = storage.catalog().root_id().clone();
        storage.queued_children(&root)?
    } else {
        args.regions.clone()
    };
    if regions.is_empty() {
        println!("Nothing queued.");
        return Ok(());
    }
    for region in &regions {
        storage.cancel_node(region)?;
        println!("cancelled: {region}");
    }
    Ok(())
}
