//! Update command: bring installed regions up to the catalog version.

use super::common::{format_size, open_storage, EngineOptions};
use super::download::{drive_queue, leaves_of, report_failures};
use crate::error::CliError;

/// Arguments for the update command.
pub struct UpdateArgs {
    /// Regions to update; the whole catalog when empty.
    pub regions: Vec<String>,
}

/// Run the update command.
pub async fn run(opts: &EngineOptions, args: UpdateArgs) -> Result<(), CliError> {
    opts.server_url()?;
    let mut storage = open_storage(opts)?;

    let regions = if args.regions.is_empty() {
        vec![storage.catalog().root_id().clone()]
    } else {
        args.regions.clone()
    };

    let mut num_files = 0;
    let mut update_size = 0;
    for region in &regions {
        let info = storage.update_info(region)?;
        num_files += info.num_files;
        update_size += info.update_size;
    }
    if num_files == 0 {
        println!("Everything is up to date.");
        return Ok(());
    }
    println!(
        "Updating {} region(s), {} to download",
        num_files,
        format_size(update_size)
    );

    for region in &regions {
        storage.update_node(region)?;
    }

    let leaves = leaves_of(&storage, &regions);
    let failed = drive_queue(&mut storage, leaves).await;
    if failed.is_empty() {
        println!("Done.");
        Ok(())
    } else {
        report_failures(&storage, &failed);
        Err(CliError::DownloadsFailed(failed.len()))
    }
}
