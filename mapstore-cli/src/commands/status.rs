//! Status command: detailed local state of one region.

use super::common::{format_size, open_storage, status_label, EngineOptions};
use crate::error::CliError;

/// Arguments for the status command.
pub struct StatusArgs {
    pub region: String,
}

/// Run the status command.
pub fn run(opts: &EngineOptions, args: StatusArgs) -> Result<(), CliError> {
    let storage = open_storage(opts)?;
    let region = &args.region;

    let (status, progress) = storage.node_status(region)?;
    println!("{region}: {}", status_label(status));
    if !progress.is_unknown() && progress.bytes_total > 0 {
        println!(
            "  progress: {} / {}",
            format_size(progress.bytes_downloaded),
            format_size(progress.bytes_total)
        );
    }
    if let Some(version) = storage.latest_version(region) {
        println!(
            "  local version: {} (catalog {})",
            version,
            storage.data_version()
        );
    }

    let info = storage.update_info(region)?;
    if info.num_files > 0 {
        println!(
            "  update: {} file(s), {} to download, {} on disk after",
            info.num_files,
            format_size(info.update_size),
            if info.size_difference >= 0 {
                format!("+{}", format_size(info.size_difference as u64))
            } else {
                format!("-{}", format_size(info.size_difference.unsigned_abs()))
            }
        );
    }

    if !storage.catalog().is_leaf(region) {
        let groups = storage.children_in_groups(region)?;
        println!(
            "  children: {} with local data, {} available",
            groups.downloaded.len(),
            groups.available.len()
        );
        let queued = storage.queued_children(region)?;
        if !queued.is_empty() {
            println!("  queued: {}", queued.join(", "));
        }
    }
    Ok(())
}
