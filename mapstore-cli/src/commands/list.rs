//! List command: print the region tree with local status.

use mapstore::Storage;

use super::common::{format_size, open_storage, status_label, EngineOptions};
use crate::error::CliError;

/// Arguments for the list command.
pub struct ListArgs {
    /// Subtree root; the catalog root when absent.
    pub region: Option<String>,
    /// Maximum tree depth to print.
    pub depth: Option<usize>,
}

/// Run the list command.
pub fn run(opts: &EngineOptions, args: ListArgs) -> Result<(), CliError> {
    let storage = open_storage(opts)?;
    let root = args
        .region
        .unwrap_or_else(|| storage.catalog().root_id().clone());
    println!("catalog version {}", storage.data_version());
    print_subtree(&storage, &root, 0, args.depth.unwrap_or(usize::MAX))?;
    Ok(())
}

fn print_subtree(
    storage: &Storage,
    id: &str,
    indent: usize,
    depth: usize,
) -> Result<(), CliError> {
    let (status, _) = storage.node_status(id)?;
    let size = storage
        .catalog()
        .descriptor(id)
        .map(|d| format!("  {}", format_size(d.remote_size)))
        .unwrap_or_default();
    println!("{:indent$}{id}  [{}]{size}", "", status_label(status), indent = indent * 2);

    if depth == 0 {
        return Ok(());
    }
    if let Some(children) = storage.catalog().children(id) {
        for child in children {
            print_subtree(storage, &child, indent + 1, depth - 1)?;
        }
    }
    Ok(())
}
