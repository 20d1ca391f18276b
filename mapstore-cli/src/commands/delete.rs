//! Delete command: remove regions' local files across all versions.

use super::common::{open_storage, EngineOptions};
use crate::error::CliError;

/// Arguments for the delete command.
pub struct DeleteArgs {
    pub regions: Vec<String>,
}

/// Run the delete command.
pub fn run(opts: &EngineOptions, args: DeleteArgs) -> Result<(), CliError> {
    let mut storage = open_storage(opts)?;
    for region in &args.regions {
        storage.delete_node(region)?;
        println!("deleted: {region}");
    }
    Ok(())
}
