//! Shared plumbing for CLI commands: engine construction and formatting.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mapstore::catalog::RegionId;
use mapstore::diffs::DiffInfo;
use mapstore::policy::RetryPolicy;
use mapstore::transfer::HttpTransfer;
use mapstore::{load_catalog, NodeStatus, Storage, StorageConfig, StorageError};
use serde::Deserialize;
use tracing::debug;

use crate::error::CliError;
use crate::patch::ReplacementPatcher;

/// Engine settings resolved from the global CLI arguments.
pub struct EngineOptions {
    pub data_dir: PathBuf,
    pub server: Option<String>,
    pub catalog: PathBuf,
    pub diffs: Option<PathBuf>,
    pub concurrency: usize,
}

impl EngineOptions {
    /// The mirror URL, required by commands that hit the network.
    pub fn server_url(&self) -> Result<&str, CliError> {
        self.server.as_deref().ok_or_else(|| {
            CliError::Config("no mirror configured; pass --server <url>".to_string())
        })
    }
}

/// Build the storage engine from the resolved options.
///
/// Startup scans the data directory and restores any queue persisted by an
/// interrupted run, so even read-only commands see in-flight state.
pub fn open_storage(opts: &EngineOptions) -> Result<Storage, CliError> {
    debug!(catalog = %opts.catalog.display(), "loading catalog");
    let json =
        fs::read_to_string(&opts.catalog).map_err(|e| CliError::io(&opts.catalog, e))?;
    let catalog = load_catalog(&json).map_err(StorageError::from)?;

    let config = StorageConfig {
        data_dir: opts.data_dir.clone(),
        server_url: opts.server.clone().unwrap_or_default(),
        concurrency: opts.concurrency,
        retry: RetryPolicy::default(),
    };
    let mut storage = Storage::new(
        config,
        catalog,
        Arc::new(HttpTransfer::new()),
        Arc::new(ReplacementPatcher),
    )?;

    if let Some(path) = &opts.diffs {
        storage.set_diffs(load_diffs(path)?);
    }
    Ok(storage)
}

/// One entry of the diff index document.
#[derive(Debug, Deserialize)]
struct DiffEntry {
    base: i64,
    target: i64,
    size: u64,
    sha1: String,
}

/// Load a diff index: a JSON object mapping region ids to diff entries.
fn load_diffs(path: &Path) -> Result<HashMap<RegionId, DiffInfo>, CliError> {
    let json = fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    let entries: HashMap<RegionId, DiffEntry> = serde_json::from_str(&json)
        .map_err(|e| CliError::Catalog(format!("malformed diff index: {e}")))?;
    Ok(entries
        .into_iter()
        .map(|(region, entry)| {
            (
                region,
                DiffInfo {
                    base_version: entry.base,
                    target_version: entry.target,
                    size: entry.size,
                    output_sha1_base64: entry.sha1,
                },
            )
        })
        .collect())
}

/// Short human label for a node status.
pub fn status_label(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::NotDownloaded => "not downloaded",
        NodeStatus::InQueue => "queued",
        NodeStatus::Downloading => "downloading",
        NodeStatus::Applying => "applying diff",
        NodeStatus::OnDisk => "on disk",
        NodeStatus::OnDiskOutOfDate => "out of date",
        NodeStatus::PartlyDownloaded => "partly downloaded",
        NodeStatus::DownloadFailed => "failed",
    }
}

/// Format a byte count with a binary unit suffix.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
