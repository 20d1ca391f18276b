//! Download command: fetch and install regions, driving the queue to idle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};
use mapstore::catalog::RegionId;
use mapstore::{NodeStatus, Storage};

use super::common::{open_storage, EngineOptions};
use crate::error::CliError;

/// Arguments for the download command.
pub struct DownloadArgs {
    pub regions: Vec<String>,
    pub full: bool,
}

/// Run the download command.
pub async fn run(opts: &EngineOptions, args: DownloadArgs) -> Result<(), CliError> {
    opts.server_url()?;
    let mut storage = open_storage(opts)?;

    for region in &args.regions {
        storage.download_node(region, !args.full)?;
    }

    let leaves = leaves_of(&storage, &args.regions);
    let failed = drive_queue(&mut storage, leaves).await;
    if failed.is_empty() {
        println!("Done.");
        Ok(())
    } else {
        report_failures(&storage, &failed);
        Err(CliError::DownloadsFailed(failed.len()))
    }
}

/// Print each failed leaf with the recorded cause when one exists.
pub fn report_failures(storage: &Storage, failed: &[RegionId]) {
    for region in failed {
        match storage.last_error(region) {
            Some(err) => eprintln!("failed: {region} ({err})"),
            None => eprintln!("failed: {region}"),
        }
    }
}

/// Unique leaves under the given nodes, in request order.
pub fn leaves_of(storage: &Storage, regions: &[String]) -> Vec<RegionId> {
    let mut seen = HashSet::new();
    let mut leaves = Vec::new();
    for region in regions {
        for leaf in storage.catalog().leaves_under(region) {
            if seen.insert(leaf.clone()) {
                leaves.push(leaf);
            }
        }
    }
    leaves
}

/// Drain the queue with a live progress bar; returns the leaves that ended
/// up failed. Delayed retries are not waited for, so a transient failure
/// shows up here and a rerun picks it up.
pub async fn drive_queue(storage: &mut Storage, leaves: Vec<RegionId>) -> Vec<RegionId> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:32} {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let watched: Arc<HashSet<RegionId>> = Arc::new(leaves.iter().cloned().collect());
    let tally: Arc<Mutex<HashMap<RegionId, (u64, u64)>>> = Arc::new(Mutex::new(HashMap::new()));

    let subscription = storage.subscribe(
        Box::new({
            let bar = bar.clone();
            let watched = Arc::clone(&watched);
            move |region, status| {
                if !watched.contains(region) {
                    return;
                }
                match status {
                    NodeStatus::OnDisk => bar.println(format!("installed: {region}")),
                    NodeStatus::DownloadFailed => bar.println(format!("failed: {region}")),
                    _ => {}
                }
            }
        }),
        Box::new({
            let bar = bar.clone();
            let watched = Arc::clone(&watched);
            let tally = Arc::clone(&tally);
            move |region, progress| {
                if !watched.contains(region) || progress.is_unknown() {
                    return;
                }
                if let Ok(mut map) = tally.lock() {
                    map.insert(
                        region.clone(),
                        (progress.bytes_downloaded, progress.bytes_total),
                    );
                    bar.set_length(map.values().map(|(_, t)| t).sum());
                    bar.set_position(map.values().map(|(d, _)| d).sum());
                }
            }
        }),
    );

    storage.run_until_idle().await;
    storage.unsubscribe(subscription);
    bar.finish_and_clear();

    leaves
        .into_iter()
        .filter(|leaf| {
            matches!(
                storage.node_status(leaf),
                Ok((NodeStatus::DownloadFailed, _))
            )
        })
        .collect()
}
