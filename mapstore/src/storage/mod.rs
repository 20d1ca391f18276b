//! The storage orchestrator: public API over the catalog, registry, queue,
//! diff engine and retry policy.
//!
//! # Architecture
//!
//! All mutable state lives in [`Storage`] and is driven from one logical
//! control plane. Workers (transfers, integrity checks, diff applications,
//! retry timers) run as spawned tasks and post [`StorageEvent`]s back over
//! an unbounded channel; they never touch shared state directly. Callers
//! issue operations, then drain the channel with
//! [`Storage::run_until_idle`] (or [`Storage::pump`] for a non-blocking
//! drain).
//!
//! Cancellation ordering: every spawned worker carries the per-region
//! generation current at spawn time. `cancel_node` bumps the generation, so
//! a result from a worker that was already in flight when the cancel landed
//! is recognized as stale and dropped, so a cancelled download can never
//! register its result afterwards.

mod events;
mod observers;
mod progress;
mod status;

pub use events::StorageEvent;
pub use observers::{ObserverSet, ProgressCallback, StatusCallback};
pub use progress::Progress;
pub use status::{aggregate, NodeStatus};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{RegionCatalog, RegionId};
use crate::diffs::{apply_diff, ApplyDiffParams, DiffFailure, DiffInfo, DiffPatcher, DiffResult, DiffSource};
use crate::error::{StorageError, StorageResult};
use crate::fileops;
use crate::integrity::{self, IntegrityError};
use crate::policy::{FailureCause, FailureRecord, RetryAction, RetryPolicy};
use crate::queue::{DownloadQueue, DownloadTask};
use crate::registry::{paths, FileKind, LocalFileRecord, LocalFileRegistry};
use crate::settings::Settings;
use crate::transfer::{FetchRequest, Transfer, TransferError, TransferProgress};

/// Veto hook consulted before a region's installed files are deleted.
/// Returning `false` keeps the files.
pub type WillDeleteCallback = Box<dyn Fn(&RegionId, &LocalFileRecord) -> bool + Send>;

/// Engine configuration.
pub struct StorageConfig {
    /// Root of the on-disk map data tree.
    pub data_dir: PathBuf,
    /// Mirror base URL; files live at `<server_url>/<version>/<file>`.
    pub server_url: String,
    /// Number of concurrent transfer slots.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

/// Result of [`Storage::update_info`]: what an update of a subtree costs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Leaves whose installed version is behind the catalog.
    pub num_files: u32,
    /// Bytes to transfer, counting a diff where one is offered.
    pub update_size: u64,
    /// Largest single full file among the outdated leaves.
    pub max_file_size: u64,
    /// Net change of on-disk size after the update.
    pub size_difference: i64,
}

/// Direct children of a group, split for presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildrenGroups {
    /// Children with installed or in-flight data.
    pub downloaded: Vec<RegionId>,
    /// Children with nothing local.
    pub available: Vec<RegionId>,
}

/// The map-data storage engine.
pub struct Storage {
    catalog: RegionCatalog,
    registry: LocalFileRegistry,
    diffs: DiffSource,
    queue: DownloadQueue,
    settings: Settings,
    policy: RetryPolicy,
    transfer: Arc<dyn Transfer>,
    patcher: Arc<dyn DiffPatcher>,
    observers: ObserverSet,

    events_tx: mpsc::UnboundedSender<StorageEvent>,
    events_rx: mpsc::UnboundedReceiver<StorageEvent>,

    /// Per-region generation; workers spawned under an older generation are
    /// stale.
    generations: HashMap<RegionId, u64>,
    /// Cancellation token per region with in-flight work.
    cancels: HashMap<RegionId, CancellationToken>,
    /// Regions with a running diff application job.
    applying: HashSet<RegionId>,
    /// Diffs found on disk at startup, awaiting diff metadata.
    pending_diffs: Vec<(RegionId, i64)>,
    /// Regions whose last attempt failed, with the cause.
    failed: HashMap<RegionId, FailureRecord>,
    /// Automatic recovery attempts spent per region this cycle.
    spent_attempts: HashMap<RegionId, u32>,
    /// Regions completed during the current queue session; counted as fully
    /// downloaded in progress aggregation until the queue drains.
    just_downloaded: HashSet<RegionId>,

    server_url: String,
    will_delete: Option<WillDeleteCallback>,
}

impl Storage {
    /// Build the engine: open settings, scan the data directory for already
    /// installed files and leftovers, and re-enqueue the persisted queue.
    pub fn new(
        config: StorageConfig,
        catalog: RegionCatalog,
        transfer: Arc<dyn Transfer>,
        patcher: Arc<dyn DiffPatcher>,
    ) -> StorageResult<Self> {
        fs::create_dir_all(&config.data_dir)
            .map_err(|e| StorageError::io(&config.data_dir, e))?;
        let settings = Settings::open(&config.data_dir);
        let mut registry = LocalFileRegistry::new(&config.data_dir);
        let report = registry.scan_disk(|name| catalog.region_for_file(name).cloned());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut storage = Self {
            catalog,
            registry,
            diffs: DiffSource::new(),
            queue: DownloadQueue::new(config.concurrency),
            settings,
            policy: config.retry,
            transfer,
            patcher,
            observers: ObserverSet::new(),
            events_tx,
            events_rx,
            generations: HashMap::new(),
            cancels: HashMap::new(),
            applying: HashSet::new(),
            pending_diffs: report.pending_diffs,
            failed: HashMap::new(),
            spent_attempts: HashMap::new(),
            just_downloaded: HashSet::new(),
            server_url: config.server_url,
            will_delete: None,
        };
        storage.restore_download_queue();
        Ok(storage)
    }

    /// Install the veto hook consulted before deleting installed files.
    pub fn set_will_delete(&mut self, callback: WillDeleteCallback) {
        self.will_delete = Some(callback);
    }

    pub fn catalog(&self) -> &RegionCatalog {
        &self.catalog
    }

    /// Data version of the loaded catalog.
    pub fn data_version(&self) -> i64 {
        self.catalog.version()
    }

    /// Highest installed version of a leaf region.
    pub fn latest_version(&self, region: &str) -> Option<i64> {
        self.registry.latest_version(region)
    }

    /// Feed the diff index received from the server. Diffs found on disk by
    /// the startup scan are applied now if the index confirms them, and
    /// discarded otherwise.
    pub fn set_diffs(&mut self, diffs: HashMap<RegionId, DiffInfo>) {
        self.diffs.set_diffs(diffs);
        self.apply_pending_diffs();
    }

    /// Replace the catalog wholesale. Refused while any download or diff
    /// application is in flight, so descriptors cannot vanish mid-operation.
    pub fn replace_catalog(&mut self, catalog: RegionCatalog) -> StorageResult<()> {
        if !self.queue.is_empty() || !self.applying.is_empty() {
            return Err(StorageError::Busy(
                "downloads or diff applications in flight".to_string(),
            ));
        }
        info!(
            old_version = self.catalog.version(),
            new_version = catalog.version(),
            "replacing region catalog"
        );
        self.catalog = catalog;
        self.diffs = DiffSource::new();
        self.failed.clear();
        self.spent_attempts.clear();
        self.just_downloaded.clear();
        Ok(())
    }

    // ---- public operations -------------------------------------------------

    /// Queue downloads for every not-yet-installed leaf under `id`.
    pub fn download_node(&mut self, id: &str, prefer_diff: bool) -> StorageResult<()> {
        if !self.catalog.contains(id) {
            return Err(StorageError::UnknownRegion(id.to_string()));
        }
        for leaf in self.unique_leaves(id) {
            self.spent_attempts.remove(&leaf);
            self.failed.remove(&leaf);
            self.enqueue_leaf(&leaf, prefer_diff);
        }
        self.after_queue_change();
        self.notify_leaves(id);
        Ok(())
    }

    /// Cancel queued and active downloads and running diff jobs for every
    /// leaf under `id`, deleting partial transfer files.
    pub fn cancel_node(&mut self, id: &str) -> StorageResult<()> {
        if !self.catalog.contains(id) {
            return Err(StorageError::UnknownRegion(id.to_string()));
        }
        for leaf in self.unique_leaves(id) {
            self.cancel_leaf(&leaf);
        }
        self.after_queue_change();
        self.notify_leaves(id);
        Ok(())
    }

    /// Delete installed files of every leaf under `id`, honoring the
    /// will-delete veto hook.
    pub fn delete_node(&mut self, id: &str) -> StorageResult<()> {
        if !self.catalog.contains(id) {
            return Err(StorageError::UnknownRegion(id.to_string()));
        }
        for leaf in self.unique_leaves(id) {
            if let Some(record) = self.registry.latest_record(&leaf).cloned() {
                let vetoed = self
                    .will_delete
                    .as_ref()
                    .is_some_and(|callback| !callback(&leaf, &record));
                if vetoed {
                    debug!(region = %leaf, "deletion vetoed");
                    continue;
                }
            }
            self.cancel_leaf(&leaf);
            self.registry
                .delete_all_versions(&leaf, FileKind::FullData, false)?;
            self.registry
                .delete_all_versions(&leaf, FileKind::Diff, false)?;
            self.just_downloaded.remove(&leaf);
        }
        self.after_queue_change();
        self.notify_leaves(id);
        Ok(())
    }

    /// Re-download every leaf under `id` whose installed version is behind
    /// the catalog, preferring diffs.
    pub fn update_node(&mut self, id: &str) -> StorageResult<()> {
        if !self.catalog.contains(id) {
            return Err(StorageError::UnknownRegion(id.to_string()));
        }
        for leaf in self.unique_leaves(id) {
            let outdated = self
                .registry
                .latest_version(&leaf)
                .is_some_and(|v| v != self.catalog.version());
            if outdated {
                self.spent_attempts.remove(&leaf);
                self.failed.remove(&leaf);
                self.enqueue_leaf(&leaf, true);
            }
        }
        self.after_queue_change();
        self.notify_leaves(id);
        Ok(())
    }

    /// Re-enqueue leaves under `id` whose last attempt failed. Resets the
    /// automatic-attempt accounting, so the recovery fallbacks run again.
    pub fn retry_node(&mut self, id: &str) -> StorageResult<()> {
        if !self.catalog.contains(id) {
            return Err(StorageError::UnknownRegion(id.to_string()));
        }
        for leaf in self.unique_leaves(id) {
            if self.failed.remove(&leaf).is_some() {
                self.spent_attempts.remove(&leaf);
                self.enqueue_leaf(&leaf, true);
            }
        }
        self.after_queue_change();
        self.notify_leaves(id);
        Ok(())
    }

    /// Derived status and progress of a region. Group nodes aggregate over
    /// their leaves, each disputed leaf counted once.
    pub fn node_status(&self, id: &str) -> StorageResult<(NodeStatus, Progress)> {
        if !self.catalog.contains(id) {
            return Err(StorageError::UnknownRegion(id.to_string()));
        }
        if self.catalog.is_leaf(id) {
            return Ok((self.leaf_status(id), self.leaf_progress(id)));
        }
        let mut statuses = Vec::new();
        let mut progress = Progress::default();
        for leaf in self.unique_leaves(id) {
            statuses.push(self.leaf_status(&leaf));
            progress += self.leaf_progress(&leaf);
        }
        Ok((aggregate(statuses), progress))
    }

    /// The error behind a leaf's `DownloadFailed` status, when one is
    /// recorded for it.
    pub fn last_error(&self, id: &str) -> Option<StorageError> {
        let record = self.failed.get(id)?;
        Some(match record.cause {
            FailureCause::NoConnection => StorageError::NoConnection,
            FailureCause::ServerError => {
                StorageError::ServerError(format!("download of {id} was rejected"))
            }
            FailureCause::FailedIntegrity => StorageError::FailedIntegrity {
                path: self
                    .catalog
                    .descriptor(id)
                    .map(|d| {
                        paths::file_path(
                            self.registry.data_dir(),
                            self.catalog.version(),
                            &d.name,
                            FileKind::FullData,
                        )
                    })
                    .unwrap_or_default(),
            },
            FailureCause::DiffUnavailable => StorageError::DiffUnavailable(id.to_string()),
            FailureCause::BaseMissing => StorageError::BaseMissing {
                region: id.to_string(),
                base_version: self
                    .diffs
                    .info_for(id)
                    .map(|info| info.base_version)
                    .unwrap_or_default(),
            },
            FailureCause::Cancelled => StorageError::Cancelled,
        })
    }

    /// Direct children of `parent` that are queued, downloading or applying.
    pub fn queued_children(&self, parent: &str) -> StorageResult<Vec<RegionId>> {
        let children = self
            .catalog
            .children(parent)
            .ok_or_else(|| StorageError::UnknownRegion(parent.to_string()))?;
        let mut queued = Vec::new();
        for child in children {
            let (status, _) = self.node_status(&child)?;
            if status.is_in_flight() {
                queued.push(child);
            }
        }
        Ok(queued)
    }

    /// Direct children of `parent`, split into those with local or in-flight
    /// data and those with nothing yet.
    pub fn children_in_groups(&self, parent: &str) -> StorageResult<ChildrenGroups> {
        let children = self
            .catalog
            .children(parent)
            .ok_or_else(|| StorageError::UnknownRegion(parent.to_string()))?;
        let mut groups = ChildrenGroups::default();
        for child in children {
            let has_local = self.unique_leaves(&child).into_iter().any(|leaf| {
                self.registry.latest_version(&leaf).is_some()
                    || self.queue.contains(&leaf)
                    || self.applying.contains(&leaf)
            });
            if has_local {
                groups.downloaded.push(child);
            } else {
                groups.available.push(child);
            }
        }
        Ok(groups)
    }

    /// What updating the subtree under `id` would cost.
    pub fn update_info(&self, id: &str) -> StorageResult<UpdateInfo> {
        if !self.catalog.contains(id) {
            return Err(StorageError::UnknownRegion(id.to_string()));
        }
        let mut info = UpdateInfo::default();
        for leaf in self.unique_leaves(id) {
            let Some(local) = self.registry.latest_version(&leaf) else {
                continue;
            };
            if local == self.catalog.version() {
                continue;
            }
            let Ok(descriptor) = self.catalog.descriptor(&leaf) else {
                continue;
            };
            info.num_files += 1;
            info.update_size += self
                .diffs
                .size_to_download(&leaf)
                .unwrap_or(descriptor.remote_size);
            info.max_file_size = info.max_file_size.max(descriptor.remote_size);
            let local_size = self
                .registry
                .latest_record(&leaf)
                .and_then(|r| r.size(FileKind::FullData))
                .unwrap_or(0);
            info.size_difference += descriptor.remote_size as i64 - local_size as i64;
        }
        Ok(info)
    }

    /// Aggregate byte progress over an explicit set of leaf regions,
    /// counting queued bytes and regions completed this session.
    pub fn overall_progress(&self, regions: &[RegionId]) -> Progress {
        let mut seen = HashSet::new();
        let mut progress = Progress::default();
        for region in regions {
            if !seen.insert(region.clone()) {
                continue;
            }
            if self.queue.contains(region) || self.just_downloaded.contains(region) {
                progress += self.leaf_progress(region);
            }
        }
        progress
    }

    /// Register an observer; callbacks fire on the control plane after each
    /// settled mutation.
    pub fn subscribe(&mut self, on_status: StatusCallback, on_progress: ProgressCallback) -> u64 {
        self.observers.subscribe(on_status, on_progress)
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        self.observers.unsubscribe(id)
    }

    // ---- event loop --------------------------------------------------------

    /// Apply every already-posted worker event without waiting.
    pub fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    /// Process worker events until every queued download and diff job has
    /// settled. Delayed retries scheduled by the policy are left pending.
    pub async fn run_until_idle(&mut self) {
        while !self.queue.is_empty() || !self.applying.is_empty() {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: StorageEvent) {
        match event {
            StorageEvent::TransferProgress {
                region,
                generation,
                bytes_downloaded,
                bytes_total,
            } => {
                if self.is_stale(&region, generation) {
                    return;
                }
                self.queue.on_progress(&region, bytes_downloaded);
                self.notify_progress_walk(&region, Progress::new(bytes_downloaded, bytes_total));
            }
            StorageEvent::TransferFinished {
                region,
                kind,
                version,
                generation,
                result,
            } => {
                if self.is_stale(&region, generation) {
                    debug!(region = %region, "dropping stale transfer result");
                    return;
                }
                match result {
                    Ok(_) => self.on_transfer_ok(&region, kind, version, generation),
                    Err(err) => self.on_transfer_err(&region, kind, version, err),
                }
            }
            StorageEvent::VerifyFinished {
                region,
                version,
                generation,
                result,
            } => {
                if self.is_stale(&region, generation) {
                    return;
                }
                match result {
                    Ok(()) => self.on_full_data_verified(&region, version),
                    Err(IntegrityError::DigestMismatch { .. }) => {
                        self.on_integrity_failure(&region, version);
                    }
                    Err(IntegrityError::ReadFailed { .. }) => {
                        self.finish_failed(&region, FileKind::FullData, FailureCause::ServerError);
                    }
                }
            }
            StorageEvent::DiffFinished {
                region,
                version,
                generation,
                result,
            } => {
                if self.is_stale(&region, generation) {
                    return;
                }
                self.applying.remove(&region);
                self.queue.complete(&region, FileKind::Diff);
                match result {
                    DiffResult::Applied => {
                        self.diffs.mark_applied(&region);
                        self.on_installed(&region, version);
                    }
                    DiffResult::Cancelled => {
                        self.after_queue_change();
                        self.notify_status_walk(&region);
                    }
                    DiffResult::Failed(DiffFailure::BaseMissing) => {
                        self.record_failure(&region, FailureCause::BaseMissing);
                    }
                    DiffResult::Failed(DiffFailure::Integrity) => {
                        self.record_failure(&region, FailureCause::FailedIntegrity);
                    }
                    DiffResult::Failed(DiffFailure::Patch(reason)) => {
                        warn!(region = %region, reason = %reason, "diff rejected by patcher");
                        self.diffs.remove_diff_for(&region);
                        self.record_failure(&region, FailureCause::DiffUnavailable);
                    }
                    DiffResult::Failed(DiffFailure::Io(reason)) => {
                        warn!(region = %region, reason = %reason, "diff application i/o failure");
                        self.record_failure(&region, FailureCause::ServerError);
                    }
                }
            }
            StorageEvent::RetryReady { region } => {
                if self.failed.remove(&region).is_some() {
                    self.enqueue_leaf(&region, true);
                    self.after_queue_change();
                    self.notify_status_walk(&region);
                }
            }
        }
    }

    // ---- enqueue and scheduling --------------------------------------------

    fn restore_download_queue(&mut self) {
        let saved = self.settings.download_queue();
        if saved.is_empty() {
            return;
        }
        info!(regions = saved.len(), "restoring persisted download queue");
        for region in saved {
            if self.catalog.contains(&region) {
                let _ = self.download_node(&region, true);
            }
        }
    }

    /// Leaves under `id`, each disputed leaf once.
    fn unique_leaves(&self, id: &str) -> Vec<RegionId> {
        let mut seen = HashSet::new();
        self.catalog
            .leaves_under(id)
            .into_iter()
            .filter(|leaf| seen.insert(leaf.clone()))
            .collect()
    }

    /// Queue one leaf unless it is already installed, queued or applying.
    /// Chooses a diff task only when the diff index offers one for the
    /// catalog version and its base file is on disk.
    fn enqueue_leaf(&mut self, region: &str, prefer_diff: bool) -> bool {
        let Ok(descriptor) = self.catalog.descriptor(region) else {
            return false;
        };
        let version = self.catalog.version();
        if self.registry.latest_version(region) == Some(version) {
            return false;
        }
        if self.queue.contains(region) || self.applying.contains(region) {
            return false;
        }

        let diff = if prefer_diff {
            self.diffs.info_for(region).filter(|info| {
                info.target_version == version
                    && self
                        .registry
                        .record(region, info.base_version)
                        .is_some_and(|r| r.on_disk(FileKind::FullData))
            })
        } else {
            None
        };
        let (kind, expected_size) = match diff {
            Some(info) => (FileKind::Diff, info.size),
            None => (FileKind::FullData, descriptor.remote_size),
        };
        self.queue
            .enqueue(DownloadTask::new(region, kind, version, expected_size))
    }

    /// Persist the queue, fill free transfer slots, and when the session is
    /// over, run the retry plan and close the progress session.
    fn after_queue_change(&mut self) {
        self.persist_queue();
        self.schedule();
        if self.queue.is_empty() && self.applying.is_empty() {
            self.schedule_retries();
            if self.queue.is_empty() {
                self.just_downloaded.clear();
            }
        }
    }

    fn persist_queue(&mut self) {
        let regions = self.queue.regions();
        if let Err(err) = self.settings.save_download_queue(&regions) {
            warn!(error = %err, "failed to persist download queue");
        }
    }

    fn schedule(&mut self) {
        for task in self.queue.activate_ready() {
            self.start_task(task);
        }
    }

    fn start_task(&mut self, task: DownloadTask) {
        let Ok(descriptor) = self.catalog.descriptor(&task.region) else {
            return;
        };
        let name = descriptor.name.clone();
        let generation = self.generation(&task.region);
        let data_dir = self.registry.data_dir().to_path_buf();

        if let Err(err) = self.registry.prepare_place(task.version) {
            warn!(region = %task.region, error = %err, "cannot prepare version directory");
            self.finish_failed(&task.region, task.kind, FailureCause::ServerError);
            return;
        }

        let dest = paths::download_path(&data_dir, task.version, &name, task.kind);
        // Already-downloaded fast path: a complete payload from an earlier
        // session skips the network entirely.
        let on_disk = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
        if task.expected_size > 0 && on_disk == task.expected_size {
            debug!(region = %task.region, "payload already downloaded");
            let _ = self.events_tx.send(StorageEvent::TransferFinished {
                region: task.region,
                kind: task.kind,
                version: task.version,
                generation,
                result: Ok(on_disk),
            });
            return;
        }

        let url = self.remote_url(task.version, &name, task.kind);
        let cancel = self.cancel_token(&task.region);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<TransferProgress>();

        let events = self.events_tx.clone();
        let region = task.region.clone();
        tokio::spawn(async move {
            while let Some(p) = progress_rx.recv().await {
                let _ = events.send(StorageEvent::TransferProgress {
                    region: region.clone(),
                    generation,
                    bytes_downloaded: p.bytes_downloaded,
                    bytes_total: p.bytes_total,
                });
            }
        });

        debug!(region = %task.region, kind = ?task.kind, url = %url, "starting transfer");
        let fetch = self.transfer.fetch(
            FetchRequest {
                url,
                dest,
                resume: task.kind == FileKind::FullData,
            },
            progress_tx,
            cancel,
        );
        let events = self.events_tx.clone();
        let region = task.region.clone();
        let kind = task.kind;
        let version = task.version;
        tokio::spawn(async move {
            let result = fetch.await;
            let _ = events.send(StorageEvent::TransferFinished {
                region,
                kind,
                version,
                generation,
                result,
            });
        });
    }

    fn remote_url(&self, version: i64, name: &str, kind: FileKind) -> String {
        let file = match kind {
            FileKind::FullData => format!("{name}.{}", paths::DATA_FILE_EXT),
            FileKind::Diff => format!("{name}.{}{}", paths::DATA_FILE_EXT, paths::DIFF_SUFFIX),
        };
        format!("{}/{version}/{file}", self.server_url.trim_end_matches('/'))
    }

    // ---- completion pipeline -----------------------------------------------

    fn on_transfer_ok(&mut self, region: &str, kind: FileKind, version: i64, generation: u64) {
        match kind {
            FileKind::FullData => self.spawn_verify(region, version, generation),
            FileKind::Diff => self.start_diff_job(region, version, generation),
        }
    }

    /// Hash the downloaded payload on a worker thread before it is renamed
    /// into place.
    fn spawn_verify(&mut self, region: &str, version: i64, generation: u64) {
        let Ok(descriptor) = self.catalog.descriptor(region) else {
            return;
        };
        let expected = descriptor.sha1_base64.clone();
        let path = paths::download_path(
            self.registry.data_dir(),
            version,
            &descriptor.name,
            FileKind::FullData,
        );
        let events = self.events_tx.clone();
        let region = region.to_string();
        tokio::task::spawn_blocking(move || {
            let result = integrity::verify(&path, &expected);
            let _ = events.send(StorageEvent::VerifyFinished {
                region,
                version,
                generation,
                result,
            });
        });
    }

    fn on_full_data_verified(&mut self, region: &str, version: i64) {
        let Ok(descriptor) = self.catalog.descriptor(region) else {
            return;
        };
        let name = descriptor.name.clone();
        let data_dir = self.registry.data_dir().to_path_buf();
        let from = paths::download_path(&data_dir, version, &name, FileKind::FullData);
        let to = paths::file_path(&data_dir, version, &name, FileKind::FullData);
        if let Err(err) = fileops::rename(&from, &to) {
            warn!(region, error = %err, "cannot move verified download into place");
            self.finish_failed(region, FileKind::FullData, FailureCause::ServerError);
            return;
        }
        let _ = fileops::delete(&paths::resume_path(&data_dir, version, &name));
        self.queue.complete(region, FileKind::FullData);
        self.on_installed(region, version);
    }

    /// Common tail for both install paths: register, sweep superseded
    /// versions, close the failure cycle and notify.
    fn on_installed(&mut self, region: &str, version: i64) {
        let Ok(descriptor) = self.catalog.descriptor(region) else {
            return;
        };
        let name = descriptor.name.clone();
        let mut record =
            LocalFileRecord::new(region, &name, version, self.registry.data_dir());
        record.sync_with_disk();
        if let Err(err) = self.registry.register(record) {
            warn!(region, error = %err, "registration conflict");
        }
        if let Err(err) = self.registry.cleanup_superseded(region) {
            warn!(region, error = %err, "superseded-version cleanup failed");
        }
        self.just_downloaded.insert(region.to_string());
        self.failed.remove(region);
        self.spent_attempts.remove(region);
        info!(region, version, "region installed");
        self.after_queue_change();
        self.notify_status_walk(region);
    }

    /// A verified-size download with the wrong digest: drop the payload and
    /// let the policy decide the retry shape.
    fn on_integrity_failure(&mut self, region: &str, version: i64) {
        if let Ok(descriptor) = self.catalog.descriptor(region) {
            let data_dir = self.registry.data_dir();
            let _ = fileops::delete(&paths::download_path(
                data_dir,
                version,
                &descriptor.name,
                FileKind::FullData,
            ));
            let _ = fileops::delete(&paths::resume_path(data_dir, version, &descriptor.name));
        }
        self.finish_failed(region, FileKind::FullData, FailureCause::FailedIntegrity);
    }

    fn start_diff_job(&mut self, region: &str, version: i64, generation: u64) {
        let Ok(descriptor) = self.catalog.descriptor(region) else {
            return;
        };
        let name = descriptor.name.clone();
        let data_dir = self.registry.data_dir().to_path_buf();

        // Promote the finished transfer payload to its canonical diff path.
        let fetched = paths::download_path(&data_dir, version, &name, FileKind::Diff);
        let diff_file = paths::file_path(&data_dir, version, &name, FileKind::Diff);
        if fetched.exists() {
            if let Err(err) = fileops::rename(&fetched, &diff_file) {
                warn!(region, error = %err, "cannot commit fetched diff");
                self.finish_failed(region, FileKind::Diff, FailureCause::ServerError);
                return;
            }
        }

        let Some(info) = self.diffs.info_for(region).cloned() else {
            self.finish_failed(region, FileKind::Diff, FailureCause::DiffUnavailable);
            return;
        };
        let base = self
            .registry
            .record(region, info.base_version)
            .filter(|r| r.on_disk(FileKind::FullData))
            .map(|r| r.path(FileKind::FullData));
        let Some(old_file) = base else {
            self.finish_failed(region, FileKind::Diff, FailureCause::BaseMissing);
            return;
        };

        // The diff task stays active in the queue while the job runs, which
        // keeps full downloads for the region locked out.
        self.applying.insert(region.to_string());
        let params = ApplyDiffParams {
            region: region.to_string(),
            old_file,
            diff_file,
            staging: paths::applying_path(&data_dir, version, &name),
            output: paths::file_path(&data_dir, version, &name, FileKind::FullData),
            output_sha1_base64: info.output_sha1_base64,
        };
        self.spawn_diff_job(params, version, generation);
        self.notify_status_walk(region);
    }

    fn spawn_diff_job(&mut self, params: ApplyDiffParams, version: i64, generation: u64) {
        let cancel = self.cancel_token(&params.region);
        let patcher = self.patcher.clone();
        let events = self.events_tx.clone();
        let region = params.region.clone();
        tokio::task::spawn_blocking(move || {
            let result = apply_diff(&params, patcher.as_ref(), &cancel);
            let _ = events.send(StorageEvent::DiffFinished {
                region,
                version,
                generation,
                result,
            });
        });
    }

    /// Start jobs for diffs found on disk at startup, now that the diff
    /// index can confirm them. Stale payloads are deleted.
    fn apply_pending_diffs(&mut self) {
        let pending = std::mem::take(&mut self.pending_diffs);
        for (region, version) in pending {
            let confirmed = version == self.catalog.version()
                && self
                    .diffs
                    .info_for(&region)
                    .is_some_and(|info| info.target_version == version)
                && !self.queue.contains(&region)
                && !self.applying.contains(&region);
            if confirmed {
                info!(region = %region, "applying diff found on disk");
                let generation = self.generation(&region);
                self.start_diff_job(&region, version, generation);
            } else if let Ok(descriptor) = self.catalog.descriptor(&region) {
                debug!(region = %region, "discarding unconfirmed on-disk diff");
                let path = paths::file_path(
                    self.registry.data_dir(),
                    version,
                    &descriptor.name,
                    FileKind::Diff,
                );
                let _ = fileops::delete(&path);
            }
        }
    }

    // ---- failure handling --------------------------------------------------

    fn on_transfer_err(&mut self, region: &str, kind: FileKind, version: i64, err: TransferError) {
        match err {
            TransferError::Cancelled => {
                self.queue.complete(region, kind);
                self.delete_partial(region, kind, version);
                self.after_queue_change();
                self.notify_status_walk(region);
            }
            TransferError::FileNotFound if kind == FileKind::Diff => {
                // The server no longer offers this diff; abandon the diff
                // scheme so every pending diff task falls back to full data.
                warn!(region, "diff missing on server, aborting diff scheme");
                self.queue.complete(region, kind);
                self.abort_diff_scheme();
                self.record_failure(region, FailureCause::DiffUnavailable);
            }
            TransferError::FileNotFound => {
                self.finish_failed(region, kind, FailureCause::ServerError);
            }
            TransferError::NoConnection(reason) => {
                debug!(region, reason = %reason, "transfer lost connection");
                self.finish_failed(region, kind, FailureCause::NoConnection);
            }
            TransferError::ServerError { status } => {
                warn!(region, status, "server rejected transfer");
                self.finish_failed(region, kind, FailureCause::ServerError);
            }
            TransferError::Io { path, source } => {
                warn!(region, path = %path.display(), error = %source, "transfer i/o failure");
                self.finish_failed(region, kind, FailureCause::ServerError);
            }
        }
    }

    /// Remove the task and record the failure cause.
    fn finish_failed(&mut self, region: &str, kind: FileKind, cause: FailureCause) {
        self.queue.complete(region, kind);
        self.record_failure(region, cause);
    }

    fn record_failure(&mut self, region: &str, cause: FailureCause) {
        let attempts = self.spent_attempts.get(region).copied().unwrap_or(0);
        warn!(region, ?cause, attempts, "download failed");
        self.failed
            .insert(region.to_string(), FailureRecord { cause, attempts });
        self.after_queue_change();
        self.notify_status_walk(region);
    }

    /// Run the retry plan over the failed set. Fallbacks re-enqueue
    /// immediately; transient causes get a timer that posts
    /// [`StorageEvent::RetryReady`].
    fn schedule_retries(&mut self) {
        let plan = self.policy.plan(&self.failed);
        if plan.is_empty() {
            return;
        }
        for (region, action) in plan {
            *self.spent_attempts.entry(region.clone()).or_insert(0) += 1;
            match action {
                RetryAction::RetryAfter(delay) => {
                    // Mark the attempt spent so the next drain does not arm
                    // a second timer for the same failure.
                    if let Some(record) = self.failed.get_mut(&region) {
                        record.attempts += 1;
                    }
                    debug!(region = %region, ?delay, "scheduling delayed retry");
                    let events = self.events_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(StorageEvent::RetryReady { region });
                    });
                }
                RetryAction::FallbackToFull => {
                    info!(region = %region, "falling back to full download");
                    self.failed.remove(&region);
                    self.diffs.remove_diff_for(&region);
                    self.enqueue_leaf(&region, false);
                }
                RetryAction::DeleteAndRetry { as_full } => {
                    info!(region = %region, as_full, "deleting corrupt payload and retrying");
                    self.failed.remove(&region);
                    self.delete_partial(&region, FileKind::FullData, self.catalog.version());
                    if as_full {
                        self.diffs.remove_diff_for(&region);
                        if let Ok(descriptor) = self.catalog.descriptor(&region) {
                            let _ = fileops::delete(&paths::file_path(
                                self.registry.data_dir(),
                                self.catalog.version(),
                                &descriptor.name,
                                FileKind::Diff,
                            ));
                        }
                    }
                    self.enqueue_leaf(&region, !as_full);
                }
                RetryAction::GiveUp => {}
            }
        }
        self.persist_queue();
        self.schedule();
    }

    /// Replace every still-queued diff task with a full-data task.
    fn abort_diff_scheme(&mut self) {
        self.diffs.abort();
        let mut diff_regions = Vec::new();
        self.queue.for_each(|task| {
            if task.kind == FileKind::Diff && !task.is_active() {
                diff_regions.push(task.region.clone());
            }
        });
        for region in diff_regions {
            self.queue.cancel(&region);
            self.delete_partial(&region, FileKind::Diff, self.catalog.version());
            self.enqueue_leaf(&region, false);
        }
    }

    fn delete_partial(&mut self, region: &str, kind: FileKind, version: i64) {
        let Ok(descriptor) = self.catalog.descriptor(region) else {
            return;
        };
        let data_dir = self.registry.data_dir();
        let _ = fileops::delete(&paths::download_path(data_dir, version, &descriptor.name, kind));
        if kind == FileKind::FullData {
            let _ = fileops::delete(&paths::resume_path(data_dir, version, &descriptor.name));
        }
    }

    // ---- cancellation ------------------------------------------------------

    fn cancel_leaf(&mut self, region: &str) {
        let removed = self.queue.cancel(region);
        let had_job = self.applying.remove(region);
        if !removed.is_empty() || had_job {
            // Invalidate every in-flight worker for this region.
            self.bump_generation(region);
            if let Some(token) = self.cancels.remove(region) {
                token.cancel();
            }
            let version = self.catalog.version();
            self.delete_partial(region, FileKind::FullData, version);
            self.delete_partial(region, FileKind::Diff, version);
            if let Ok(descriptor) = self.catalog.descriptor(region) {
                let _ = fileops::delete(&paths::applying_path(
                    self.registry.data_dir(),
                    version,
                    &descriptor.name,
                ));
            }
        }
        self.failed.remove(region);
        self.spent_attempts.remove(region);
    }

    fn generation(&mut self, region: &str) -> u64 {
        *self.generations.entry(region.to_string()).or_insert(0)
    }

    fn bump_generation(&mut self, region: &str) {
        *self.generations.entry(region.to_string()).or_insert(0) += 1;
    }

    fn is_stale(&self, region: &str, generation: u64) -> bool {
        self.generations.get(region).copied().unwrap_or(0) != generation
    }

    fn cancel_token(&mut self, region: &str) -> CancellationToken {
        self.cancels
            .entry(region.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    // ---- status derivation -------------------------------------------------

    fn leaf_status(&self, region: &str) -> NodeStatus {
        if self.applying.contains(region) {
            return NodeStatus::Applying;
        }
        if self.queue.is_active(region) {
            return NodeStatus::Downloading;
        }
        if self.queue.contains(region) {
            return NodeStatus::InQueue;
        }
        if self.failed.contains_key(region) {
            return NodeStatus::DownloadFailed;
        }
        match self.registry.latest_version(region) {
            None => NodeStatus::NotDownloaded,
            Some(v) if v == self.catalog.version() => NodeStatus::OnDisk,
            Some(_) => NodeStatus::OnDiskOutOfDate,
        }
    }

    fn leaf_progress(&self, region: &str) -> Progress {
        let mut queued = None;
        self.queue.for_each(|task| {
            if task.region == region {
                queued = Some(Progress::new(task.bytes_downloaded, task.expected_size));
            }
        });
        if let Some(progress) = queued {
            return progress;
        }
        let Ok(descriptor) = self.catalog.descriptor(region) else {
            return Progress::UNKNOWN;
        };
        if self.just_downloaded.contains(region)
            || self.registry.latest_version(region) == Some(self.catalog.version())
        {
            Progress::complete(descriptor.remote_size)
        } else {
            Progress::new(0, descriptor.remote_size)
        }
    }

    // ---- notification ------------------------------------------------------

    /// Bottom-up notification: the changed region first, then every ancestor
    /// with its re-aggregated status.
    fn notify_status_walk(&self, region: &str) {
        let region_id = region.to_string();
        if let Ok((status, _)) = self.node_status(region) {
            self.observers.notify_status(&region_id, status);
        }
        for ancestor in self.catalog.ancestors(region) {
            if let Ok((status, _)) = self.node_status(&ancestor) {
                self.observers.notify_status(&ancestor, status);
            }
        }
    }

    fn notify_progress_walk(&self, region: &str, progress: Progress) {
        let region_id = region.to_string();
        self.observers.notify_progress(&region_id, progress);
        for ancestor in self.catalog.ancestors(region) {
            if let Ok((_, aggregated)) = self.node_status(&ancestor) {
                self.observers.notify_progress(&ancestor, aggregated);
            }
        }
    }

    /// Status notifications for every leaf under `id` and their ancestors,
    /// after a bulk operation.
    fn notify_leaves(&self, id: &str) {
        for leaf in self.unique_leaves(id) {
            self.notify_status_walk(&leaf);
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("catalog_version", &self.catalog.version())
            .field("queued", &self.queue.len())
            .field("applying", &self.applying.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
