use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::future::BoxFuture;
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::load_catalog;
use crate::diffs::{DiffInfo, DiffPatcher, DiffStream, PatchError};
use crate::error::StorageError;
use crate::policy::RetryPolicy;
use crate::transfer::{FetchRequest, Transfer, TransferError, TransferProgress};

use super::*;

fn digest(bytes: &[u8]) -> String {
    BASE64.encode(Sha1::digest(bytes))
}

/// Build a catalog with the given leaves under `World/North`.
fn make_catalog(version: i64, files: &[(&str, &[u8])]) -> RegionCatalog {
    let leaves: Vec<String> = files
        .iter()
        .map(|(id, data)| {
            format!(
                r#"{{ "id": "{id}", "file": "{id}", "size": {}, "sha1": "{}" }}"#,
                data.len(),
                digest(data)
            )
        })
        .collect();
    let json = format!(
        r#"{{ "format": 1, "version": {version}, "root": {{
            "id": "World",
            "children": [ {{ "id": "North", "children": [ {} ] }} ]
        }} }}"#,
        leaves.join(",")
    );
    load_catalog(&json).unwrap()
}

#[derive(Clone)]
enum FakeOutcome {
    /// Write these bytes to the destination and resolve.
    Payload(Vec<u8>),
    NotFound,
    NoConnection,
    /// Park until the cancellation token fires.
    Hang,
}

/// In-memory transport keyed by remote file name.
struct FakeTransfer {
    outcomes: Mutex<HashMap<String, FakeOutcome>>,
}

impl FakeTransfer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
        })
    }

    fn serve(&self, file: &str, outcome: FakeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(file.to_string(), outcome);
    }
}

impl Transfer for FakeTransfer {
    fn fetch(
        &self,
        request: FetchRequest,
        progress: mpsc::UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<u64, TransferError>> {
        let file = request.url.rsplit('/').next().unwrap_or("").to_string();
        let outcome = self.outcomes.lock().unwrap().get(&file).cloned();
        Box::pin(async move {
            match outcome {
                Some(FakeOutcome::Payload(bytes)) => {
                    if let Some(parent) = request.dest.parent() {
                        fs::create_dir_all(parent).unwrap();
                    }
                    fs::write(&request.dest, &bytes).unwrap();
                    let _ = progress.send(TransferProgress {
                        bytes_downloaded: bytes.len() as u64,
                        bytes_total: bytes.len() as u64,
                    });
                    Ok(bytes.len() as u64)
                }
                Some(FakeOutcome::NotFound) => Err(TransferError::FileNotFound),
                Some(FakeOutcome::Hang) => {
                    cancel.cancelled().await;
                    Err(TransferError::Cancelled)
                }
                Some(FakeOutcome::NoConnection) | None => {
                    Err(TransferError::NoConnection("unreachable".to_string()))
                }
            }
        })
    }
}

/// Patcher whose "diff" payload is simply the complete new content.
struct ReplacePatcher;

struct ReplaceStream {
    data: Vec<u8>,
    offset: usize,
}

impl DiffPatcher for ReplacePatcher {
    fn open(&self, _old: &Path, diff: &Path) -> Result<Box<dyn DiffStream>, PatchError> {
        Ok(Box::new(ReplaceStream {
            data: fs::read(diff)?,
            offset: 0,
        }))
    }
}

impl DiffStream for ReplaceStream {
    fn next_chunk(&mut self) -> Result<Option<bytes::Bytes>, PatchError> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = (self.offset + 16).min(self.data.len());
        let chunk = bytes::Bytes::copy_from_slice(&self.data[self.offset..end]);
        self.offset = end;
        Ok(Some(chunk))
    }
}

fn make_storage(
    dir: &Path,
    catalog: RegionCatalog,
    transfer: Arc<FakeTransfer>,
    concurrency: usize,
) -> Storage {
    Storage::new(
        StorageConfig {
            data_dir: dir.to_path_buf(),
            server_url: "http://mirror.test/maps".to_string(),
            concurrency,
            retry: RetryPolicy::default(),
        },
        catalog,
        transfer,
        Arc::new(ReplacePatcher),
    )
    .unwrap()
}

fn write_installed(dir: &Path, version: i64, name: &str, content: &[u8]) {
    let d = dir.join(version.to_string());
    fs::create_dir_all(&d).unwrap();
    fs::write(d.join(format!("{name}.rmap")), content).unwrap();
}

const OLD: &[u8] = b"freedonia map data, first edition";
const NEW: &[u8] = b"freedonia map data, second edition with more streets";

#[tokio::test]
async fn test_download_node_installs_full_data() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("Freedonia", false).unwrap();
    storage.run_until_idle().await;

    assert_eq!(storage.latest_version("Freedonia"), Some(2));
    let (status, progress) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
    assert_eq!(progress, Progress::complete(NEW.len() as u64));
    let installed = dir.path().join("2/Freedonia.rmap");
    assert_eq!(fs::read(installed).unwrap(), NEW);
    assert!(!dir.path().join("2/Freedonia.rmap.downloading").exists());
}

#[tokio::test]
async fn test_download_group_aggregates_to_on_disk() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    transfer.serve("Sylvania.rmap", FakeOutcome::Payload(OLD.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW), ("Sylvania", OLD)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("North", false).unwrap();
    storage.run_until_idle().await;

    let (status, _) = storage.node_status("North").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
    let (status, _) = storage.node_status("World").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
}

#[tokio::test]
async fn test_unknown_region_is_rejected() {
    let dir = TempDir::new().unwrap();
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, FakeTransfer::new(), 2);

    assert!(matches!(
        storage.download_node("Atlantis", false),
        Err(StorageError::UnknownRegion(_))
    ));
    assert!(matches!(
        storage.node_status("Atlantis"),
        Err(StorageError::UnknownRegion(_))
    ));
}

#[tokio::test]
async fn test_update_via_diff() {
    let dir = TempDir::new().unwrap();
    write_installed(dir.path(), 1, "Freedonia", OLD);

    let transfer = FakeTransfer::new();
    // The fake patcher emits the diff payload as the new content.
    transfer.serve("Freedonia.rmap.diff", FakeOutcome::Payload(NEW.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);
    assert_eq!(storage.latest_version("Freedonia"), Some(1));
    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::OnDiskOutOfDate);

    storage.set_diffs(HashMap::from([(
        "Freedonia".to_string(),
        DiffInfo {
            base_version: 1,
            target_version: 2,
            size: NEW.len() as u64,
            output_sha1_base64: digest(NEW),
        },
    )]));
    storage.update_node("Freedonia").unwrap();
    storage.run_until_idle().await;

    assert_eq!(storage.latest_version("Freedonia"), Some(2));
    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
    assert_eq!(fs::read(dir.path().join("2/Freedonia.rmap")).unwrap(), NEW);
    // Applied diff payload is deleted, superseded version swept.
    assert!(!dir.path().join("2/Freedonia.rmap.diff").exists());
    assert!(!dir.path().join("1/Freedonia.rmap").exists());
}

#[tokio::test]
async fn test_corrupt_diff_falls_back_to_full_download() {
    let dir = TempDir::new().unwrap();
    write_installed(dir.path(), 1, "Freedonia", OLD);

    let transfer = FakeTransfer::new();
    // Diff payload patches to the wrong bytes; the full download is good.
    transfer.serve(
        "Freedonia.rmap.diff",
        FakeOutcome::Payload(b"garbage".to_vec()),
    );
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.set_diffs(HashMap::from([(
        "Freedonia".to_string(),
        DiffInfo {
            base_version: 1,
            target_version: 2,
            size: 7,
            output_sha1_base64: digest(NEW),
        },
    )]));
    storage.update_node("Freedonia").unwrap();
    storage.run_until_idle().await;

    assert_eq!(storage.latest_version("Freedonia"), Some(2));
    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
    assert_eq!(fs::read(dir.path().join("2/Freedonia.rmap")).unwrap(), NEW);
    assert!(!dir.path().join("2/Freedonia.rmap.diff").exists());
}

#[tokio::test]
async fn test_diff_without_base_downloads_full_data() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    // Only the full payload is served; a diff request would fail.
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.set_diffs(HashMap::from([(
        "Freedonia".to_string(),
        DiffInfo {
            base_version: 1,
            target_version: 2,
            size: NEW.len() as u64,
            output_sha1_base64: digest(NEW),
        },
    )]));
    storage.download_node("Freedonia", true).unwrap();
    storage.run_until_idle().await;

    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
}

#[tokio::test]
async fn test_integrity_failure_retries_once_then_fails() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    // Served bytes never match the catalog digest.
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(OLD.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("Freedonia", false).unwrap();
    storage.run_until_idle().await;

    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::DownloadFailed);
    // The corrupt payload was deleted, nothing was registered.
    assert!(!dir.path().join("2/Freedonia.rmap").exists());
    assert!(!dir.path().join("2/Freedonia.rmap.downloading").exists());
    assert_eq!(storage.latest_version("Freedonia"), None);
}

#[tokio::test]
async fn test_no_connection_marks_download_failed() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::NoConnection);
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("Freedonia", false).unwrap();
    storage.run_until_idle().await;

    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::DownloadFailed);
    assert!(matches!(
        storage.last_error("Freedonia"),
        Some(StorageError::NoConnection)
    ));
}

#[tokio::test]
async fn test_retry_node_after_failure() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::NoConnection);
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer.clone(), 2);

    storage.download_node("Freedonia", false).unwrap();
    storage.run_until_idle().await;
    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::DownloadFailed);

    // Connectivity returns.
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    storage.retry_node("North").unwrap();
    storage.run_until_idle().await;

    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
}

#[tokio::test]
async fn test_missing_diff_aborts_scheme_for_queued_diffs() {
    let dir = TempDir::new().unwrap();
    write_installed(dir.path(), 1, "Freedonia", OLD);
    write_installed(dir.path(), 1, "Sylvania", OLD);

    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap.diff", FakeOutcome::NotFound);
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    transfer.serve("Sylvania.rmap", FakeOutcome::Payload(NEW.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW), ("Sylvania", NEW)]);
    // One slot, so Sylvania's diff is still queued when Freedonia's fails.
    let mut storage = make_storage(dir.path(), catalog, transfer, 1);

    let diff = DiffInfo {
        base_version: 1,
        target_version: 2,
        size: NEW.len() as u64,
        output_sha1_base64: digest(NEW),
    };
    storage.set_diffs(HashMap::from([
        ("Freedonia".to_string(), diff.clone()),
        ("Sylvania".to_string(), diff),
    ]));
    storage.update_node("North").unwrap();
    storage.run_until_idle().await;

    // Both regions end up installed via full downloads.
    assert_eq!(storage.latest_version("Freedonia"), Some(2));
    assert_eq!(storage.latest_version("Sylvania"), Some(2));
    let (status, _) = storage.node_status("North").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
}

#[tokio::test]
async fn test_cancel_node_clears_active_and_queued() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Hang);
    transfer.serve("Sylvania.rmap", FakeOutcome::Hang);
    transfer.serve("Osterlich.rmap", FakeOutcome::Hang);
    let catalog = make_catalog(
        2,
        &[("Freedonia", NEW), ("Sylvania", OLD), ("Osterlich", NEW)],
    );
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("North", false).unwrap();
    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::Downloading);
    let (status, _) = storage.node_status("Osterlich").unwrap();
    assert_eq!(status, NodeStatus::InQueue);

    storage.cancel_node("North").unwrap();
    // Let the aborted workers post their results, then drop them as stale.
    tokio::time::sleep(Duration::from_millis(20)).await;
    storage.pump();

    for region in ["Freedonia", "Sylvania", "Osterlich", "North"] {
        let (status, _) = storage.node_status(region).unwrap();
        assert_eq!(status, NodeStatus::NotDownloaded, "{region}");
    }
}

#[tokio::test]
async fn test_replace_catalog_busy_while_downloading() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Hang);
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("Freedonia", false).unwrap();
    let replacement = make_catalog(3, &[("Freedonia", NEW)]);
    assert!(matches!(
        storage.replace_catalog(replacement),
        Err(StorageError::Busy(_))
    ));

    storage.cancel_node("Freedonia").unwrap();
    let replacement = make_catalog(3, &[("Freedonia", NEW)]);
    storage.replace_catalog(replacement).unwrap();
    assert_eq!(storage.data_version(), 3);
}

#[tokio::test]
async fn test_persisted_queue_restored_on_startup() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Hang);
    transfer.serve("Sylvania.rmap", FakeOutcome::Hang);
    let catalog = make_catalog(2, &[("Freedonia", NEW), ("Sylvania", OLD)]);

    {
        let mut storage = make_storage(dir.path(), catalog, transfer.clone(), 2);
        storage.download_node("North", false).unwrap();
        // Queue persisted; simulate a crash by dropping the engine.
    }

    let catalog = make_catalog(2, &[("Freedonia", NEW), ("Sylvania", OLD)]);
    let storage = make_storage(dir.path(), catalog, transfer, 2);
    for region in ["Freedonia", "Sylvania"] {
        let (status, _) = storage.node_status(region).unwrap();
        assert!(status.is_in_flight(), "{region} should be re-queued");
    }
}

#[tokio::test]
async fn test_observers_see_leaf_and_ancestor_updates() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    let seen: Arc<Mutex<Vec<(String, NodeStatus)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    storage.subscribe(
        Box::new(move |region, status| {
            sink.lock().unwrap().push((region.clone(), status));
        }),
        Box::new(|_, _| {}),
    );

    storage.download_node("Freedonia", false).unwrap();
    storage.run_until_idle().await;

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&("Freedonia".to_string(), NodeStatus::OnDisk)));
    assert!(seen.contains(&("North".to_string(), NodeStatus::OnDisk)));
    assert!(seen.contains(&("World".to_string(), NodeStatus::OnDisk)));
}

#[tokio::test]
async fn test_will_delete_veto_keeps_files() {
    let dir = TempDir::new().unwrap();
    write_installed(dir.path(), 2, "Freedonia", NEW);
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, FakeTransfer::new(), 2);
    assert_eq!(storage.latest_version("Freedonia"), Some(2));

    storage.set_will_delete(Box::new(|_, _| false));
    storage.delete_node("Freedonia").unwrap();
    assert_eq!(storage.latest_version("Freedonia"), Some(2));
    assert!(dir.path().join("2/Freedonia.rmap").exists());

    storage.set_will_delete(Box::new(|_, _| true));
    storage.delete_node("Freedonia").unwrap();
    assert_eq!(storage.latest_version("Freedonia"), None);
    assert!(!dir.path().join("2/Freedonia.rmap").exists());
}

#[tokio::test]
async fn test_update_info_counts_outdated_leaves() {
    let dir = TempDir::new().unwrap();
    write_installed(dir.path(), 1, "Freedonia", OLD);
    write_installed(dir.path(), 1, "Sylvania", OLD);
    let catalog = make_catalog(2, &[("Freedonia", NEW), ("Sylvania", NEW)]);
    let mut storage = make_storage(dir.path(), catalog, FakeTransfer::new(), 2);

    // A diff is offered for Freedonia only.
    storage.set_diffs(HashMap::from([(
        "Freedonia".to_string(),
        DiffInfo {
            base_version: 1,
            target_version: 2,
            size: 10,
            output_sha1_base64: digest(NEW),
        },
    )]));

    let info = storage.update_info("North").unwrap();
    assert_eq!(info.num_files, 2);
    assert_eq!(info.update_size, 10 + NEW.len() as u64);
    assert_eq!(info.max_file_size, NEW.len() as u64);
    assert_eq!(
        info.size_difference,
        2 * (NEW.len() as i64 - OLD.len() as i64)
    );
}

#[tokio::test]
async fn test_queued_children_and_groups() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Hang);
    let catalog = make_catalog(2, &[("Freedonia", NEW), ("Sylvania", OLD)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("Freedonia", false).unwrap();
    assert_eq!(
        storage.queued_children("North").unwrap(),
        vec!["Freedonia".to_string()]
    );

    let groups = storage.children_in_groups("North").unwrap();
    assert_eq!(groups.downloaded, vec!["Freedonia".to_string()]);
    assert_eq!(groups.available, vec!["Sylvania".to_string()]);
}

#[tokio::test]
async fn test_overall_progress_counts_session_completions() {
    let dir = TempDir::new().unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Freedonia.rmap", FakeOutcome::Payload(NEW.to_vec()));
    transfer.serve("Sylvania.rmap", FakeOutcome::Hang);
    let catalog = make_catalog(2, &[("Freedonia", NEW), ("Sylvania", OLD)]);
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("North", false).unwrap();
    // Drain events until Freedonia's install settles; Sylvania keeps hanging.
    for _ in 0..100 {
        if storage.latest_version("Freedonia") == Some(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        storage.pump();
    }
    assert_eq!(storage.latest_version("Freedonia"), Some(2));

    // Freedonia finished this session, Sylvania is still hanging.
    let progress =
        storage.overall_progress(&["Freedonia".to_string(), "Sylvania".to_string()]);
    assert_eq!(progress.bytes_downloaded, NEW.len() as u64);
    assert_eq!(progress.bytes_total, (NEW.len() + OLD.len()) as u64);

    storage.cancel_node("North").unwrap();
}

#[tokio::test]
async fn test_disputed_leaf_counted_once() {
    let dir = TempDir::new().unwrap();
    let json = format!(
        r#"{{ "format": 1, "version": 2, "root": {{
            "id": "World",
            "children": [
                {{ "id": "North", "children": [
                    {{ "id": "Borderland", "file": "Borderland", "size": {size}, "sha1": "{sha}" }},
                    {{ "id": "Freedonia", "file": "Freedonia", "size": {fsize}, "sha1": "{fsha}" }}
                ] }},
                {{ "id": "South", "children": [
                    {{ "id": "Borderland", "file": "Borderland", "size": {size}, "sha1": "{sha}" }}
                ] }}
            ]
        }} }}"#,
        size = NEW.len(),
        sha = digest(NEW),
        fsize = OLD.len(),
        fsha = digest(OLD),
    );
    let catalog = load_catalog(&json).unwrap();
    let transfer = FakeTransfer::new();
    transfer.serve("Borderland.rmap", FakeOutcome::Payload(NEW.to_vec()));
    let mut storage = make_storage(dir.path(), catalog, transfer, 2);

    storage.download_node("Borderland", false).unwrap();
    storage.run_until_idle().await;

    // Both parents observe the disputed leaf as installed.
    let (status, _) = storage.node_status("South").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
    let (status, _) = storage.node_status("North").unwrap();
    assert_eq!(status, NodeStatus::PartlyDownloaded);

    // World counts Borderland's bytes once.
    let (status, progress) = storage.node_status("World").unwrap();
    assert_eq!(status, NodeStatus::PartlyDownloaded);
    assert_eq!(progress.bytes_downloaded, NEW.len() as u64);
    assert_eq!(progress.bytes_total, (NEW.len() + OLD.len()) as u64);
}

#[tokio::test]
async fn test_already_downloaded_payload_skips_network() {
    let dir = TempDir::new().unwrap();
    let catalog = make_catalog(2, &[("Freedonia", NEW)]);
    // The transport would fail if asked; it must not be.
    let mut storage = make_storage(dir.path(), catalog, FakeTransfer::new(), 2);

    // A complete payload sits at the download path before the request.
    let vdir = dir.path().join("2");
    fs::create_dir_all(&vdir).unwrap();
    fs::write(vdir.join("Freedonia.rmap.downloading"), NEW).unwrap();

    storage.download_node("Freedonia", false).unwrap();
    storage.run_until_idle().await;

    let (status, _) = storage.node_status("Freedonia").unwrap();
    assert_eq!(status, NodeStatus::OnDisk);
    assert_eq!(fs::read(dir.path().join("2/Freedonia.rmap")).unwrap(), NEW);
}
