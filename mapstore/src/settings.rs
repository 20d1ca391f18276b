//! Persistent engine settings backed by an INI file.
//!
//! The file lives at `<data_dir>/settings.ini`. The one setting the engine
//! itself owns is the serialized download queue: the identifiers of all
//! queued regions joined with `;`, written on every queue change and
//! restored at startup so an interrupted session resumes where it left off.

use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::warn;

use crate::catalog::RegionId;
use crate::error::{StorageError, StorageResult};

const SETTINGS_FILE: &str = "settings.ini";
const SECTION: &str = "Storage";
const KEY_DOWNLOAD_QUEUE: &str = "DownloadQueue";
const QUEUE_SEPARATOR: char = ';';

/// INI-file settings store for the storage engine.
#[derive(Debug)]
pub struct Settings {
    path: PathBuf,
    doc: Ini,
}

impl Settings {
    /// Open the settings file under `data_dir`, creating an empty store if
    /// the file does not exist yet. A malformed file is treated as empty
    /// rather than fatal; the engine can run without its saved queue.
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let doc = match Ini::load_from_file(&path) {
            Ok(doc) => doc,
            Err(ini::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ini::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Malformed settings file, starting empty");
                Ini::new()
            }
        };
        Self { path, doc }
    }

    /// Persist the queued region ids, in queue order. An empty slice
    /// removes the setting.
    pub fn save_download_queue(&mut self, regions: &[RegionId]) -> StorageResult<()> {
        if regions.is_empty() {
            self.doc.with_section(Some(SECTION)).delete(&KEY_DOWNLOAD_QUEUE);
        } else {
            let joined = regions.join(&QUEUE_SEPARATOR.to_string());
            self.doc
                .with_section(Some(SECTION))
                .set(KEY_DOWNLOAD_QUEUE, joined);
        }
        self.doc
            .write_to_file(&self.path)
            .map_err(|err| StorageError::io(&self.path, err))
    }

    /// Read back the saved queue, in the order it was enqueued.
    pub fn download_queue(&self) -> Vec<RegionId> {
        self.doc
            .section(Some(SECTION))
            .and_then(|s| s.get(KEY_DOWNLOAD_QUEUE))
            .map(|raw| {
                raw.split(QUEUE_SEPARATOR)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
