//! Working file plus roll-over directory
//!
//! [`EventStorage`] owns the single working [`DurableLog`] that accepts new
//! events and the directory that sealed files are moved into.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::durable_log::{DurableLog, DurableLogConfig};
use crate::error::{StorageError, StorageResult};

/// Suffix of a sealed file whose copy has not completed
const PARTIAL_SUFFIX: &str = ".partial";

/// Layout of an event storage directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStorageConfig {
    /// File name of the working log inside the storage root
    pub working_file_name: String,
    /// Name of the roll-over directory inside the storage root
    pub rollover_dir: String,
    /// Durable log settings for the working file
    pub log: DurableLogConfig,
}

impl Default for EventStorageConfig {
    fn default() -> Self {
        Self {
            working_file_name: "events_working.tap".to_string(),
            rollover_dir: "rollover".to_string(),
            log: DurableLogConfig::default(),
        }
    }
}

/// One working log and a directory of sealed files
#[derive(Debug)]
pub struct EventStorage {
    /// Path of the working log
    working_path: PathBuf,
    /// Directory holding sealed files
    rollover_dir: PathBuf,
    /// Durable log settings
    log_config: DurableLogConfig,
    /// The working log
    working: DurableLog,
}

impl EventStorage {
    /// Open (or create) storage rooted at `root`
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>, config: EventStorageConfig) -> StorageResult<Self> {
        let root = root.as_ref();
        let rollover_dir = root.join(&config.rollover_dir);
        tokio::fs::create_dir_all(&rollover_dir).await?;

        let working_path = root.join(&config.working_file_name);
        let working = DurableLog::open_with(&working_path, config.log.clone()).await?;

        info!(
            working = %working_path.display(),
            pending_events = working.len(),
            "Event storage opened"
        );

        Ok(Self {
            working_path,
            rollover_dir,
            log_config: config.log,
            working,
        })
    }

    /// Append one serialized event to the working log
    pub async fn add(&mut self, data: &[u8]) -> StorageResult<()> {
        self.ensure_working_open().await?;
        self.working.add(data).await
    }

    /// Whether `new_size` more bytes fit in the working log under `max_file_size`
    pub fn can_store(&self, new_size: u64, max_file_size: u64) -> bool {
        self.working.used_bytes() + new_size <= max_file_size
    }

    /// Bytes used by the working log
    pub fn working_used_bytes(&self) -> u64 {
        self.working.used_bytes()
    }

    /// Whether the working log holds no events
    pub fn working_is_empty(&self) -> bool {
        self.working.is_empty()
    }

    /// Number of events in the working log
    pub fn working_len(&self) -> usize {
        self.working.len()
    }

    /// Path of the working log
    pub fn working_path(&self) -> &Path {
        &self.working_path
    }

    /// Directory holding sealed files
    pub fn rollover_dir(&self) -> &Path {
        &self.rollover_dir
    }

    /// Move the working log into the roll-over directory as `target_name`
    ///
    /// On success the sealed file holds the full working content, the working
    /// path starts over with a fresh log, and the sealed path is returned. On
    /// failure the working content stays where it was, so retrying is safe.
    #[instrument(skip(self), fields(working_events = self.working.len()))]
    pub async fn seal_to(&mut self, target_name: &str) -> StorageResult<PathBuf> {
        let target = self.rollover_dir.join(target_name);
        if tokio::fs::try_exists(&target).await? {
            return Err(StorageError::AlreadyExists(target.display().to_string()));
        }

        self.working.close().await?;

        if let Err(e) = move_file(&self.working_path, &target).await {
            warn!(error = %e, target = %target.display(), "Failed to seal working file");
            self.reopen_working().await?;
            return Err(e);
        }

        self.reopen_working().await?;
        debug!(sealed = %target.display(), "Sealed working file");
        Ok(target)
    }

    /// List every sealed file in the roll-over directory
    pub async fn list_sealed(&self) -> StorageResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.rollover_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            files.push(path);
        }
        Ok(files)
    }

    /// Delete the given sealed files
    ///
    /// Every file is attempted; the first failure is returned after the rest
    /// have been tried. Files that are already gone count as deleted.
    pub async fn delete_sealed(&self, files: &[PathBuf]) -> StorageResult<()> {
        let mut first_error = None;
        for file in files {
            match tokio::fs::remove_file(file).await {
                Ok(()) => debug!(file = %file.display(), "Deleted sealed file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Failed to delete sealed file");
                    first_error.get_or_insert(StorageError::from(e));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discard the working log and start over with an empty one
    pub async fn delete_working(&mut self) -> StorageResult<()> {
        self.working.close().await?;
        match tokio::fs::remove_file(&self.working_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                self.reopen_working().await?;
                return Err(e.into());
            }
        }
        self.reopen_working().await
    }

    /// Close the working log
    pub async fn close(&mut self) -> StorageResult<()> {
        self.working.close().await
    }

    async fn ensure_working_open(&mut self) -> StorageResult<()> {
        if self.working.is_closed() {
            warn!("Working log was left closed, reopening");
            self.reopen_working().await?;
        }
        Ok(())
    }

    async fn reopen_working(&mut self) -> StorageResult<()> {
        self.working = DurableLog::open_with(&self.working_path, self.log_config.clone()).await?;
        Ok(())
    }
}

/// Move `source` to `target`, falling back to copy-then-rename
async fn move_file(source: &Path, target: &Path) -> StorageResult<()> {
    match tokio::fs::rename(source, target).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!(error = %e, "Rename failed, falling back to copy"),
    }

    let mut partial_name = target.as_os_str().to_owned();
    partial_name.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial_name);

    let copied = async {
        tokio::fs::copy(source, &partial).await?;
        tokio::fs::File::open(&partial).await?.sync_all().await?;
        tokio::fs::rename(&partial, target).await
    }
    .await;

    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }

    tokio::fs::remove_file(source).await?;
    Ok(())
}
