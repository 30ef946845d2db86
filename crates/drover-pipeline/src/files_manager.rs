//! Write path: serialize, append, seal and retain
//!
//! [`FilesManager`] is the only writer of one owner's [`EventStorage`]. It
//! decides when the working file is sealed (before a write that would push it
//! past the size cap), names sealed files, tells listeners about every seal
//! and evicts the oldest sealed files when retention is exceeded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use drover_storage::{EventStorage, SealedFile};

use crate::config::{FilesConfig, PipelineConfig};
use crate::error::PipelineResult;
use crate::serializer::EventSerializer;

/// Observer notified after every seal that produced a file
pub trait RolloverListener: Send + Sync {
    /// Called with the freshly sealed file
    fn on_rollover(&self, sealed: &SealedFile);
}

/// Result of a seal attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealOutcome {
    /// The working file was sealed into this file
    Sealed(SealedFile),
    /// The working file was empty; nothing was sealed
    Empty,
}

impl SealOutcome {
    /// Whether a file was produced
    pub fn occurred(&self) -> bool {
        matches!(self, SealOutcome::Sealed(_))
    }

    /// The sealed file, if any
    pub fn sealed(&self) -> Option<&SealedFile> {
        match self {
            SealOutcome::Sealed(file) => Some(file),
            SealOutcome::Empty => None,
        }
    }
}

/// Serializes events into the working file and manages sealed files
pub struct FilesManager<E> {
    storage: EventStorage,
    serializer: Arc<dyn EventSerializer<E>>,
    config: FilesConfig,
    /// Element limit of the working file, applied when sealed files are read
    max_element_size: usize,
    listeners: Vec<Arc<dyn RolloverListener>>,
    last_seal_millis: Option<i64>,
}

impl<E> FilesManager<E> {
    /// Open the files of the owner directory `dir`
    pub async fn open(
        dir: impl AsRef<Path>,
        config: &PipelineConfig,
        serializer: Arc<dyn EventSerializer<E>>,
    ) -> PipelineResult<Self> {
        let storage = EventStorage::open(dir, config.storage_config()).await?;
        Ok(Self {
            storage,
            serializer,
            config: config.files.clone(),
            max_element_size: config.log.max_element_size,
            listeners: Vec::new(),
            last_seal_millis: None,
        })
    }

    /// Serialize and append one event, sealing first if it would not fit
    pub async fn write_event(&mut self, event: &E) -> PipelineResult<()> {
        let data = self.serializer.serialize(event)?;

        if !self
            .storage
            .can_store(data.len() as u64, self.config.max_file_size)
        {
            debug!(
                used = self.storage.working_used_bytes(),
                incoming = data.len(),
                max = self.config.max_file_size,
                "Working file full, sealing before write"
            );
            self.seal().await?;
        }

        self.storage.add(&data).await?;
        Ok(())
    }

    /// Seal the working file if it holds any events
    ///
    /// Listeners are notified only when a file was produced.
    #[instrument(skip(self), fields(events = self.storage.working_len()))]
    pub async fn seal(&mut self) -> PipelineResult<SealOutcome> {
        if self.storage.working_is_empty() {
            return Ok(SealOutcome::Empty);
        }

        let now = Utc::now().timestamp_millis();
        let name =
            SealedFile::generate_name(&self.config.file_prefix, &self.config.file_extension, now);
        let path = self.storage.seal_to(&name).await?;
        self.last_seal_millis = Some(now);

        let sealed = self.describe(path);
        info!(file = %sealed.name, "Sealed working file");
        for listener in &self.listeners {
            listener.on_rollover(&sealed);
        }
        Ok(SealOutcome::Sealed(sealed))
    }

    /// Every sealed file, oldest first (by embedded timestamp, then name)
    pub async fn sealed_files(&self) -> PipelineResult<Vec<SealedFile>> {
        let mut files: Vec<SealedFile> = self
            .storage
            .list_sealed()
            .await?
            .into_iter()
            .map(|path| self.describe(path))
            .collect();
        files.sort_by(|a, b| {
            a.created_at_millis
                .cmp(&b.created_at_millis)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(files)
    }

    fn describe(&self, path: PathBuf) -> SealedFile {
        SealedFile::from_path(path).with_max_element_size(self.max_element_size)
    }

    /// The `count` oldest sealed files
    pub async fn batch_of_files(&self, count: usize) -> PipelineResult<Vec<SealedFile>> {
        let mut files = self.sealed_files().await?;
        files.truncate(count);
        Ok(files)
    }

    /// Delete the given sealed files
    pub async fn delete_sealed(&self, files: &[SealedFile]) -> PipelineResult<()> {
        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        self.storage.delete_sealed(&paths).await?;
        Ok(())
    }

    /// Delete the oldest sealed files until at most `max_sealed_files` remain
    ///
    /// Returns the number of files evicted.
    pub async fn evict_oldest_if_over_cap(
        &self,
        max_sealed_files: usize,
    ) -> PipelineResult<usize> {
        let files = self.sealed_files().await?;
        if files.len() <= max_sealed_files {
            return Ok(0);
        }

        let excess = files.len() - max_sealed_files;
        let evicted = &files[..excess];
        for file in evicted {
            warn!(
                file = %file.name,
                created_at_millis = file.created_at_millis,
                "Evicting undelivered sealed file"
            );
        }
        self.delete_sealed(evicted).await?;
        Ok(excess)
    }

    /// Delete every sealed file and the working file
    pub async fn delete_all_files(&mut self) -> PipelineResult<()> {
        let sealed = self.storage.list_sealed().await?;
        let sealed_result = self.storage.delete_sealed(&sealed).await;
        self.storage.delete_working().await?;
        sealed_result?;
        info!(sealed = sealed.len(), "Deleted all local event files");
        Ok(())
    }

    /// Close the working file
    pub async fn close(&mut self) -> PipelineResult<()> {
        self.storage.close().await?;
        Ok(())
    }

    /// Add a seal listener
    pub fn register_listener(&mut self, listener: Arc<dyn RolloverListener>) {
        self.listeners.push(listener);
    }

    /// Remove every seal listener
    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    /// Time of the last seal in epoch millis
    pub fn last_seal_millis(&self) -> Option<i64> {
        self.last_seal_millis
    }

    /// Bytes used by the working file
    pub fn working_used_bytes(&self) -> u64 {
        self.storage.working_used_bytes()
    }

    /// Events in the working file
    pub fn working_len(&self) -> usize {
        self.storage.working_len()
    }

    /// Retention cap from the configuration
    pub fn max_sealed_files(&self) -> usize {
        self.config.max_sealed_files
    }

    /// Underlying storage
    pub fn storage(&self) -> &EventStorage {
        &self.storage
    }
}

impl<E> std::fmt::Debug for FilesManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesManager")
            .field("storage", &self.storage)
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("last_seal_millis", &self.last_seal_millis)
            .finish()
    }
}
