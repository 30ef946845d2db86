//! Sealed (rolled-over) event files
//!
//! Sealed files are named `{prefix}_{uuid}_{creationTimeMillis}{extension}`.
//! The creation timestamp is the third `_`-separated token and drives FIFO
//! eviction; names that do not parse sort as timestamp 0.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::durable_log::{DurableLog, DurableLogConfig};
use crate::error::StorageResult;

/// Separator between the fields of a sealed file name
pub const NAME_SEPARATOR: char = '_';

/// An immutable, uniquely named file waiting in the roll-over directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SealedFile {
    /// Full path of the file
    pub path: PathBuf,
    /// File name (last path component)
    pub name: String,
    /// Creation time parsed from the name, 0 if unparsable
    pub created_at_millis: i64,
    /// Largest element readers accept, matching the writer's limit
    pub max_element_size: usize,
}

impl SealedFile {
    /// Describe the sealed file at `path`, parsing its timestamp from the name
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let created_at_millis = Self::parse_timestamp(&name);
        Self {
            path,
            name,
            created_at_millis,
            max_element_size: DurableLogConfig::default().max_element_size,
        }
    }

    /// Read elements up to `max_element_size` bytes
    ///
    /// Must be at least the limit the file was written with, or larger
    /// elements read as corrupt.
    pub fn with_max_element_size(mut self, max_element_size: usize) -> Self {
        self.max_element_size = max_element_size;
        self
    }

    /// Generate a unique sealed file name
    pub fn generate_name(prefix: &str, extension: &str, now_millis: i64) -> String {
        format!(
            "{prefix}{sep}{id}{sep}{now_millis}{extension}",
            sep = NAME_SEPARATOR,
            id = Uuid::new_v4(),
        )
    }

    /// Parse the creation timestamp out of a sealed file name
    ///
    /// The extension (everything after the first `.`) is ignored; the rest
    /// must have exactly three `_`-separated tokens.
    pub fn parse_timestamp(name: &str) -> i64 {
        let stem = name.split('.').next().unwrap_or_default();
        let parts: Vec<&str> = stem.split(NAME_SEPARATOR).collect();
        if parts.len() != 3 {
            return 0;
        }
        parts[2].parse::<i64>().unwrap_or(0)
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creation time as a UTC timestamp, `None` if the name did not parse
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.created_at_millis == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(self.created_at_millis).single()
    }

    /// Open the sealed file's log read-only
    pub async fn open_log(&self) -> StorageResult<DurableLog> {
        DurableLog::open_read_only(&self.path, self.max_element_size).await
    }

    /// Read every element of the sealed file in insertion order
    pub async fn read_elements(&self) -> StorageResult<Vec<Bytes>> {
        let mut log = self.open_log().await?;
        let elements = log.read_all().await;
        log.close().await?;
        elements
    }

    /// Visit every element of the sealed file in insertion order
    pub async fn for_each_element<F>(&self, visitor: F) -> StorageResult<usize>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let mut log = self.open_log().await?;
        let visited = log.for_each_element(visitor).await;
        log.close().await?;
        visited
    }
}
