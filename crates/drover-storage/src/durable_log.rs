//! Crash-safe ring-buffered log file
//!
//! A [`DurableLog`] stores length-prefixed binary elements inside a single
//! file. The file starts with a fixed header followed by a circular data
//! region; elements are appended after the last element and wrap back to the
//! first byte after the header when they reach the end of the file.
//!
//! ## Storage Format
//!
//! ```text
//! header (32 bytes, big-endian):
//!   [4 bytes: magic/version][8 bytes: file length][4 bytes: element count]
//!   [8 bytes: first element position][8 bytes: last element position]
//! element:
//!   [4 bytes: len][len bytes: payload]
//! ```
//!
//! ## Crash Consistency
//!
//! Element bytes are written and synced before the header is rewritten, and
//! the header is the only thing that makes an element reachable. A crash
//! between the two leaves the previous header, and therefore the previous
//! set of elements, intact. Expansion follows the same rule: the file is
//! grown and wrapped bytes are copied past the old end before the header
//! records the new length.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument, trace};

use crate::error::{StorageError, StorageResult};

/// Magic number and format version stored in the first header word
const VERSIONED_HEADER: u32 = 0x4452_0001;

/// Size of the fixed header block
pub const HEADER_LEN: u64 = 32;

/// Size of the length prefix in front of every element
pub const ELEMENT_HEADER_LEN: u64 = 4;

/// Configuration for a durable log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableLogConfig {
    /// Length of a freshly created file, in bytes
    pub initial_length: u64,
    /// Whether to sync data to disk before the header is rewritten
    pub sync_on_write: bool,
    /// Largest element accepted by `add`
    pub max_element_size: usize,
}

impl Default for DurableLogConfig {
    fn default() -> Self {
        Self {
            initial_length: 4096,
            sync_on_write: true,
            max_element_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Position and payload length of one element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Element {
    position: u64,
    length: u64,
}

impl Element {
    const NULL: Element = Element {
        position: 0,
        length: 0,
    };

    fn new(position: u64, length: u64) -> Self {
        Self { position, length }
    }
}

/// Append-only, crash-safe ring buffer of binary elements
#[derive(Debug)]
pub struct DurableLog {
    /// Path to the backing file
    path: PathBuf,
    /// Configuration
    config: DurableLogConfig,
    /// Open file handle, `None` once closed
    file: Option<File>,
    /// Opened with [`DurableLog::open_read_only`]
    read_only: bool,
    /// Length of the ring including the header
    file_length: u64,
    /// Number of elements in the ring
    element_count: u32,
    /// Oldest element
    first: Element,
    /// Newest element
    last: Element,
}

impl DurableLog {
    /// Open the log at `path` with default configuration, creating it if needed
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with(path, DurableLogConfig::default()).await
    }

    /// Open the log at `path`, creating it if needed
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_with(
        path: impl AsRef<Path>,
        config: DurableLogConfig,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let needs_init = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if needs_init {
            initialize(&path, config.initial_length.max(HEADER_LEN * 2)).await?;
        }

        let file = OpenOptions::new().read(true).write(true).open(&path).await?;
        Self::load(path, file, config, false).await
    }

    /// Open an existing log for reading only
    ///
    /// The file is never created, initialized or written; a missing or
    /// empty file is an error. Elements up to `max_element_size` bytes are
    /// readable.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_read_only(
        path: impl AsRef<Path>,
        max_element_size: usize,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path).await?;
        let config = DurableLogConfig {
            max_element_size,
            sync_on_write: false,
            ..DurableLogConfig::default()
        };
        Self::load(path, file, config, true).await
    }

    /// Validate the header of an open file and locate its elements
    async fn load(
        path: PathBuf,
        mut file: File,
        config: DurableLogConfig,
        read_only: bool,
    ) -> StorageResult<Self> {
        let actual_length = file.metadata().await?.len();

        let mut header = [0u8; HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0)).await?;
        file.read_exact(&mut header)
            .await
            .map_err(|e| StorageError::corrupt(format!("unreadable header: {}", e)))?;

        let magic = u32::from_be_bytes(word(&header, 0));
        if magic != VERSIONED_HEADER {
            return Err(StorageError::corrupt(format!(
                "unknown header version {:#010x}",
                magic
            )));
        }
        let file_length = u64::from_be_bytes(dword(&header, 4));
        let element_count = u32::from_be_bytes(word(&header, 12));
        let first_position = u64::from_be_bytes(dword(&header, 16));
        let last_position = u64::from_be_bytes(dword(&header, 24));

        if file_length <= HEADER_LEN {
            return Err(StorageError::corrupt(format!(
                "file length {} does not fit the header",
                file_length
            )));
        }
        if file_length > actual_length {
            return Err(StorageError::corrupt(format!(
                "header length {} exceeds on-disk length {}",
                file_length, actual_length
            )));
        }

        let mut log = Self {
            path,
            config,
            file: Some(file),
            read_only,
            file_length,
            element_count,
            first: Element::NULL,
            last: Element::NULL,
        };

        if element_count > 0 {
            for position in [first_position, last_position] {
                if position < HEADER_LEN || position >= file_length {
                    return Err(StorageError::corrupt(format!(
                        "element position {} outside ring of length {}",
                        position, file_length
                    )));
                }
            }
            log.first = log.read_element(first_position).await?;
            log.last = log.read_element(last_position).await?;
            if log.used_bytes() > file_length {
                return Err(StorageError::corrupt("elements overrun the ring"));
            }
        }

        debug!(
            elements = element_count,
            file_length = file_length,
            used = log.used_bytes(),
            "Durable log opened"
        );
        Ok(log)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of elements in the log
    pub fn len(&self) -> usize {
        self.element_count as usize
    }

    /// Whether the log holds no elements
    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Whether the log was opened read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current ring length (the file never shrinks unless `clear` is called)
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Bytes occupied by the header and all elements
    pub fn used_bytes(&self) -> u64 {
        if self.element_count == 0 {
            return HEADER_LEN;
        }
        let end_of_last = self.last.position + ELEMENT_HEADER_LEN + self.last.length;
        if self.last.position >= self.first.position {
            // Contiguous
            (end_of_last - self.first.position) + HEADER_LEN
        } else {
            // Wrapped
            end_of_last + self.file_length - self.first.position
        }
    }

    /// Free bytes left before the ring has to grow
    pub fn remaining_bytes(&self) -> u64 {
        self.file_length - self.used_bytes()
    }

    /// Append one element, growing the file if needed
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn add(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        if data.len() > self.config.max_element_size {
            return Err(StorageError::ElementTooLarge {
                size: data.len(),
                max: self.config.max_element_size,
            });
        }

        let length = data.len() as u64;
        self.expand_if_necessary(ELEMENT_HEADER_LEN + length).await?;

        let was_empty = self.is_empty();
        let position = if was_empty {
            HEADER_LEN
        } else {
            self.wrap_position(self.last.position + ELEMENT_HEADER_LEN + self.last.length)
        };

        self.ring_write(position, &(length as u32).to_be_bytes()).await?;
        self.ring_write(position + ELEMENT_HEADER_LEN, data).await?;
        self.sync().await?;

        let first_position = if was_empty {
            position
        } else {
            self.first.position
        };
        self.write_header(
            self.file_length,
            self.element_count + 1,
            first_position,
            position,
        )
        .await?;

        let element = Element::new(position, length);
        self.last = element;
        if was_empty {
            self.first = element;
        }
        self.element_count += 1;

        trace!(position = position, count = self.element_count, "Appended element");
        Ok(())
    }

    /// Read the oldest element without removing it
    pub async fn peek(&mut self) -> StorageResult<Option<Bytes>> {
        if self.file.is_none() {
            return Err(StorageError::Closed);
        }
        if self.is_empty() {
            return Ok(None);
        }
        let first = self.first;
        let mut buf = vec![0u8; first.length as usize];
        self.ring_read(first.position + ELEMENT_HEADER_LEN, &mut buf).await?;
        Ok(Some(Bytes::from(buf)))
    }

    /// Visit every element in insertion order without removing any
    ///
    /// The visitor returns `false` to stop early. Returns the number of
    /// elements visited.
    pub async fn for_each_element<F>(&mut self, mut visitor: F) -> StorageResult<usize>
    where
        F: FnMut(&[u8]) -> bool,
    {
        if self.file.is_none() {
            return Err(StorageError::Closed);
        }

        let mut position = self.first.position;
        let mut visited = 0;
        for _ in 0..self.element_count {
            let element = self.read_element(position).await?;
            let mut buf = vec![0u8; element.length as usize];
            self.ring_read(element.position + ELEMENT_HEADER_LEN, &mut buf).await?;
            visited += 1;
            if !visitor(&buf) {
                break;
            }
            position =
                self.wrap_position(element.position + ELEMENT_HEADER_LEN + element.length);
        }
        Ok(visited)
    }

    /// Read every element (for packaging a batch)
    pub async fn read_all(&mut self) -> StorageResult<Vec<Bytes>> {
        let mut elements = Vec::with_capacity(self.len());
        self.for_each_element(|data| {
            elements.push(Bytes::copy_from_slice(data));
            true
        })
        .await?;
        Ok(elements)
    }

    /// Remove the `n` oldest elements
    pub async fn remove(&mut self, n: usize) -> StorageResult<()> {
        self.check_writable()?;
        if n == 0 {
            return Ok(());
        }
        if n > self.len() {
            return Err(StorageError::OutOfRange {
                requested: n,
                available: self.len(),
            });
        }
        if n == self.len() {
            return self.clear().await;
        }

        let mut element = self.first;
        for _ in 0..n {
            let next = self.wrap_position(element.position + ELEMENT_HEADER_LEN + element.length);
            element = self.read_element(next).await?;
        }

        let remaining = self.element_count - n as u32;
        self.write_header(self.file_length, remaining, element.position, self.last.position)
            .await?;
        self.element_count = remaining;
        self.first = element;
        Ok(())
    }

    /// Drop every element and shrink the file back to its initial length
    pub async fn clear(&mut self) -> StorageResult<()> {
        self.check_writable()?;
        let initial_length = self.config.initial_length.max(HEADER_LEN * 2);
        self.write_header(initial_length, 0, 0, 0).await?;
        if let Some(file) = self.file.as_mut() {
            file.set_len(initial_length).await?;
        }
        self.sync().await?;

        self.file_length = initial_length;
        self.element_count = 0;
        self.first = Element::NULL;
        self.last = Element::NULL;
        Ok(())
    }

    /// Flush and release the file handle
    pub async fn close(&mut self) -> StorageResult<()> {
        if let Some(mut file) = self.file.take() {
            if !self.read_only {
                file.flush().await?;
                file.sync_all().await?;
            }
        }
        Ok(())
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.file.is_none() {
            Err(StorageError::Closed)
        } else if self.read_only {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Grow the ring until `element_length` more bytes fit
    async fn expand_if_necessary(&mut self, element_length: u64) -> StorageResult<()> {
        let mut remaining = self.remaining_bytes();
        if remaining >= element_length {
            return Ok(());
        }

        let previous_length = self.file_length;
        let mut new_length = previous_length;
        while remaining < element_length {
            remaining += new_length;
            new_length <<= 1;
        }

        if let Some(file) = self.file.as_mut() {
            file.set_len(new_length).await?;
        }
        self.sync().await?;

        let mut last_position = self.last.position;
        if self.element_count > 0 {
            // Wrapped bytes move to directly after the old end of the ring
            let end_of_last =
                self.wrap_position(self.last.position + ELEMENT_HEADER_LEN + self.last.length);
            if end_of_last <= self.first.position {
                let count = end_of_last - HEADER_LEN;
                self.copy_within(HEADER_LEN, previous_length, count).await?;
                self.sync().await?;
            }
            if self.last.position < self.first.position {
                last_position = previous_length + self.last.position - HEADER_LEN;
            }
        }

        self.write_header(
            new_length,
            self.element_count,
            self.first.position,
            last_position,
        )
        .await?;
        self.file_length = new_length;
        self.last.position = last_position;

        debug!(
            from = previous_length,
            to = new_length,
            "Expanded durable log"
        );
        Ok(())
    }

    /// Wrap a logical position back into the data region
    fn wrap_position(&self, position: u64) -> u64 {
        if position < self.file_length {
            position
        } else {
            HEADER_LEN + position - self.file_length
        }
    }

    async fn read_element(&mut self, position: u64) -> StorageResult<Element> {
        let mut len_buf = [0u8; ELEMENT_HEADER_LEN as usize];
        self.ring_read(position, &mut len_buf).await?;
        let length = u32::from_be_bytes(len_buf) as u64;
        if length as usize > self.config.max_element_size
            || length + ELEMENT_HEADER_LEN > self.file_length - HEADER_LEN
        {
            return Err(StorageError::corrupt(format!(
                "element at {} has invalid length {}",
                position, length
            )));
        }
        Ok(Element::new(position, length))
    }

    async fn ring_write(&mut self, position: u64, buf: &[u8]) -> StorageResult<()> {
        let position = self.wrap_position(position);
        let len = buf.len() as u64;
        if position + len <= self.file_length {
            self.write_at(position, buf).await
        } else {
            let before = (self.file_length - position) as usize;
            self.write_at(position, &buf[..before]).await?;
            self.write_at(HEADER_LEN, &buf[before..]).await
        }
    }

    async fn ring_read(&mut self, position: u64, buf: &mut [u8]) -> StorageResult<()> {
        let position = self.wrap_position(position);
        let len = buf.len() as u64;
        if position + len <= self.file_length {
            self.read_at(position, buf).await
        } else {
            let before = (self.file_length - position) as usize;
            self.read_at(position, &mut buf[..before]).await?;
            self.read_at(HEADER_LEN, &mut buf[before..]).await
        }
    }

    async fn write_header(
        &mut self,
        file_length: u64,
        element_count: u32,
        first_position: u64,
        last_position: u64,
    ) -> StorageResult<()> {
        let header = encode_header(file_length, element_count, first_position, last_position);
        self.write_at(0, &header).await?;
        self.sync().await
    }

    async fn copy_within(&mut self, from: u64, to: u64, count: u64) -> StorageResult<()> {
        const CHUNK: u64 = 64 * 1024;
        let mut copied = 0;
        let mut buf = vec![0u8; CHUNK.min(count) as usize];
        while copied < count {
            let n = CHUNK.min(count - copied) as usize;
            self.read_at(from + copied, &mut buf[..n]).await?;
            self.write_at(to + copied, &buf[..n]).await?;
            copied += n as u64;
        }
        Ok(())
    }

    async fn write_at(&mut self, position: u64, buf: &[u8]) -> StorageResult<()> {
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;
        file.seek(SeekFrom::Start(position)).await?;
        file.write_all(buf).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_at(&mut self, position: u64, buf: &mut [u8]) -> StorageResult<()> {
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;
        file.seek(SeekFrom::Start(position)).await?;
        file.read_exact(buf).await?;
        Ok(())
    }

    async fn sync(&mut self) -> StorageResult<()> {
        if !self.config.sync_on_write {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;
        file.sync_data().await?;
        Ok(())
    }
}

/// Write an empty ring to a sibling file and rename it into place
async fn initialize(path: &Path, initial_length: u64) -> StorageResult<()> {
    let mut init_name = path.as_os_str().to_owned();
    init_name.push(".init");
    let init_path = PathBuf::from(init_name);

    {
        let mut file = File::create(&init_path).await?;
        file.set_len(initial_length).await?;
        file.write_all(&encode_header(initial_length, 0, 0, 0)).await?;
        file.flush().await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&init_path, path).await?;

    debug!(path = %path.display(), length = initial_length, "Initialized durable log");
    Ok(())
}

fn encode_header(
    file_length: u64,
    element_count: u32,
    first_position: u64,
    last_position: u64,
) -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[0..4].copy_from_slice(&VERSIONED_HEADER.to_be_bytes());
    header[4..12].copy_from_slice(&file_length.to_be_bytes());
    header[12..16].copy_from_slice(&element_count.to_be_bytes());
    header[16..24].copy_from_slice(&first_position.to_be_bytes());
    header[24..32].copy_from_slice(&last_position.to_be_bytes());
    header
}

fn word(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn dword(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}
