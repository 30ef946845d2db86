//! Upload seam for sealed batches
//!
//! The pipeline never talks to the network itself. It hands each batch of
//! sealed files to a [`BatchSender`] and deletes the files only when the
//! sender reports the batch as delivered.
//!
//! ## Implementations
//!
//! - [`MockBatchSender`](crate::mock::MockBatchSender): scripted outcomes for tests
//! - [`OfflineSender`]: never delivers, so every file stays on disk
//! - `HttpBatchSender`: JSON-over-HTTP collector client (in drover-transport)

use async_trait::async_trait;
use tracing::debug;

use drover_storage::SealedFile;

use crate::error::PipelineResult;

/// Uploads a batch of sealed files
///
/// A sender reads each file's elements (see [`SealedFile::for_each_element`])
/// and packages them into a single upload.
///
/// # Returns
///
/// - `Ok(true)`: the collector durably accepted the batch, or permanently
///   rejected it and it must not be retried. The files are deleted.
/// - `Ok(false)`: transient failure. The files stay for the next attempt.
/// - `Err(_)`: treated exactly like `Ok(false)`.
#[async_trait]
pub trait BatchSender: Send + Sync {
    /// Send one batch
    async fn send(&self, batch: &[SealedFile]) -> PipelineResult<bool>;
}

/// A sender with no collector behind it
///
/// Files accumulate locally and are bounded by retention eviction.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSender;

#[async_trait]
impl BatchSender for OfflineSender {
    async fn send(&self, batch: &[SealedFile]) -> PipelineResult<bool> {
        debug!(files = batch.len(), "No collector configured, keeping batch");
        Ok(false)
    }
}
