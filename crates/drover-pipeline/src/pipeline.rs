//! Handle to one owner's pipeline

use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::files_manager::SealOutcome;
use crate::scheduler::{Command, Reply, Worker};
use crate::sender::BatchSender;
use crate::serializer::EventSerializer;
use crate::strategy::{DeliveryReport, DeliveryTotals};

/// Snapshot of a pipeline's local state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    /// Owner the pipeline belongs to
    pub owner_id: String,
    /// Whether delivery is on
    pub enabled: bool,
    /// Bytes used by the working file, header included
    pub working_file_bytes: u64,
    /// Events in the working file
    pub working_file_events: usize,
    /// Sealed files waiting for delivery
    pub sealed_files: usize,
    /// Whether the periodic seal timer is running
    pub periodic_seal_armed: bool,
    /// Time of the last seal in epoch millis
    pub last_seal_millis: Option<i64>,
    /// Send passes run since the worker started
    pub delivery: DeliveryTotals,
}

/// Submission handle for one owner's pipeline
///
/// Every call is queued on the pipeline's worker and applied in submission
/// order. The `*_sync` variants wait for the worker and return its result.
pub struct Pipeline<E> {
    owner_id: String,
    tx: mpsc::UnboundedSender<Command<E>>,
}

impl<E: Send + Sync + 'static> Pipeline<E> {
    /// Spawn a pipeline worker for `owner_id` on `runtime`
    ///
    /// Nothing touches the disk until the first command arrives.
    pub fn spawn(
        runtime: &Handle,
        owner_id: &str,
        config: Arc<PipelineConfig>,
        serializer: Arc<dyn EventSerializer<E>>,
        sender: Arc<dyn BatchSender>,
    ) -> Self {
        let tx = Worker::spawn(runtime, owner_id, config, serializer, sender);
        Self {
            owner_id: owner_id.to_string(),
            tx,
        }
    }
}

impl<E> Pipeline<E> {
    /// Owner the pipeline belongs to
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Whether the worker has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Record an event without waiting; failures are only logged
    pub fn record_event(&self, event: E) {
        let command = Command::Record { event, reply: None };
        if self.tx.send(command).is_err() {
            warn!(owner = %self.owner_id, "Pipeline closed, dropping event");
        }
    }

    /// Record an event and wait until it is written
    pub async fn record_event_sync(&self, event: E) -> PipelineResult<()> {
        self.request(|reply| Command::Record {
            event,
            reply: Some(reply),
        })
        .await
    }

    /// Seal the working file and schedule delivery without waiting
    pub fn flush(&self) {
        if self.tx.send(Command::Flush { reply: None }).is_err() {
            warn!(owner = %self.owner_id, "Pipeline closed, flush ignored");
        }
    }

    /// Seal the working file and wait for the seal
    ///
    /// Delivery of the sealed file is queued behind the seal; await
    /// [`status`](Self::status) afterwards to wait for it too.
    pub async fn flush_sync(&self) -> PipelineResult<SealOutcome> {
        self.request(|reply| Command::Flush { reply: Some(reply) })
            .await
    }

    /// Run one send-and-cleanup pass and wait for its report
    pub async fn send_and_cleanup(&self) -> PipelineResult<DeliveryReport> {
        self.request(|reply| Command::SendAndCleanup { reply: Some(reply) })
            .await
    }

    /// Delete every local file and discard all future events
    pub async fn disable(&self) -> PipelineResult<()> {
        self.request(|reply| Command::Disable { reply }).await
    }

    /// Current local state, after everything submitted before this call
    pub async fn status(&self) -> PipelineResult<PipelineStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command<E>) -> PipelineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)?
    }
}

impl<E> std::fmt::Debug for Pipeline<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("owner_id", &self.owner_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
