//! Per-owner serialized worker
//!
//! Each pipeline owns one tokio task draining an unbounded command queue.
//! Writes, seals, sends and cleanups for that owner run strictly in
//! submission order on this task, which is what keeps the files consistent
//! without locks. Different owners run on different tasks.
//!
//! The worker only holds weak handles to its own queue (for the seal listener
//! and the periodic timer), so it stops once every [`Pipeline`] handle is
//! dropped.
//!
//! [`Pipeline`]: crate::pipeline::Pipeline

use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info_span, warn};

use drover_storage::SealedFile;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::files_manager::{FilesManager, RolloverListener, SealOutcome};
use crate::pipeline::PipelineStatus;
use crate::sender::BatchSender;
use crate::serializer::EventSerializer;
use crate::strategy::{DeliveryReport, DeliveryStrategy, DeliveryTotals};

/// Reply channel for a synchronous command
pub(crate) type Reply<T> = oneshot::Sender<PipelineResult<T>>;

/// Work item for a pipeline worker
pub(crate) enum Command<E> {
    Record {
        event: E,
        reply: Option<Reply<()>>,
    },
    Flush {
        reply: Option<Reply<SealOutcome>>,
    },
    PeriodicSeal,
    SendAndCleanup {
        reply: Option<Reply<DeliveryReport>>,
    },
    Disable {
        reply: Reply<()>,
    },
    Status {
        reply: Reply<PipelineStatus>,
    },
}

/// Weak submission handle to a worker's own queue
pub(crate) struct QueueHandle<E> {
    tx: mpsc::WeakUnboundedSender<Command<E>>,
}

impl<E> QueueHandle<E> {
    pub(crate) fn new(tx: &mpsc::UnboundedSender<Command<E>>) -> Self {
        Self { tx: tx.downgrade() }
    }

    /// Queue a command; `false` once the pipeline is gone
    pub(crate) fn submit(&self, command: Command<E>) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }
}

impl<E> Clone for QueueHandle<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Send> RolloverListener for QueueHandle<E> {
    fn on_rollover(&self, sealed: &SealedFile) {
        debug!(file = %sealed.name, "Queueing send after seal");
        self.submit(Command::SendAndCleanup { reply: None });
    }
}

/// Open files plus the strategy driving them
struct PipelineState<E> {
    files: FilesManager<E>,
    strategy: DeliveryStrategy<E>,
}

/// The task behind one pipeline
pub(crate) struct Worker<E> {
    owner_id: String,
    dir: PathBuf,
    config: Arc<PipelineConfig>,
    serializer: Arc<dyn EventSerializer<E>>,
    sender: Arc<dyn BatchSender>,
    queue: QueueHandle<E>,
    /// Opened on the first command, retried after a failed open
    state: Option<PipelineState<E>>,
    /// Survives a re-open, so a disabled pipeline stays disabled
    enabled: bool,
    /// A disable could not open the files; delete them on the next open
    purge_on_open: bool,
    /// Every send pass since the worker started
    delivered: DeliveryTotals,
}

impl<E: Send + Sync + 'static> Worker<E> {
    /// Spawn a worker on `runtime` and return its queue
    pub(crate) fn spawn(
        runtime: &Handle,
        owner_id: &str,
        config: Arc<PipelineConfig>,
        serializer: Arc<dyn EventSerializer<E>>,
        sender: Arc<dyn BatchSender>,
    ) -> mpsc::UnboundedSender<Command<E>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            owner_id: owner_id.to_string(),
            dir: config.owner_dir(owner_id),
            enabled: config.delivery.enabled,
            config,
            serializer,
            sender,
            queue: QueueHandle::new(&tx),
            state: None,
            purge_on_open: false,
            delivered: DeliveryTotals::default(),
        };

        let span = info_span!("pipeline", owner = %owner_id);
        runtime.spawn(worker.run(rx).instrument(span));
        tx
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<E>>) {
        debug!(dir = %self.dir.display(), "Pipeline worker started");
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        if let Some(state) = self.state.as_mut() {
            if let Err(e) = state.files.close().await {
                warn!(error = %e, "Failed to close working file");
            }
        }
        debug!("Pipeline worker stopped");
    }

    async fn handle(&mut self, command: Command<E>) {
        match command {
            Command::Record { event, reply } => {
                let result = match self.state().await {
                    Ok(state) => state.strategy.record_event(&mut state.files, &event).await,
                    Err(e) => Err(e),
                };
                respond(reply, result, "Record event");
            }
            Command::Flush { reply } => {
                let result = match self.state().await {
                    Ok(state) => state.strategy.flush(&mut state.files).await,
                    Err(e) => Err(e),
                };
                respond(reply, result, "Flush");
            }
            Command::PeriodicSeal => match self.state().await {
                Ok(state) => state.strategy.periodic_seal(&mut state.files).await,
                Err(e) => warn!(error = %e, "Periodic seal skipped"),
            },
            Command::SendAndCleanup { reply } => {
                let result = match self.state().await {
                    Ok(state) => Ok(state.strategy.send_and_cleanup(&mut state.files).await),
                    Err(e) => Err(e),
                };
                if let Ok(report) = &result {
                    self.delivered.add(report);
                }
                respond(reply, result, "Send and cleanup");
            }
            Command::Disable { reply } => {
                self.enabled = false;
                let result = match self.state().await {
                    Ok(state) => state.strategy.disable(&mut state.files).await,
                    Err(e) => {
                        self.purge_on_open = true;
                        Err(e)
                    }
                };
                respond(Some(reply), result, "Disable");
            }
            Command::Status { reply } => {
                let result = self.status().await;
                respond(Some(reply), result, "Status");
            }
        }
    }

    async fn status(&mut self) -> PipelineResult<PipelineStatus> {
        let owner_id = self.owner_id.clone();
        let delivery = self.delivered;
        let state = self.state().await?;
        Ok(PipelineStatus {
            owner_id,
            enabled: state.strategy.is_enabled(),
            working_file_bytes: state.files.working_used_bytes(),
            working_file_events: state.files.working_len(),
            sealed_files: state.files.sealed_files().await?.len(),
            periodic_seal_armed: state.strategy.periodic_seal_armed(),
            last_seal_millis: state.files.last_seal_millis(),
            delivery,
        })
    }

    /// Open state, opening the files first if needed
    async fn state(&mut self) -> PipelineResult<&mut PipelineState<E>> {
        let state = match self.state.take() {
            Some(state) => state,
            None => {
                let mut state = self.open().await?;
                if self.purge_on_open {
                    match state.files.delete_all_files().await {
                        Ok(()) => self.purge_on_open = false,
                        Err(e) => warn!(error = %e, "Deleting files of disabled pipeline failed"),
                    }
                }
                state
            }
        };
        Ok(self.state.insert(state))
    }

    async fn open(&self) -> PipelineResult<PipelineState<E>> {
        let mut files =
            FilesManager::open(&self.dir, &self.config, Arc::clone(&self.serializer)).await?;
        let strategy = if self.enabled {
            DeliveryStrategy::enabled(
                &mut files,
                &self.config.delivery,
                Arc::clone(&self.sender),
                self.queue.clone(),
            )
        } else {
            DeliveryStrategy::disabled(&mut files)
        };
        debug!(
            enabled = self.enabled,
            pending_events = files.working_len(),
            "Pipeline files opened"
        );

        // Files left by an earlier run get a delivery attempt
        if self.enabled {
            self.queue.submit(Command::SendAndCleanup { reply: None });
        }
        Ok(PipelineState { files, strategy })
    }
}

/// Answer a synchronous caller, or log the failure of a fire-and-forget one
fn respond<T>(reply: Option<Reply<T>>, result: PipelineResult<T>, operation: &str) {
    match reply {
        Some(reply) => {
            // Caller may have stopped waiting
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!(error = %e, "{} failed", operation);
            }
        }
    }
}
