//! Delivery scheduling
//!
//! A pipeline runs one of two strategies, chosen when the pipeline opens:
//!
//! - [`EnabledStrategy`]: seals on a timer while events keep arriving, sends
//!   sealed batches oldest first, deletes a batch only once the sender
//!   reports it delivered, and evicts the oldest files when nothing could be
//!   sent.
//! - [`DisabledStrategy`]: discards writes; local files can only be deleted.
//!
//! Every strategy method runs on the pipeline's worker, so none of them
//! need locking.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use drover_storage::SealedFile;

use crate::config::DeliveryConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::files_manager::{FilesManager, SealOutcome};
use crate::scheduler::{Command, QueueHandle};
use crate::sender::BatchSender;

/// Summary of one send-and-cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Batches handed to the sender
    pub batches_attempted: usize,
    /// Files in batches the sender reported delivered
    pub files_sent: usize,
    /// Files removed by retention eviction
    pub files_evicted: usize,
    /// Whether the pass ended on a failed batch rather than an empty list
    pub stopped_on_failure: bool,
}

/// Send passes added up over a pipeline's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryTotals {
    /// Send passes run
    pub passes: usize,
    /// Passes that ended on a failed batch
    pub failed_passes: usize,
    /// Batches handed to the sender
    pub batches_attempted: usize,
    /// Files reported delivered
    pub files_sent: usize,
    /// Files removed by retention eviction
    pub files_evicted: usize,
}

impl DeliveryTotals {
    /// Count one finished pass
    pub fn add(&mut self, report: &DeliveryReport) {
        self.passes += 1;
        if report.stopped_on_failure {
            self.failed_passes += 1;
        }
        self.batches_attempted += report.batches_attempted;
        self.files_sent += report.files_sent;
        self.files_evicted += report.files_evicted;
    }

    /// What happened between an `earlier` snapshot and this one
    pub fn since(&self, earlier: &DeliveryTotals) -> DeliveryTotals {
        DeliveryTotals {
            passes: self.passes.saturating_sub(earlier.passes),
            failed_passes: self.failed_passes.saturating_sub(earlier.failed_passes),
            batches_attempted: self.batches_attempted.saturating_sub(earlier.batches_attempted),
            files_sent: self.files_sent.saturating_sub(earlier.files_sent),
            files_evicted: self.files_evicted.saturating_sub(earlier.files_evicted),
        }
    }
}

/// Cancellable repeating timer
///
/// At most one timer runs at a time: arming an armed timer and cancelling a
/// cancelled one are both no-ops.
#[derive(Debug, Default)]
pub struct PeriodicSeal {
    handle: Option<AbortHandle>,
}

impl PeriodicSeal {
    /// Create an unarmed timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Start calling `on_tick` every `interval`, first after one interval
    ///
    /// The timer stops on its own once `on_tick` returns `false`. Returns
    /// whether a new timer was started.
    pub fn arm<F>(&mut self, interval: Duration, mut on_tick: F) -> bool
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if self.is_armed() {
            return false;
        }

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        });
        self.handle = Some(task.abort_handle());
        true
    }

    /// Stop the timer; returns whether one was running
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Whether a timer is running
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeriodicSeal {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Delivery on: periodic sealing, batching, retention
pub struct EnabledStrategy<E> {
    sender: Arc<dyn BatchSender>,
    queue: QueueHandle<E>,
    periodic: PeriodicSeal,
    seal_interval: Duration,
    batch_size: usize,
    max_sealed_files: usize,
}

impl<E: Send + Sync + 'static> EnabledStrategy<E> {
    pub(crate) fn new(
        files: &mut FilesManager<E>,
        config: &DeliveryConfig,
        sender: Arc<dyn BatchSender>,
        queue: QueueHandle<E>,
    ) -> Self {
        // Every seal, size- or time-triggered, queues a send pass
        files.register_listener(Arc::new(queue.clone()));
        Self {
            sender,
            queue,
            periodic: PeriodicSeal::new(),
            seal_interval: config.seal_interval(),
            batch_size: config.effective_batch_size(),
            max_sealed_files: files.max_sealed_files(),
        }
    }

    /// Write one event, then make sure the periodic seal is armed
    pub async fn record_event(
        &mut self,
        files: &mut FilesManager<E>,
        event: &E,
    ) -> PipelineResult<()> {
        let result = files.write_event(event).await;
        self.schedule_periodic_seal();
        result
    }

    /// Arm the periodic seal; returns whether a new timer was started
    pub fn schedule_periodic_seal(&mut self) -> bool {
        let queue = self.queue.clone();
        let armed = self
            .periodic
            .arm(self.seal_interval, move || queue.submit(Command::PeriodicSeal));
        if armed {
            debug!(interval_ms = self.seal_interval.as_millis() as u64, "Armed periodic seal");
        }
        armed
    }

    /// Stop the periodic seal; returns whether one was running
    pub fn cancel_periodic_seal(&mut self) -> bool {
        let cancelled = self.periodic.cancel();
        if cancelled {
            debug!("Cancelled periodic seal");
        }
        cancelled
    }

    /// Whether the periodic seal is armed
    pub fn periodic_seal_armed(&self) -> bool {
        self.periodic.is_armed()
    }

    /// Time-triggered seal
    pub async fn periodic_seal(&mut self, files: &mut FilesManager<E>) {
        match files.seal().await {
            Ok(SealOutcome::Sealed(_)) => {}
            Ok(SealOutcome::Empty) => {
                self.cancel_periodic_seal();
            }
            Err(e) => warn!(error = %e, "Periodic seal failed"),
        }
    }

    /// Seal now and make sure a send pass follows
    pub async fn flush(&mut self, files: &mut FilesManager<E>) -> PipelineResult<SealOutcome> {
        let result = files.seal().await;
        match &result {
            // The seal listener already queued a pass
            Ok(SealOutcome::Sealed(_)) => {}
            Ok(SealOutcome::Empty) => {
                self.cancel_periodic_seal();
                self.queue.submit(Command::SendAndCleanup { reply: None });
            }
            Err(e) => {
                warn!(error = %e, "Flush seal failed, retrying earlier files");
                self.queue.submit(Command::SendAndCleanup { reply: None });
            }
        }
        result
    }

    /// Send sealed batches oldest first until one fails or none are left
    pub async fn send_and_cleanup(&mut self, files: &mut FilesManager<E>) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        loop {
            let batch = match files.batch_of_files(self.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Failed to list sealed files");
                    report.stopped_on_failure = true;
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            report.batches_attempted += 1;
            match self.send_batch(batch.clone()).await {
                Ok(true) => {
                    report.files_sent += batch.len();
                    if let Err(e) = files.delete_sealed(&batch).await {
                        warn!(error = %e, "Failed to delete delivered batch, stopping pass");
                        report.stopped_on_failure = true;
                        break;
                    }
                    debug!(files = batch.len(), "Batch delivered");
                }
                Ok(false) => {
                    info!(files = batch.len(), "Batch not delivered, will retry later");
                    report.stopped_on_failure = true;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, files = batch.len(), "Batch send failed, will retry later");
                    report.stopped_on_failure = true;
                    break;
                }
            }
        }

        if report.files_sent == 0 {
            match files.evict_oldest_if_over_cap(self.max_sealed_files).await {
                Ok(evicted) => report.files_evicted = evicted,
                Err(e) => warn!(error = %e, "Retention eviction failed"),
            }
        }

        debug!(
            batches = report.batches_attempted,
            sent = report.files_sent,
            evicted = report.files_evicted,
            "Send pass finished"
        );
        report
    }

    /// Run the sender on its own task so a panic fails the batch, not the worker
    async fn send_batch(&self, batch: Vec<SealedFile>) -> PipelineResult<bool> {
        let sender = Arc::clone(&self.sender);
        match tokio::spawn(async move { sender.send(&batch).await }).await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Delivery(format!("sender task failed: {}", e))),
        }
    }
}

/// Delivery off: writes are discarded
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStrategy;

impl DisabledStrategy {
    /// Discard one event
    pub fn record_event(&self) {
        debug!("Pipeline disabled, dropping event");
    }
}

/// The strategy a pipeline runs
pub enum DeliveryStrategy<E> {
    /// Delivery on
    Enabled(EnabledStrategy<E>),
    /// Delivery off
    Disabled(DisabledStrategy),
}

impl<E: Send + Sync + 'static> DeliveryStrategy<E> {
    pub(crate) fn enabled(
        files: &mut FilesManager<E>,
        config: &DeliveryConfig,
        sender: Arc<dyn BatchSender>,
        queue: QueueHandle<E>,
    ) -> Self {
        DeliveryStrategy::Enabled(EnabledStrategy::new(files, config, sender, queue))
    }

    pub(crate) fn disabled(files: &mut FilesManager<E>) -> Self {
        files.clear_listeners();
        DeliveryStrategy::Disabled(DisabledStrategy)
    }

    /// Whether delivery is on
    pub fn is_enabled(&self) -> bool {
        matches!(self, DeliveryStrategy::Enabled(_))
    }

    /// Whether a periodic seal is armed
    pub fn periodic_seal_armed(&self) -> bool {
        match self {
            DeliveryStrategy::Enabled(s) => s.periodic_seal_armed(),
            DeliveryStrategy::Disabled(_) => false,
        }
    }

    /// Record one event
    pub async fn record_event(
        &mut self,
        files: &mut FilesManager<E>,
        event: &E,
    ) -> PipelineResult<()> {
        match self {
            DeliveryStrategy::Enabled(s) => s.record_event(files, event).await,
            DeliveryStrategy::Disabled(s) => {
                s.record_event();
                Ok(())
            }
        }
    }

    /// Time-triggered seal
    pub async fn periodic_seal(&mut self, files: &mut FilesManager<E>) {
        if let DeliveryStrategy::Enabled(s) = self {
            s.periodic_seal(files).await;
        }
    }

    /// Seal now and schedule delivery
    pub async fn flush(&mut self, files: &mut FilesManager<E>) -> PipelineResult<SealOutcome> {
        match self {
            DeliveryStrategy::Enabled(s) => s.flush(files).await,
            DeliveryStrategy::Disabled(_) => Ok(SealOutcome::Empty),
        }
    }

    /// One send-and-cleanup pass
    pub async fn send_and_cleanup(&mut self, files: &mut FilesManager<E>) -> DeliveryReport {
        match self {
            DeliveryStrategy::Enabled(s) => s.send_and_cleanup(files).await,
            DeliveryStrategy::Disabled(_) => DeliveryReport::default(),
        }
    }

    /// Switch to [`DisabledStrategy`] and delete every local file
    ///
    /// The periodic seal stops with the enabled strategy. Sends already in
    /// flight finish, but nothing new is scheduled.
    pub async fn disable(&mut self, files: &mut FilesManager<E>) -> PipelineResult<()> {
        *self = DeliveryStrategy::disabled(files);
        files.delete_all_files().await
    }
}
