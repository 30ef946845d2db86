//! One pipeline per owner, created on first use
//!
//! [`PipelineRegistry`] maps owner ids to their [`Pipeline`]s. Creating a
//! pipeline only spawns its worker (the files are opened by the worker on its
//! first command), so creation happens inside the map's entry lock and
//! concurrent first calls for the same owner always share one pipeline.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::pipeline::Pipeline;
use crate::sender::BatchSender;
use crate::serializer::EventSerializer;

/// Lazily populated map from owner id to pipeline
pub struct PipelineRegistry<E> {
    config: Arc<PipelineConfig>,
    serializer: Arc<dyn EventSerializer<E>>,
    sender: Arc<dyn BatchSender>,
    runtime: Handle,
    pipelines: DashMap<String, Arc<Pipeline<E>>>,
}

impl<E: Send + Sync + 'static> PipelineRegistry<E> {
    /// Create a registry whose workers run on `runtime`
    pub fn new(
        config: PipelineConfig,
        serializer: Arc<dyn EventSerializer<E>>,
        sender: Arc<dyn BatchSender>,
        runtime: Handle,
    ) -> Self {
        for warning in config.validate() {
            warn!(%warning, "Pipeline configuration warning");
        }
        info!(
            base_dir = %config.base_dir.display(),
            enabled = config.delivery.enabled,
            "Pipeline registry created"
        );
        Self {
            config: Arc::new(config),
            serializer,
            sender,
            runtime,
            pipelines: DashMap::new(),
        }
    }

    /// The pipeline for `owner_id`, created if it does not exist yet
    #[instrument(skip(self))]
    pub fn pipeline(&self, owner_id: &str) -> Arc<Pipeline<E>> {
        if let Some(existing) = self.pipelines.get(owner_id) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .pipelines
            .entry(owner_id.to_string())
            .or_insert_with(|| {
                debug!("Creating pipeline");
                Arc::new(Pipeline::spawn(
                    &self.runtime,
                    owner_id,
                    Arc::clone(&self.config),
                    Arc::clone(&self.serializer),
                    Arc::clone(&self.sender),
                ))
            });
        Arc::clone(entry.value())
    }

    /// Record an event for `owner_id` without waiting
    pub fn record_event(&self, owner_id: &str, event: E) {
        self.pipeline(owner_id).record_event(event);
    }

    /// Record an event for `owner_id` and wait until it is written
    pub async fn record_event_sync(&self, owner_id: &str, event: E) -> PipelineResult<()> {
        self.pipeline(owner_id).record_event_sync(event).await
    }

    /// Seal and schedule delivery for `owner_id` without waiting
    pub fn flush(&self, owner_id: &str) {
        self.pipeline(owner_id).flush();
    }

    /// Delete all local files of `owner_id` and discard its future events
    pub async fn disable(&self, owner_id: &str) -> PipelineResult<()> {
        self.pipeline(owner_id).disable().await
    }
}

impl<E> PipelineRegistry<E> {
    /// Owners with a pipeline
    pub fn owners(&self) -> Vec<String> {
        self.pipelines.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of pipelines
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipeline has been created yet
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Shared configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
